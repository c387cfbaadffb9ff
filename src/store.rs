use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, Schema, Set, Statement, TransactionTrait,
};

use crate::envelope::SubmissionEnvelope;
use crate::model::{pack, submission};

// sea-orm's entity derive only knows single-column uniques, so the composite
// constraint is created with plain SQL (valid on both Postgres and SQLite)
const SUBMISSION_UNIQUE_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS uix_user_submission_user_pack \
     ON user_submission (user_id, pack_id)";

/// What recording a submission did.
///
/// Duplicates are an expected outcome of at-least-once delivery and of races
/// between concurrent workers, so they surface as a variant here instead of
/// as an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new submission row was written. `new_pack` says whether the pack
    /// itself was seen for the first time too.
    Inserted { new_pack: bool },

    /// The (user, pack) pair was already recorded; nothing was written.
    AlreadyExists,
}

/// Relational store for packs and per-user submissions.
#[derive(Clone, Debug)]
pub struct SubmissionStore {
    db: DatabaseConnection,
}

impl SubmissionStore {
    /// Connect and force a real round-trip; the pool itself is lazy.
    pub async fn connect(db_url: &str) -> Result<Self, DbErr> {
        let db = Database::connect(db_url).await?;
        let builder = db.get_database_backend();
        db.execute(Statement::from_string(builder, "SELECT 1".to_owned()))
            .await?;
        Ok(Self { db })
    }

    /// Create tables and the composite unique index if they don't exist yet.
    pub async fn init_schema(&self) -> Result<(), DbErr> {
        create_table(pack::Entity, &self.db).await?;
        create_table(submission::Entity, &self.db).await?;

        let builder = self.db.get_database_backend();
        self.db
            .execute(Statement::from_string(
                builder,
                SUBMISSION_UNIQUE_INDEX.to_owned(),
            ))
            .await?;

        Ok(())
    }

    /// Record one submission envelope transactionally and idempotently.
    ///
    /// The pack row is created on first sight of its short name, the
    /// submission row on first sight of the (user, pack) pair. The
    /// read-then-insert is not serializable against a concurrent worker
    /// inserting the same keys; when that race loses, the resulting
    /// unique-constraint violation is rolled back and reported as
    /// [`RecordOutcome::AlreadyExists`].
    pub async fn record_submission(
        &self,
        envelope: &SubmissionEnvelope,
    ) -> Result<RecordOutcome, DbErr> {
        let txn = self.db.begin().await?;
        let applied = apply_envelope(&txn, envelope).await;
        settle(txn, applied).await
    }

    /// Like [`Self::record_submission`], but the same envelope lands from a
    /// concurrent worker after our lookups and before our writes, so our own
    /// inserts lose the race and hit the unique constraints.
    #[cfg(test)]
    pub(crate) async fn record_submission_losing_race(
        &self,
        envelope: &SubmissionEnvelope,
    ) -> Result<RecordOutcome, DbErr> {
        let txn = self.db.begin().await?;
        let state = inspect_envelope(&txn, envelope).await?;
        apply_envelope(&txn, envelope).await?;
        let applied = write_envelope(&txn, envelope, state).await;
        settle(txn, applied).await
    }

    #[cfg(test)]
    pub(crate) async fn connect_memory() -> Self {
        use sea_orm::ConnectOptions;

        // a single pooled connection so every query sees the same in-memory db
        let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
        options.max_connections(1);

        let db = Database::connect(options)
            .await
            .expect("in-memory sqlite to connect");
        let store = Self { db };
        store.init_schema().await.expect("schema to initialize");
        store
    }

    #[cfg(test)]
    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// What the lookups saw before any writes. The read-then-write gap this
/// spans is exactly where a concurrent worker can slip in the same keys.
struct EnvelopeState {
    existing_pack: Option<pack::Model>,
    existing_submission: Option<submission::Model>,
}

async fn apply_envelope(
    txn: &DatabaseTransaction,
    envelope: &SubmissionEnvelope,
) -> Result<RecordOutcome, DbErr> {
    let state = inspect_envelope(txn, envelope).await?;
    write_envelope(txn, envelope, state).await
}

async fn inspect_envelope(
    txn: &DatabaseTransaction,
    envelope: &SubmissionEnvelope,
) -> Result<EnvelopeState, DbErr> {
    let existing_pack = pack::Entity::find()
        .filter(pack::Column::ShortName.eq(envelope.short_name.clone()))
        .one(txn)
        .await?;

    // a pack inserted by this very transaction can't have submissions yet,
    // so the pair is only looked up when the pack already exists
    let existing_submission = match &existing_pack {
        Some(found) => {
            submission::Entity::find()
                .filter(submission::Column::UserId.eq(envelope.user_id))
                .filter(submission::Column::PackId.eq(found.id))
                .one(txn)
                .await?
        }
        None => None,
    };

    Ok(EnvelopeState {
        existing_pack,
        existing_submission,
    })
}

async fn write_envelope(
    txn: &DatabaseTransaction,
    envelope: &SubmissionEnvelope,
    state: EnvelopeState,
) -> Result<RecordOutcome, DbErr> {
    // get or create the pack; the insert yields its key without committing
    let (pack_id, new_pack) = match state.existing_pack {
        Some(found) => (found.id, false),
        None => {
            let inserted = pack::Entity::insert(pack::ActiveModel {
                short_name: Set(envelope.short_name.clone()),
                name: Set(envelope.name.clone()),
                sticker_type: Set(envelope.sticker_type.as_str().to_owned()),
                link: Set(envelope.link.clone()),
                created_at: Set(Utc::now()),
                ..Default::default()
            })
            .exec(txn)
            .await?;
            (inserted.last_insert_id, true)
        }
    };

    if state.existing_submission.is_some() {
        return Ok(RecordOutcome::AlreadyExists);
    }

    submission::Entity::insert(submission::ActiveModel {
        user_id: Set(envelope.user_id),
        pack_id: Set(pack_id),
        submitted_at: Set(Utc::now()),
        ..Default::default()
    })
    .exec(txn)
    .await?;

    Ok(RecordOutcome::Inserted { new_pack })
}

/// Commit on success; on failure roll back, reporting a unique-constraint
/// violation as the expected duplicate outcome instead of an error.
async fn settle(
    txn: DatabaseTransaction,
    applied: Result<RecordOutcome, DbErr>,
) -> Result<RecordOutcome, DbErr> {
    match applied {
        Ok(outcome) => match txn.commit().await {
            Ok(()) => Ok(outcome),
            Err(err) if is_unique_violation(&err) => Ok(RecordOutcome::AlreadyExists),
            Err(err) => Err(err),
        },
        Err(err) if is_unique_violation(&err) => {
            txn.rollback().await?;
            Ok(RecordOutcome::AlreadyExists)
        }
        Err(err) => {
            txn.rollback().await?;
            Err(err)
        }
    }
}

async fn create_table<E: EntityTrait>(entity: E, db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    db.execute(builder.build(schema.create_table_from_entity(entity).if_not_exists()))
        .await?;

    Ok(())
}

fn is_unique_violation(err: &DbErr) -> bool {
    match err {
        DbErr::Exec(message) | DbErr::Query(message) => {
            message.contains("duplicate key value violates unique constraint")
                || message.contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::StickerKind;

    fn cats_envelope(user_id: i64) -> SubmissionEnvelope {
        SubmissionEnvelope {
            short_name: "abc123".to_owned(),
            name: "Cats".to_owned(),
            sticker_type: StickerKind::Regular,
            link: "https://t.me/addstickers/abc123".to_owned(),
            user_id,
        }
    }

    #[tokio::test]
    async fn records_a_new_pack_and_submission() {
        let store = SubmissionStore::connect_memory().await;

        let outcome = store.record_submission(&cats_envelope(555)).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Inserted { new_pack: true });

        let packs = pack::Entity::find().all(store.db()).await.unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].short_name, "abc123");
        assert_eq!(packs[0].name, "Cats");
        assert_eq!(packs[0].sticker_type, "regular");
        assert_eq!(packs[0].link, "https://t.me/addstickers/abc123");

        let submissions = submission::Entity::find().all(store.db()).await.unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].user_id, 555);
        assert_eq!(submissions[0].pack_id, packs[0].id);
    }

    #[tokio::test]
    async fn repeating_a_submission_is_a_noop() {
        let store = SubmissionStore::connect_memory().await;

        store.record_submission(&cats_envelope(555)).await.unwrap();
        let second = store.record_submission(&cats_envelope(555)).await.unwrap();
        assert_eq!(second, RecordOutcome::AlreadyExists);

        assert_eq!(pack::Entity::find().all(store.db()).await.unwrap().len(), 1);
        assert_eq!(
            submission::Entity::find().all(store.db()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn an_existing_pack_is_reused_for_other_users() {
        let store = SubmissionStore::connect_memory().await;

        store.record_submission(&cats_envelope(555)).await.unwrap();
        let second = store.record_submission(&cats_envelope(777)).await.unwrap();
        assert_eq!(second, RecordOutcome::Inserted { new_pack: false });

        let packs = pack::Entity::find().all(store.db()).await.unwrap();
        assert_eq!(packs.len(), 1);

        let submissions = submission::Entity::find().all(store.db()).await.unwrap();
        assert_eq!(submissions.len(), 2);
        assert!(submissions.iter().all(|s| s.pack_id == packs[0].id));
    }

    #[tokio::test]
    async fn one_user_can_submit_many_packs() {
        let store = SubmissionStore::connect_memory().await;

        store.record_submission(&cats_envelope(555)).await.unwrap();

        let mut dogs = cats_envelope(555);
        dogs.short_name = "dogs42".to_owned();
        dogs.name = "Dogs".to_owned();
        dogs.link = "https://t.me/addstickers/dogs42".to_owned();
        let outcome = store.record_submission(&dogs).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Inserted { new_pack: true });

        assert_eq!(pack::Entity::find().all(store.db()).await.unwrap().len(), 2);
        assert_eq!(
            submission::Entity::find().all(store.db()).await.unwrap().len(),
            2
        );
    }

    // A concurrent worker can insert the same pack between our lookup and
    // insert; the database must reject the copy and the rejection must be
    // recognizable as a duplicate, not treated as a generic failure.
    #[tokio::test]
    async fn racing_pack_inserts_hit_the_unique_constraint() {
        let store = SubmissionStore::connect_memory().await;
        store.record_submission(&cats_envelope(555)).await.unwrap();

        let err = pack::Entity::insert(pack::ActiveModel {
            short_name: Set("abc123".to_owned()),
            name: Set("Cats again".to_owned()),
            sticker_type: Set("regular".to_owned()),
            link: Set("https://t.me/addstickers/abc123".to_owned()),
            created_at: Set(Utc::now()),
            ..Default::default()
        })
        .exec(store.db())
        .await
        .unwrap_err();

        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn racing_submission_inserts_hit_the_composite_constraint() {
        let store = SubmissionStore::connect_memory().await;
        store.record_submission(&cats_envelope(555)).await.unwrap();

        let packs = pack::Entity::find().all(store.db()).await.unwrap();
        let err = submission::Entity::insert(submission::ActiveModel {
            user_id: Set(555),
            pack_id: Set(packs[0].id),
            submitted_at: Set(Utc::now()),
            ..Default::default()
        })
        .exec(store.db())
        .await
        .unwrap_err();

        assert!(is_unique_violation(&err));
    }

    // Two workers dequeue the same envelope; the slower one's pack insert
    // collides and must come back as a swallowed duplicate, not an error.
    #[tokio::test]
    async fn losing_the_pack_insert_race_is_reported_as_a_duplicate() {
        let store = SubmissionStore::connect_memory().await;

        let outcome = store
            .record_submission_losing_race(&cats_envelope(555))
            .await
            .unwrap();
        assert_eq!(outcome, RecordOutcome::AlreadyExists);

        // the rolled-back loser must not get in the way of later items
        let next = store.record_submission(&cats_envelope(555)).await.unwrap();
        assert_eq!(next, RecordOutcome::Inserted { new_pack: true });
    }

    #[tokio::test]
    async fn losing_the_submission_insert_race_is_reported_as_a_duplicate() {
        let store = SubmissionStore::connect_memory().await;
        store.record_submission(&cats_envelope(777)).await.unwrap();

        let outcome = store
            .record_submission_losing_race(&cats_envelope(555))
            .await
            .unwrap();
        assert_eq!(outcome, RecordOutcome::AlreadyExists);

        assert_eq!(pack::Entity::find().all(store.db()).await.unwrap().len(), 1);
        let next = store.record_submission(&cats_envelope(555)).await.unwrap();
        assert_eq!(next, RecordOutcome::Inserted { new_pack: false });
    }

    #[test]
    fn other_database_errors_are_not_misread_as_duplicates() {
        let err = DbErr::Exec("connection reset by peer".to_owned());
        assert!(!is_unique_violation(&err));
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let store = SubmissionStore::connect_memory().await;
        store.init_schema().await.unwrap();
        store.record_submission(&cats_envelope(555)).await.unwrap();
    }
}
