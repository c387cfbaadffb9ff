pub mod pack {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "sticker_pack")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,

        #[sea_orm(unique)]
        pub short_name: String,

        pub name: String,

        // one of regular, mask, custom_emoji
        pub sticker_type: String,

        pub link: String,

        pub created_at: DateTimeUtc,
    }

    #[derive(Debug, DeriveRelation, EnumIter)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod submission {
    use sea_orm::entity::prelude::*;

    // (user_id, pack_id) carries a composite unique index, created alongside
    // the table; the entity derive only covers single-column uniques.
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "user_submission")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,

        pub user_id: i64,

        pub pack_id: i32,

        pub submitted_at: DateTimeUtc,
    }

    #[derive(Debug, DeriveRelation, EnumIter)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
