use serde::{Deserialize, Serialize};

/// One queued sticker pack submission.
///
/// This is the wire format shared by the bot and the worker; both sides must
/// agree on the field names byte for byte.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEnvelope {
    pub short_name: String,
    pub name: String,
    pub sticker_type: StickerKind,
    pub link: String,
    pub user_id: i64,
}

/// Closed set of sticker pack kinds understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickerKind {
    Regular,
    Mask,
    CustomEmoji,
}

impl StickerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Mask => "mask",
            Self::CustomEmoji => "custom_emoji",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats() -> SubmissionEnvelope {
        SubmissionEnvelope {
            short_name: "abc123".to_owned(),
            name: "Cats".to_owned(),
            sticker_type: StickerKind::Regular,
            link: "https://t.me/addstickers/abc123".to_owned(),
            user_id: 555,
        }
    }

    #[test]
    fn serializes_with_the_agreed_field_names() {
        let json = serde_json::to_string(&cats()).unwrap();
        assert_eq!(
            json,
            r#"{"short_name":"abc123","name":"Cats","sticker_type":"regular","link":"https://t.me/addstickers/abc123","user_id":555}"#
        );
    }

    #[test]
    fn deserializes_every_sticker_kind() {
        for (wire, kind) in [
            ("regular", StickerKind::Regular),
            ("mask", StickerKind::Mask),
            ("custom_emoji", StickerKind::CustomEmoji),
        ] {
            let json = format!(
                r#"{{"short_name":"a","name":"b","sticker_type":"{}","link":"c","user_id":1}}"#,
                wire
            );
            let envelope: SubmissionEnvelope = serde_json::from_str(&json).unwrap();
            assert_eq!(envelope.sticker_type, kind);
            assert_eq!(envelope.sticker_type.as_str(), wire);
        }
    }

    #[test]
    fn rejects_non_json_payloads() {
        assert!(serde_json::from_str::<SubmissionEnvelope>("definitely not json").is_err());
    }

    #[test]
    fn rejects_field_incomplete_payloads() {
        assert!(serde_json::from_str::<SubmissionEnvelope>(r#"{"short_name":"abc123"}"#).is_err());
    }

    #[test]
    fn rejects_unknown_sticker_kinds() {
        let json = r#"{"short_name":"a","name":"b","sticker_type":"video","link":"c","user_id":1}"#;
        assert!(serde_json::from_str::<SubmissionEnvelope>(json).is_err());
    }
}
