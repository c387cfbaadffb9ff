#[derive(Debug)]
pub enum CollectorError {
    /// Problem originated from the Telegram bot library
    RequestError(teloxide::RequestError),

    /// Command parsing error
    CommandParseError(Option<teloxide::utils::command::ParseError>),

    /// Problem originated from the database library
    DatabaseError(sea_orm::DbErr),

    /// Problem originated from the Redis queue
    QueueError(redis::RedisError),

    /// Problem serializing or deserializing a queue envelope
    EnvelopeError(serde_json::Error),

    /// A startup dependency never became reachable within the retry budget
    StartupTimeout(&'static str),
}

impl From<teloxide::RequestError> for CollectorError {
    fn from(e: teloxide::RequestError) -> Self {
        Self::RequestError(e)
    }
}

impl From<teloxide::utils::command::ParseError> for CollectorError {
    fn from(e: teloxide::utils::command::ParseError) -> Self {
        Self::CommandParseError(Some(e))
    }
}

impl From<sea_orm::DbErr> for CollectorError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::DatabaseError(e)
    }
}

impl From<redis::RedisError> for CollectorError {
    fn from(e: redis::RedisError) -> Self {
        Self::QueueError(e)
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(e: serde_json::Error) -> Self {
        Self::EnvelopeError(e)
    }
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestError(e) => write!(f, "{:?}", e),
            Self::CommandParseError(Some(e)) => write!(f, "{:?}", e),
            Self::CommandParseError(None) => write!(f, "CommandParseError"),
            Self::DatabaseError(e) => write!(f, "{:?}", e),
            Self::QueueError(e) => write!(f, "{:?}", e),
            Self::EnvelopeError(e) => write!(f, "{:?}", e),
            Self::StartupTimeout(dependency) => write!(f, "timed out waiting for {}", dependency),
        }
    }
}

impl std::error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RequestError(e) => Some(e),
            Self::CommandParseError(Some(e)) => Some(e),
            Self::DatabaseError(e) => Some(e),
            Self::QueueError(e) => Some(e),
            Self::EnvelopeError(e) => Some(e),
            _ => None,
        }
    }
}
