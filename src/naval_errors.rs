use sea_orm::DbErr;

#[derive(Debug, thiserror::Error)]
pub enum NCErr {
    #[error("database error: {0}")]
    DbError(#[from] DbErr),

    #[error("malformed session id")]
    InvalidSessionId,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),

    #[error("session not found")]
    SessionNotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl NCErr {
    /// Short reason string sent back to clients. Storage and io details stay
    /// in the logs.
    pub fn client_reason(&self) -> String {
        match self {
            NCErr::DbError(_) | NCErr::Io(_) | NCErr::Config(_) => "server error".to_string(),
            other => other.to_string(),
        }
    }
}
