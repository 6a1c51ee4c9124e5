#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("invalid checksum entry {0:?}: expected <index>:<name>")]
    InvalidEntry(String),

    #[error("invalid checksum index in {0:?}")]
    InvalidIndex(String),

    #[error("invalid base64 digest value: {0}")]
    InvalidValue(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, DigestError>;
