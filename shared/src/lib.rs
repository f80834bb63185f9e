// shared/src/lib.rs

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("product not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("store write failed: {0}")]
    StoreWrite(String),
    #[error("store read failed: {0}")]
    StoreRead(String),
    #[error("cache: {0}")]
    Cache(String),
    #[error("publish: {0}")]
    Publish(String),
    #[error("event handler: {0}")]
    Handler(String),
    #[error("event bus: {0}")]
    Bus(String),
    #[error("startup: {0}")]
    Startup(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
