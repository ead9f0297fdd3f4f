use std::fmt::Display;

#[derive(Debug)]
pub enum Error {
    NotFound,
    Unsupported(String),
    Serialize(String),
    Deserialize(String),
    Storage(String),
    Config(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "Not found"),
            Error::Unsupported(what) => write!(f, "Unsupported: {}", what),
            Error::Serialize(err) => write!(f, "Serialization error: {}", err),
            Error::Deserialize(err) => write!(f, "Deserialization error: {}", err),
            Error::Storage(err) => write!(f, "Storage error: {}", err),
            Error::Config(err) => write!(f, "Configuration error: {}", err),
        }
    }
}

impl std::error::Error for Error {}
