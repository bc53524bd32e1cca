use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Identifier errors
    #[error("Invalid identifier: {message}")]
    InvalidIdentifier { message: String },

    #[error("Invalid cookie: {0}")]
    InvalidCookie(u32),

    #[error("Invalid hardware auth token: {0}")]
    InvalidAuthToken(String),

    #[error("Invalid template name: {0}")]
    InvalidTemplateName(String),

    // Sensor errors
    #[error("Invalid sensor properties: {0}")]
    InvalidSensorProperties(String),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(u32),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
