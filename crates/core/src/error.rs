use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),
}
