use thiserror::Error;

#[derive(Error, Debug)]
pub enum AivisError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Storage failures surfaced by `MonitorStore` / `GenerationStore` implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),
}
