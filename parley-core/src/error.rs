use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),

    #[error("Trace sink error: {0}")]
    TraceSink(#[from] crate::trace::TraceSinkError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),
}
