use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorError {
    #[error("invalid state: {0}")]
    State(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("io error: {0}")]
    Io(String),
    #[error("monitor thread is gone")]
    Disconnected,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("no current spool selected")]
    NoCurrentSpool,
    #[error("unknown spool: {0}")]
    UnknownSpool(String),
    #[error("spool {0} is deleted")]
    SpoolDeleted(String),
    #[error("invalid length: {0} mm")]
    InvalidLength(f64),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing key-value store")]
    MissingStore,
    #[error("missing notification sink")]
    MissingSink,
    #[error("missing history store")]
    MissingHistory,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
