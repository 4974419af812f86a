use crate::TxId;

/// Errors raised by the lock manager and its configuration.
///
/// Only [`Error::Io`], [`Error::Toml`], [`Error::InvalidValue`] and
/// [`Error::Timeout`] are ever returned. The remaining variants describe
/// contract violations; they are raised as panics, never returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error while reading a config file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a configuration key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    /// The transaction was not admitted before its deadline.
    #[error("transaction {0} timed out waiting for admission")]
    Timeout(TxId),

    #[error("transaction {0} already holds locks")]
    AlreadyRegistered(TxId),
    #[error("transaction {0} holds no locks")]
    NotRegistered(TxId),
    #[error("transaction {0} cannot downgrade to a global write lock")]
    GlobalDowngrade(TxId),
    #[error("transaction {tx} does not hold a write lock on {resource}")]
    NotWriteLocked { tx: TxId, resource: String },
}

pub type Result<T> = std::result::Result<T, Error>;
