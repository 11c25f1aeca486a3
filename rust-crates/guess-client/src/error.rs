use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// No node or wallet could be reached; the client stays inert.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A JSON-RPC request failed.
    #[error("Provider request failed: {0}")]
    Provider(String),

    /// The wallet declined to authorize account access.
    #[error("Wallet declined authorization: {0}")]
    UserRejected(String),

    /// Submission failed, the transaction reverted or it was dropped.
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// A block or event stream broke.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// Input rejected before any transaction was attempted.
    #[error("{0}")]
    Validation(String),

    #[error("Session persistence failed: {0}")]
    Persistence(String),
}

impl Error {
    pub fn provider(err: impl std::fmt::Display) -> Self {
        Self::Provider(err.to_string())
    }

    pub fn transaction(err: impl std::fmt::Display) -> Self {
        Self::Transaction(err.to_string())
    }

    pub fn subscription(err: impl std::fmt::Display) -> Self {
        Self::Subscription(err.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }
}
