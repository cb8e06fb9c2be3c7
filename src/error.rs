use crate::api_client::ApiError;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the orchestration kernel distinguishes. Infrastructure
/// failures (lost DB connections, poisoned locks) panic at the call site;
/// everything a caller can react to travels through this enum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("ship {0} is already assigned")]
    ShipAlreadyAssigned(String),

    #[error("assignment owner mismatch for ship {0}")]
    OwnerMismatch(String),

    #[error("task {0} could not be claimed")]
    TaskClaimRejected(i64),

    #[error("circular dependency in supply chain at {0}")]
    CircularDependency(String),

    #[error("no factory in system for {0}")]
    NoFactory(String),

    #[error("no market trades {0}")]
    NoMarket(String),

    #[error("no recipe for {0}")]
    NoRecipe(String),

    #[error("{0}")]
    Precondition(String),
}
