use super::account::Role;
use super::types::Money;

/// Business and infrastructure failures surfaced by the workflows.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("insufficient balance for {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: String,
        required: Money,
        available: Money,
    },
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("{kind} {id} has already been resolved")]
    AlreadyResolved { kind: EntityKind, id: String },
    #[error("{actor_id} is not allowed to {action}")]
    Unauthorized { actor_id: String, action: String },
    #[error("cannot move {user_id} from {from} to {to}")]
    InvalidTransition { user_id: String, from: Role, to: Role },
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Money),
    #[error("report rejected: {0}")]
    InvalidReport(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    LedgerEntry,
    Deposit,
    Report,
    Post,
}

/// Failures reported by a store backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(String),
    #[error("record {0} changed since it was read")]
    Conflict(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("record could not be decoded: {0}")]
    Codec(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("notification could not be delivered: {0}")]
pub struct NotifyError(pub String);

pub type WalletResult<T> = Result<T, WalletError>;

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::LedgerEntry => "ledger entry",
            EntityKind::Deposit => "deposit",
            EntityKind::Report => "report",
            EntityKind::Post => "post payment",
        };
        f.write_str(name)
    }
}

impl WalletError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        WalletError::NotFound {
            kind,
            id: id.into(),
        }
    }
    pub fn already_resolved(kind: EntityKind, id: impl Into<String>) -> Self {
        WalletError::AlreadyResolved {
            kind,
            id: id.into(),
        }
    }
    pub fn unauthorized(actor_id: impl Into<String>, action: impl Into<String>) -> Self {
        WalletError::Unauthorized {
            actor_id: actor_id.into(),
            action: action.into(),
        }
    }
    /// Only store outages may be retried by callers
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::StoreUnavailable(_))
    }
    /// Maps a store failure for a lookup of `kind`.
    pub fn from_store(err: StoreError, kind: EntityKind) -> Self {
        match err {
            StoreError::NotFound(id) => WalletError::NotFound { kind, id },
            other => other.into(),
        }
    }
}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => WalletError::NotFound {
                kind: EntityKind::User,
                id,
            },
            StoreError::Conflict(id) => {
                WalletError::StoreUnavailable(format!("unresolved write conflict on {id}"))
            }
            StoreError::Unavailable(msg) => WalletError::StoreUnavailable(msg),
            StoreError::Codec(msg) => WalletError::StoreUnavailable(msg),
        }
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<minicbor::decode::Error> for StoreError {
    fn from(err: minicbor::decode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for StoreError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        StoreError::Codec(err.to_string())
    }
}
