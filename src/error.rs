use crate::models::{LikeState, PostId};
use strum::Display;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Transport failure, timeout or a backend that answered with a server error.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// Mutation attempted by someone who does not own the row.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Empty or oversized content.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A toggle for the same target is still waiting on the store.
    #[error("already updating {0}")]
    Busy(String),
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Busy(_) => ErrorKind::Busy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    #[strum(serialize = "connectivity")]
    Connectivity,
    #[strum(serialize = "authorization")]
    Authorization,
    #[strum(serialize = "validation")]
    Validation,
    #[strum(serialize = "not-found")]
    NotFound,
    #[strum(serialize = "busy")]
    Busy,
}

impl From<diesel::result::Error> for FeedError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match err {
            Error::NotFound => Self::NotFound("record not found".to_string()),
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, ref info) => {
                Self::NotFound(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
            | Error::DatabaseError(DatabaseErrorKind::CheckViolation, ref info)
            | Error::DatabaseError(DatabaseErrorKind::NotNullViolation, ref info) => {
                Self::Validation(info.message().to_string())
            }
            other => Self::Connectivity(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for FeedError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::Connectivity(format!("connection pool: {err}"))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Connectivity(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FeedError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Connectivity("request timed out".to_string())
    }
}

/// Failed like toggle. `restored` is the state the post was put back to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not update like on {post_id}: {reason}")]
pub struct ToggleError {
    pub post_id: PostId,
    pub reason: FeedError,
    pub restored: Option<LikeState>,
}

pub type Result<T, E = FeedError> = std::result::Result<T, E>;
