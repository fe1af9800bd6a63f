use thiserror::Error;

use majlis_shared::{DisplayId, RoomId};
use majlis_store::StoreError;

/// Broad failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Conflict,
    InsufficientFunds,
    InvalidArgument,
    Internal,
}

/// Errors produced by economy and moderation operations.
///
/// Any of these returned from inside a transaction aborts it with no
/// partial effect.
#[derive(Error, Debug)]
pub enum EconomyError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Target user not found: {0}")]
    TargetNotFound(DisplayId),

    #[error("Welcome request not found: {0}")]
    RequestNotFound(String),

    #[error("Store item not found: {0}")]
    ItemNotFound(String),

    #[error("Seat {0} is occupied")]
    SeatOccupied(usize),

    #[error("Seat {0} is locked")]
    SeatLocked(usize),

    #[error("Seat index {index} is out of range (max {max})")]
    SeatOutOfRange { index: usize, max: usize },

    #[error("User is banned from this room")]
    BannedFromRoom,

    #[error("Account is banned")]
    AccountBanned,

    #[error("Room is banned")]
    RoomBanned,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: i64, required: i64 },

    #[error("Insufficient room wealth: have {available}, need {required}")]
    InsufficientWealth { available: i64, required: i64 },

    #[error("Account limit reached for this device (max {limit})")]
    DeviceLimitReached { limit: u32 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EconomyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EconomyError::RoomNotFound(_)
            | EconomyError::UserNotFound(_)
            | EconomyError::TargetNotFound(_)
            | EconomyError::RequestNotFound(_)
            | EconomyError::ItemNotFound(_) => ErrorKind::NotFound,

            EconomyError::SeatLocked(_)
            | EconomyError::BannedFromRoom
            | EconomyError::AccountBanned
            | EconomyError::RoomBanned
            | EconomyError::PermissionDenied(_)
            | EconomyError::DeviceLimitReached { .. } => ErrorKind::PermissionDenied,

            EconomyError::SeatOccupied(_) => ErrorKind::Conflict,

            EconomyError::InsufficientFunds { .. } | EconomyError::InsufficientWealth { .. } => {
                ErrorKind::InsufficientFunds
            }

            EconomyError::SeatOutOfRange { .. }
            | EconomyError::InvalidAmount(_)
            | EconomyError::InvalidArgument(_) => ErrorKind::InvalidArgument,

            EconomyError::Store(StoreError::Conflict { .. })
            | EconomyError::Store(StoreError::WriteConflict(_)) => ErrorKind::Conflict,
            EconomyError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            EconomyError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EconomyError>;
