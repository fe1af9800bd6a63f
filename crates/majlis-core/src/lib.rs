//! # majlis-core
//!
//! Room economy and moderation rules for Majlis.
//!
//! Every operation hangs off the [`Majlis`] handle, which owns a
//! [`majlis_store::DocumentStore`] and a [`majlis_shared::Clock`]. Each
//! economic mutation is a single optimistic transaction over the documents it
//! touches, so a seat, a wallet and the room aggregates never disagree.

pub mod accounts;
pub mod admin;
pub mod config;
pub mod credits;
pub mod gate;
pub mod gifts;
pub mod notify;
pub mod paths;
pub mod rooms;
pub mod seats;
pub mod service;
pub mod wallet;
pub mod wealth;

mod error;

#[cfg(test)]
mod testutil;

pub use accounts::{DevicePolicy, FixedDeviceLimit, NewUser};
pub use admin::BanDuration;
pub use config::EconomyConfig;
pub use credits::{run_credit_worker, CreditQueue, RetryPolicy};
pub use error::{EconomyError, ErrorKind, Result};
pub use gate::{DenyReason, GateDecision};
pub use gifts::{GiftReceipt, RecipientCredit};
pub use rooms::{GameConfig, NewRoom, RoomFlags};
pub use service::Majlis;
