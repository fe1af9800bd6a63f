//! # majlis-shared
//!
//! Domain types shared by every Majlis crate: identifiers, the typed user and
//! room documents, economy constants, and the injectable wall clock.

pub mod clock;
pub mod constants;
pub mod models;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use models::*;
pub use types::*;
