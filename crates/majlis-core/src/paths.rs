//! Document layout.
//!
//! ```text
//! users/{uid}
//! users/{uid}/notifications/{id}
//! rooms/{roomId}
//! rooms/{roomId}/viewers/{uid}
//! rooms/{roomId}/wealth_transactions/{id}
//! broadcasts/{id}
//! welcome_requests/{id}
//! devices/{deviceId}
//! pending_credits/{creditId}
//! store_items/{itemId}
//! ```

use majlis_shared::{RoomId, UserUid};
use majlis_store::{DocPath, Result};

pub const USERS: &str = "users";
pub const ROOMS: &str = "rooms";
pub const BROADCASTS: &str = "broadcasts";
pub const WELCOME_REQUESTS: &str = "welcome_requests";
pub const DEVICES: &str = "devices";
pub const PENDING_CREDITS: &str = "pending_credits";
pub const STORE_ITEMS: &str = "store_items";

pub fn user(uid: &UserUid) -> Result<DocPath> {
    DocPath::new(USERS, uid.as_str())
}

pub fn room(id: &RoomId) -> Result<DocPath> {
    DocPath::new(ROOMS, id.as_str())
}

pub fn notifications(uid: &UserUid) -> String {
    format!("{USERS}/{uid}/notifications")
}

/// Outbox entry for a recipient credit that has not been settled yet.
pub fn pending_credit(credit_id: &str) -> Result<DocPath> {
    DocPath::new(PENDING_CREDITS, credit_id)
}

pub fn viewers(room: &RoomId) -> String {
    format!("{ROOMS}/{room}/viewers")
}

pub fn viewer(room_id: &RoomId, uid: &UserUid) -> Result<DocPath> {
    room(room_id)?.child("viewers", uid.as_str())
}

pub fn wealth_transactions(room: &RoomId) -> String {
    format!("{ROOMS}/{room}/wealth_transactions")
}

pub fn welcome_request(id: &str) -> Result<DocPath> {
    DocPath::new(WELCOME_REQUESTS, id)
}

pub fn device(device_id: &str) -> Result<DocPath> {
    DocPath::new(DEVICES, device_id)
}

pub fn store_item(item_id: &str) -> Result<DocPath> {
    DocPath::new(STORE_ITEMS, item_id)
}
