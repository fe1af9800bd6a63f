//! Typed documents persisted in the document store.
//!
//! Every record is constructed in full at creation time; there is no partial
//! persisted shape merged with defaults on read.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_VIP_LEVEL, PERMANENT_BAN};
use crate::types::{AdminRole, Currency, DisplayId, GameMode, ItemKind, RoomId, UserUid};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub diamonds: i64,
    pub coins: i64,
}

impl Wallet {
    pub fn balance(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Diamonds => self.diamonds,
            Currency::Coins => self.coins,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub uid: UserUid,
    pub display_id: DisplayId,
    pub name: String,
    pub avatar: String,
    pub email: Option<String>,
    pub level: u32,
    pub wallet: Wallet,
    pub diamonds_spent: i64,
    pub diamonds_received: i64,
    /// Gift id -> number of times received.
    pub received_gifts: BTreeMap<String, i64>,
    pub vip: bool,
    pub vip_level: u8,
    /// Epoch ms; `0` means permanent (or no VIP when `vip` is false).
    pub vip_expires_at: i64,
    pub is_banned: bool,
    /// Epoch ms; `-1` permanent, `0` none.
    pub ban_expires_at: i64,
    pub is_admin: bool,
    pub admin_role: Option<AdminRole>,
    pub can_create_room: bool,
    pub is_agent: bool,
    pub agency_balance: i64,
    pub is_welcome_agent: bool,
    pub daily_profit: i64,
    pub last_daily_reset: i64,
    /// Item id -> expiry (epoch ms).
    pub inventory: BTreeMap<String, i64>,
    pub equipped_frame: String,
    pub equipped_bubble: String,
    pub equipped_entry: String,
    pub created_at: i64,
}

impl User {
    /// VIP has a finite expiry that has already passed.
    pub fn vip_lapsed(&self, now: i64) -> bool {
        self.vip && self.vip_expires_at > 0 && self.vip_expires_at < now
    }

    /// Effective VIP tier at `now`, treating a lapsed VIP as tier 0.
    pub fn effective_vip_level(&self, now: i64) -> u8 {
        if !self.vip || self.vip_lapsed(now) {
            0
        } else {
            self.vip_level.min(MAX_VIP_LEVEL)
        }
    }

    /// A ban without a finite expiry (`-1`, or `0` on older records) never lapses.
    pub fn is_globally_banned(&self, now: i64) -> bool {
        self.is_banned
            && (self.ban_expires_at == PERMANENT_BAN
                || self.ban_expires_at == 0
                || self.ban_expires_at > now)
    }

    pub fn frame(&self) -> Option<String> {
        non_empty(&self.equipped_frame)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A slot in a room. Index 0 is the host seat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub index: usize,
    pub user_id: Option<DisplayId>,
    pub user_name: Option<String>,
    pub user_avatar: Option<String>,
    pub frame_id: Option<String>,
    pub is_muted: bool,
    pub is_locked: bool,
    pub gift_count: i64,
    pub vip_level: u8,
    pub admin_role: Option<AdminRole>,
}

impl Seat {
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            user_id: None,
            user_name: None,
            user_avatar: None,
            frame_id: None,
            is_muted: false,
            is_locked: false,
            gift_count: 0,
            vip_level: 0,
            admin_role: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
    }

    /// Return this seat to the canonical empty shape, keeping only the lock.
    pub fn vacate(&mut self) {
        let locked = self.is_locked;
        *self = Seat::empty(self.index);
        self.is_locked = locked;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    pub user_id: DisplayId,
    pub name: String,
    pub avatar: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub display_id: DisplayId,
    pub title: String,
    pub host_id: DisplayId,
    pub host_name: String,
    pub host_avatar: String,
    pub thumbnail: String,
    pub seat_count: usize,
    pub seats: Vec<Seat>,
    /// Sender uid -> accumulated spend within the current cup window.
    pub contributors: BTreeMap<UserUid, Contributor>,
    pub cup_start_time: i64,
    pub room_wealth: i64,
    /// Display id -> ban expiry (epoch ms) or `-1` for permanent.
    pub banned_users: BTreeMap<DisplayId, i64>,
    pub admins: BTreeSet<DisplayId>,
    pub viewer_count: i64,
    pub is_banned: bool,
    pub is_hot: bool,
    pub is_official: bool,
    pub is_activities: bool,
    pub game_luck: u8,
    pub game_mode: GameMode,
    pub hook_threshold: i64,
    pub created_at: i64,
}

impl Room {
    /// `seat_count` audience seats plus the host seat.
    pub fn empty_seats(seat_count: usize) -> Vec<Seat> {
        (0..=seat_count).map(Seat::empty).collect()
    }

    pub fn is_host(&self, user: &DisplayId) -> bool {
        &self.host_id == user
    }

    pub fn is_room_admin(&self, user: &DisplayId) -> bool {
        self.admins.contains(user)
    }

    pub fn seat_of(&self, user: &DisplayId) -> Option<usize> {
        self.seats
            .iter()
            .position(|s| s.user_id.as_ref() == Some(user))
    }
}

// ---------------------------------------------------------------------------
// Audit, presence and messaging records
// ---------------------------------------------------------------------------

/// Immutable audit record of a payout from a room's wealth pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WealthTransaction {
    pub id: String,
    pub target_display_id: DisplayId,
    pub target_user_name: String,
    pub target_user_avatar: String,
    pub amount: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewer {
    pub uid: UserUid,
    pub display_id: DisplayId,
    pub name: String,
    pub avatar: String,
    pub admin_role: Option<AdminRole>,
    pub vip_level: u8,
    pub equipped_frame: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    System,
    Official,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub timestamp: i64,
    pub read: bool,
}

/// Official message visible to every user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Broadcast {
    pub id: String,
    pub title: String,
    pub body: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WelcomeRequest {
    pub id: String,
    pub agent_id: UserUid,
    pub agent_name: String,
    pub target_display_id: DisplayId,
    pub status: RequestStatus,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    pub price: i64,
    pub currency: Currency,
}

/// Accounts registered from one device installation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub accounts: u32,
    pub updated_at: i64,
}
