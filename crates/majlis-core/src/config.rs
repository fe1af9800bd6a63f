//! Economy tunables.

use majlis_shared::constants::{
    DAY_MS, DEFAULT_SEAT_COUNT, MAX_ACCOUNTS_PER_DEVICE, RECIPIENT_COIN_SHARE_PERCENT,
    ROOM_WEALTH_SHARE_PERCENT,
};

#[derive(Debug, Clone)]
pub struct EconomyConfig {
    /// Percent of each gift added to the room wealth pool.
    pub wealth_share_percent: i64,
    /// Percent of each gift credited to the recipient as coins.
    pub recipient_share_percent: i64,
    /// Length of the contributor cup window.
    pub cup_window_ms: i64,
    /// Length of the daily-profit window.
    pub daily_window_ms: i64,
    /// Audience seats in a new room.
    pub default_seat_count: usize,
    /// Upper bound for `seat_count`, and so for any addressable seat index.
    pub max_seat_count: usize,
    /// Accounts allowed per device installation.
    pub max_accounts_per_device: u32,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            wealth_share_percent: ROOM_WEALTH_SHARE_PERCENT,
            recipient_share_percent: RECIPIENT_COIN_SHARE_PERCENT,
            cup_window_ms: DAY_MS,
            daily_window_ms: DAY_MS,
            default_seat_count: DEFAULT_SEAT_COUNT,
            max_seat_count: 30,
            max_accounts_per_device: MAX_ACCOUNTS_PER_DEVICE,
        }
    }
}

impl EconomyConfig {
    /// `floor(cost * wealth_share)`.
    pub fn wealth_share(&self, cost: i64) -> i64 {
        percent_of(cost, self.wealth_share_percent)
    }

    /// `floor(cost * recipient_share)`.
    pub fn recipient_share(&self, cost: i64) -> i64 {
        percent_of(cost, self.recipient_share_percent)
    }
}

fn percent_of(amount: i64, percent: i64) -> i64 {
    (i128::from(amount) * i128::from(percent)).div_euclid(100) as i64
}
