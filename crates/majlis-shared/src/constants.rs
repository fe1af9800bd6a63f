/// Application name
pub const APP_NAME: &str = "Majlis";

/// Milliseconds in a minute (room ban durations)
pub const MINUTE_MS: i64 = 60 * 1000;

/// Milliseconds in 24 hours (cup window and daily profit window)
pub const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

/// Milliseconds in 7 days (store item rental, welcome VIP)
pub const WEEK_MS: i64 = 7 * DAY_MS;

/// Audience seats in a freshly created room (the host seat is extra)
pub const DEFAULT_SEAT_COUNT: usize = 10;

/// Share of every gift added to the room wealth pool, in percent
pub const ROOM_WEALTH_SHARE_PERCENT: i64 = 15;

/// Share of every gift credited to the recipient as coins, in percent
pub const RECIPIENT_COIN_SHARE_PERCENT: i64 = 30;

/// Accounts that may be registered from one device installation
pub const MAX_ACCOUNTS_PER_DEVICE: u32 = 2;

/// Optimistic transaction attempts before surfacing a conflict
pub const DEFAULT_TX_ATTEMPTS: u32 = 5;

/// Page size for wealth history and message-like listings
pub const HISTORY_LIMIT: usize = 50;

/// Maximum writes per batch commit
pub const MAX_BATCH_WRITES: usize = 500;

/// Highest VIP tier
pub const MAX_VIP_LEVEL: u8 = 5;

/// Welcome-agency bonus: diamonds credited on approval
pub const WELCOME_BONUS_DIAMONDS: i64 = 20_000_000;

/// Welcome-agency bonus: VIP tier granted on approval
pub const WELCOME_BONUS_VIP_LEVEL: u8 = 5;

/// Agency balance granted when a user is promoted to agent
pub const AGENT_STARTING_BALANCE: i64 = 200_000_000;

/// Sentinel for a permanent ban (room or global)
pub const PERMANENT_BAN: i64 = -1;

/// Default gameplay tuning for new rooms
pub const DEFAULT_GAME_LUCK: u8 = 50;
pub const DEFAULT_HOOK_THRESHOLD: i64 = 50_000;
