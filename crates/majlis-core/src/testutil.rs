//! Fixtures shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use majlis_shared::{
    DisplayId, GameMode, ManualClock, Room, RoomId, Seat, User, UserUid, Wallet,
};
use majlis_store::{DocumentStore, MemoryStore};

use crate::paths;
use crate::service::Majlis;

pub const T0: i64 = 1_700_000_000_000;

pub type TestMajlis = Majlis<MemoryStore, ManualClock>;

pub fn setup() -> (TestMajlis, ManualClock) {
    let clock = ManualClock::new(T0);
    let majlis = Majlis::new(Arc::new(MemoryStore::new()), clock.clone());
    (majlis, clock)
}

pub fn user_fixture(uid: &str, display_id: &str, diamonds: i64) -> User {
    User {
        uid: UserUid::new(uid),
        display_id: DisplayId(display_id.to_string()),
        name: format!("user-{uid}"),
        avatar: format!("https://cdn.example/{uid}.png"),
        email: None,
        level: 1,
        wallet: Wallet { diamonds, coins: 0 },
        diamonds_spent: 0,
        diamonds_received: 0,
        received_gifts: BTreeMap::new(),
        vip: false,
        vip_level: 0,
        vip_expires_at: 0,
        is_banned: false,
        ban_expires_at: 0,
        is_admin: false,
        admin_role: None,
        can_create_room: true,
        is_agent: false,
        agency_balance: 0,
        is_welcome_agent: false,
        daily_profit: 0,
        last_daily_reset: T0,
        inventory: BTreeMap::new(),
        equipped_frame: String::new(),
        equipped_bubble: String::new(),
        equipped_entry: String::new(),
        created_at: T0,
    }
}

pub fn room_fixture(id: &str, host_display_id: &str) -> Room {
    Room {
        id: RoomId::new(id),
        display_id: DisplayId(host_display_id.to_string()),
        title: format!("room {id}"),
        host_id: DisplayId(host_display_id.to_string()),
        host_name: "host".to_string(),
        host_avatar: String::new(),
        thumbnail: String::new(),
        seat_count: 10,
        seats: Room::empty_seats(10),
        contributors: BTreeMap::new(),
        cup_start_time: T0,
        room_wealth: 0,
        banned_users: BTreeMap::new(),
        admins: BTreeSet::new(),
        viewer_count: 0,
        is_banned: false,
        is_hot: false,
        is_official: false,
        is_activities: false,
        game_luck: 50,
        game_mode: GameMode::Fair,
        hook_threshold: 50_000,
        created_at: T0,
    }
}

pub fn seed_user(majlis: &TestMajlis, user: &User) {
    majlis
        .store()
        .set(&paths::user(&user.uid).unwrap(), user)
        .unwrap();
}

pub fn seed_room(majlis: &TestMajlis, room: &Room) {
    majlis
        .store()
        .set(&paths::room(&room.id).unwrap(), room)
        .unwrap();
}

pub fn load_user(majlis: &TestMajlis, uid: &str) -> User {
    majlis
        .store()
        .get_as(&paths::user(&UserUid::new(uid)).unwrap())
        .unwrap()
        .unwrap()
}

pub fn load_room(majlis: &TestMajlis, id: &str) -> Room {
    majlis.get_room(&RoomId::new(id)).unwrap().unwrap()
}

/// One seat per index up to `seat_count`, no duplicate occupants, and empty
/// seats in canonical shape.
pub fn assert_invariants(room: &Room) {
    assert_eq!(room.seats.len(), room.seat_count + 1);
    let mut seen = HashSet::new();
    for (i, seat) in room.seats.iter().enumerate() {
        assert_eq!(seat.index, i);
        match &seat.user_id {
            Some(id) => assert!(seen.insert(id.clone()), "duplicate occupant {id}"),
            None => {
                let mut canonical = Seat::empty(i);
                canonical.is_locked = seat.is_locked;
                assert_eq!(seat, &canonical);
            }
        }
    }
}
