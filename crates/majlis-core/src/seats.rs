//! Seat ledger.
//!
//! Every seat mutation is a single read-modify-write transaction on the room
//! document. After each one:
//! - no two seats share a non-null `user_id`;
//! - every empty seat has the canonical empty shape (only `is_locked` kept);
//! - `seats.len() == seat_count + 1`.

use std::collections::HashSet;

use tracing::info;

use majlis_shared::{Clock, Room, RoomId, Seat, User, UserUid};
use majlis_store::{DocumentStore, FieldUpdate};

use crate::error::{EconomyError, Result};
use crate::gate;
use crate::paths;
use crate::service::Majlis;

// ---------------------------------------------------------------------------
// Pure ledger operations
// ---------------------------------------------------------------------------

/// Reindex seats, vacate duplicate occupants and canonicalise empty seats.
pub fn normalize_seats(seats: &mut [Seat]) {
    let mut seen = HashSet::new();
    for (i, seat) in seats.iter_mut().enumerate() {
        seat.index = i;
        seat.gift_count = seat.gift_count.max(0);
        let keep = match &seat.user_id {
            Some(id) => seen.insert(id.clone()),
            None => false,
        };
        if !keep {
            seat.vacate();
        }
    }
}

/// Bring a room read from storage back in line with the ledger invariants.
pub fn normalize_room(room: &mut Room) {
    while room.seats.len() < room.seat_count + 1 {
        room.seats.push(Seat::empty(room.seats.len()));
    }
    if room.seats.len() > room.seat_count + 1 {
        room.seat_count = room.seats.len() - 1;
    }
    normalize_seats(&mut room.seats);
}

/// Pad the seat array so `index` exists, growing `seat_count` with it.
pub fn ensure_seat(room: &mut Room, index: usize, max_seat_count: usize) -> Result<()> {
    if index > max_seat_count {
        return Err(EconomyError::SeatOutOfRange {
            index,
            max: max_seat_count,
        });
    }
    while room.seats.len() <= index {
        room.seats.push(Seat::empty(room.seats.len()));
    }
    if room.seats.len() > room.seat_count + 1 {
        room.seat_count = room.seats.len() - 1;
    }
    Ok(())
}

/// Seat `user` at `index`, vacating any seat they held before.
pub fn seat_user(
    room: &mut Room,
    index: usize,
    user: &User,
    now: i64,
    max_seat_count: usize,
) -> Result<()> {
    ensure_seat(room, index, max_seat_count)?;

    if let Some(occupant) = &room.seats[index].user_id {
        if occupant != &user.display_id {
            return Err(EconomyError::SeatOccupied(index));
        }
    }

    if let Some(reason) = gate::can_occupy_seat(room, user, index, now).reason {
        return Err(reason.into_error(index));
    }

    for (i, seat) in room.seats.iter_mut().enumerate() {
        if i != index && seat.user_id.as_ref() == Some(&user.display_id) {
            seat.vacate();
        }
    }

    let is_locked = room.seats[index].is_locked;
    room.seats[index] = Seat {
        index,
        user_id: Some(user.display_id.clone()),
        user_name: Some(user.name.clone()),
        user_avatar: Some(user.avatar.clone()),
        frame_id: user.frame(),
        is_muted: false,
        is_locked,
        gift_count: 0,
        vip_level: user.effective_vip_level(now),
        admin_role: user.admin_role,
    };
    normalize_seats(&mut room.seats);
    Ok(())
}

/// Vacate every seat held by `user`. Returns whether anything changed.
pub fn unseat_user(room: &mut Room, user: &User) -> bool {
    let mut changed = false;
    for seat in room.seats.iter_mut() {
        if seat.user_id.as_ref() == Some(&user.display_id) {
            seat.vacate();
            changed = true;
        }
    }
    changed
}

pub(crate) fn seats_update(room: &Room) -> Result<FieldUpdate> {
    Ok(FieldUpdate::new()
        .set("seats", &room.seats)?
        .set("seat_count", room.seat_count)?)
}

fn require_moderator(room: &Room, actor: &User) -> Result<()> {
    if gate::can_moderate(room, actor) {
        Ok(())
    } else {
        Err(EconomyError::PermissionDenied(
            "only the host or a room admin may moderate seats".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Transactional operations
// ---------------------------------------------------------------------------

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    /// Read-modify-write the room's seats in one transaction.
    ///
    /// `f` returns whether it changed anything; unchanged rooms are not
    /// written.
    fn mutate_seats<F>(&self, room_id: &RoomId, mut f: F) -> Result<Room>
    where
        F: FnMut(&mut Room) -> Result<bool>,
    {
        let path = paths::room(room_id)?;
        self.store.transaction(|tx| {
            let mut room: Room = tx
                .get_as(&path)?
                .ok_or_else(|| EconomyError::RoomNotFound(room_id.clone()))?;
            normalize_room(&mut room);
            if f(&mut room)? {
                tx.update(&path, seats_update(&room)?);
            }
            Ok(room)
        })
    }

    pub fn take_seat(&self, room_id: &RoomId, seat_index: usize, uid: &UserUid) -> Result<Room> {
        let user = self.require_user(uid)?;
        let now = self.now();
        if user.is_globally_banned(now) {
            return Err(EconomyError::AccountBanned);
        }
        let max = self.config.max_seat_count;

        let room = self.mutate_seats(room_id, |room| {
            seat_user(room, seat_index, &user, now, max)?;
            Ok(true)
        })?;

        info!(room = %room_id, seat = seat_index, user = %user.display_id, "seat taken");
        Ok(room)
    }

    pub fn leave_seat(&self, room_id: &RoomId, uid: &UserUid) -> Result<Room> {
        let user = self.require_user(uid)?;
        let room = self.mutate_seats(room_id, |room| Ok(unseat_user(room, &user)))?;
        info!(room = %room_id, user = %user.display_id, "seat left");
        Ok(room)
    }

    pub fn kick_user_from_seat(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        seat_index: usize,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        let room = self.mutate_seats(room_id, |room| {
            require_moderator(room, &actor)?;
            match room.seats.get_mut(seat_index) {
                Some(seat) if !seat.is_empty() => {
                    seat.vacate();
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        info!(room = %room_id, seat = seat_index, by = %actor.display_id, "seat kicked");
        Ok(room)
    }

    pub fn toggle_seat_lock(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        seat_index: usize,
        locked: bool,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        let max = self.config.max_seat_count;
        self.mutate_seats(room_id, |room| {
            require_moderator(room, &actor)?;
            ensure_seat(room, seat_index, max)?;
            room.seats[seat_index].is_locked = locked;
            Ok(true)
        })
    }

    pub fn toggle_seat_mute(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        seat_index: usize,
        muted: bool,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        let max = self.config.max_seat_count;
        self.mutate_seats(room_id, |room| {
            require_moderator(room, &actor)?;
            ensure_seat(room, seat_index, max)?;
            let seat = &mut room.seats[seat_index];
            // Mute only means something on an occupied seat.
            if seat.is_empty() {
                return Ok(false);
            }
            seat.is_muted = muted;
            Ok(true)
        })
    }

    /// Resize the audience to `seat_count` seats (plus the host seat).
    /// Shrinking drops the trailing seats together with their occupants.
    pub fn change_seat_count(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        seat_count: usize,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        let max = self.config.max_seat_count;
        if seat_count == 0 || seat_count > max {
            return Err(EconomyError::InvalidArgument(format!(
                "seat count must be between 1 and {max}"
            )));
        }
        let room = self.mutate_seats(room_id, |room| {
            if !gate::can_bypass_lock(room, &actor) {
                return Err(EconomyError::PermissionDenied(
                    "only the host may resize the room".into(),
                ));
            }
            room.seats.truncate(seat_count + 1);
            while room.seats.len() < seat_count + 1 {
                room.seats.push(Seat::empty(room.seats.len()));
            }
            room.seat_count = seat_count;
            Ok(true)
        })?;
        info!(room = %room_id, seat_count, "seat count changed");
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use majlis_shared::DisplayId;
    use std::sync::Arc;

    fn fixture() -> TestMajlis {
        let (majlis, _) = setup();
        seed_room(&majlis, &room_fixture("r1", "100000"));
        seed_user(&majlis, &user_fixture("host", "100000", 0));
        seed_user(&majlis, &user_fixture("alice", "111111", 0));
        seed_user(&majlis, &user_fixture("bob", "222222", 0));
        majlis
    }

    fn uid(s: &str) -> UserUid {
        UserUid::new(s)
    }

    #[test]
    fn test_take_then_leave_restores_canonical_seat() {
        let majlis = fixture();
        let rid = RoomId::new("r1");
        majlis.toggle_seat_lock(&rid, &uid("host"), 2, true).unwrap();

        let mut alice = user_fixture("alice", "111111", 0);
        alice.is_admin = true;
        alice.equipped_frame = "gold".into();
        seed_user(&majlis, &alice);

        let room = majlis.take_seat(&rid, 2, &uid("alice")).unwrap();
        let seat = &room.seats[2];
        assert_eq!(seat.user_id, Some(DisplayId("111111".into())));
        assert_eq!(seat.frame_id.as_deref(), Some("gold"));
        assert!(seat.is_locked);
        assert_invariants(&room);

        let room = majlis.leave_seat(&rid, &uid("alice")).unwrap();
        let mut expected = Seat::empty(2);
        expected.is_locked = true;
        assert_eq!(room.seats[2], expected);
        assert_invariants(&load_room(&majlis, "r1"));
    }

    #[test]
    fn test_moving_vacates_previous_seat() {
        let majlis = fixture();
        let rid = RoomId::new("r1");
        majlis.take_seat(&rid, 1, &uid("alice")).unwrap();
        let room = majlis.take_seat(&rid, 4, &uid("alice")).unwrap();
        assert!(room.seats[1].is_empty());
        assert_eq!(room.seats[4].user_id, Some(DisplayId("111111".into())));
        assert_invariants(&room);
    }

    #[test]
    fn test_occupied_and_locked_seats_are_refused() {
        let majlis = fixture();
        let rid = RoomId::new("r1");
        majlis.take_seat(&rid, 1, &uid("alice")).unwrap();

        let err = majlis.take_seat(&rid, 1, &uid("bob")).unwrap_err();
        assert!(matches!(err, EconomyError::SeatOccupied(1)));

        majlis.toggle_seat_lock(&rid, &uid("host"), 5, true).unwrap();
        let err = majlis.take_seat(&rid, 5, &uid("bob")).unwrap_err();
        assert!(matches!(err, EconomyError::SeatLocked(5)));

        // The host bypasses locks.
        majlis.take_seat(&rid, 5, &uid("host")).unwrap();
    }

    #[test]
    fn test_room_ban_blocks_take_seat() {
        let (majlis, _) = setup();
        let mut room = room_fixture("r1", "100000");
        room.banned_users
            .insert(DisplayId("111111".into()), majlis_shared::constants::PERMANENT_BAN);
        seed_room(&majlis, &room);
        seed_user(&majlis, &user_fixture("alice", "111111", 0));

        let err = majlis.take_seat(&RoomId::new("r1"), 1, &uid("alice")).unwrap_err();
        assert!(matches!(err, EconomyError::BannedFromRoom));
    }

    #[test]
    fn test_concurrent_take_seat_has_one_winner() {
        let (majlis, _) = setup();
        seed_room(&majlis, &room_fixture("r1", "100000"));
        let users: Vec<String> = (0..8).map(|i| format!("u{i}")).collect();
        for (i, u) in users.iter().enumerate() {
            seed_user(&majlis, &user_fixture(u, &format!("30000{i}"), 0));
        }

        let majlis = Arc::new(majlis);
        let handles: Vec<_> = users
            .iter()
            .cloned()
            .map(|u| {
                let majlis = Arc::clone(&majlis);
                std::thread::spawn(move || majlis.take_seat(&RoomId::new("r1"), 3, &UserUid::new(u)))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.kind(), crate::error::ErrorKind::Conflict, "{err}");
        }

        let room = majlis.get_room(&RoomId::new("r1")).unwrap().unwrap();
        assert!(room.seats[3].user_id.is_some());
        assert_invariants(&room);
    }

    #[test]
    fn test_kick_requires_moderator() {
        let majlis = fixture();
        let rid = RoomId::new("r1");
        majlis.take_seat(&rid, 1, &uid("alice")).unwrap();

        let err = majlis.kick_user_from_seat(&rid, &uid("bob"), 1).unwrap_err();
        assert!(matches!(err, EconomyError::PermissionDenied(_)));

        let room = majlis.kick_user_from_seat(&rid, &uid("host"), 1).unwrap();
        assert!(room.seats[1].is_empty());
    }

    #[test]
    fn test_lock_beyond_length_pads_seats() {
        let majlis = fixture();
        let rid = RoomId::new("r1");
        let room = majlis.toggle_seat_lock(&rid, &uid("host"), 13, true).unwrap();
        assert_eq!(room.seats.len(), 14);
        assert_eq!(room.seat_count, 13);
        assert!(room.seats[13].is_locked);
        assert_invariants(&room);

        let err = majlis.toggle_seat_lock(&rid, &uid("host"), 31, true).unwrap_err();
        assert!(matches!(err, EconomyError::SeatOutOfRange { .. }));
    }

    #[test]
    fn test_mute_applies_to_occupied_seat() {
        let majlis = fixture();
        let rid = RoomId::new("r1");
        majlis.take_seat(&rid, 2, &uid("alice")).unwrap();
        let room = majlis.toggle_seat_mute(&rid, &uid("host"), 2, true).unwrap();
        assert!(room.seats[2].is_muted);

        let room = majlis.toggle_seat_mute(&rid, &uid("host"), 3, true).unwrap();
        assert!(!room.seats[3].is_muted);
    }

    #[test]
    fn test_change_seat_count_grows_and_shrinks() {
        let majlis = fixture();
        let rid = RoomId::new("r1");
        let room = majlis.change_seat_count(&rid, &uid("host"), 15).unwrap();
        assert_eq!(room.seats.len(), 16);

        majlis.take_seat(&rid, 12, &uid("alice")).unwrap();
        let room = majlis.change_seat_count(&rid, &uid("host"), 10).unwrap();
        assert_eq!(room.seats.len(), 11);
        assert!(room.seat_of(&DisplayId("111111".into())).is_none());

        let err = majlis.change_seat_count(&rid, &uid("alice"), 12).unwrap_err();
        assert!(matches!(err, EconomyError::PermissionDenied(_)));
    }

    #[test]
    fn test_normalize_vacates_duplicates() {
        let mut seats = Room::empty_seats(3);
        for i in [1, 3] {
            seats[i].user_id = Some(DisplayId("111111".into()));
            seats[i].gift_count = 9;
        }
        seats[2].gift_count = 7;
        seats[2].user_name = Some("stale".into());
        normalize_seats(&mut seats);
        assert_eq!(seats[1].user_id, Some(DisplayId("111111".into())));
        assert_eq!(seats[2], Seat::empty(2));
        assert_eq!(seats[3], Seat::empty(3));
    }
}
