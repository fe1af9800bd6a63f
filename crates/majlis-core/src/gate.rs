//! Membership and ban checks.
//!
//! These are pure functions of the room, the user and the current time. Room
//! bans are evaluated against `now` at check time; elapsed entries are
//! treated as expired but never swept here.

use serde::Serialize;

use majlis_shared::constants::PERMANENT_BAN;
use majlis_shared::{Clock, Room, RoomId, User, UserUid};
use majlis_store::DocumentStore;

use crate::error::{EconomyError, Result};
use crate::service::Majlis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    BannedFromRoom,
    SeatLocked,
    AccountBanned,
    RoomBanned,
}

impl DenyReason {
    pub fn into_error(self, seat_index: usize) -> EconomyError {
        match self {
            DenyReason::BannedFromRoom => EconomyError::BannedFromRoom,
            DenyReason::SeatLocked => EconomyError::SeatLocked(seat_index),
            DenyReason::AccountBanned => EconomyError::AccountBanned,
            DenyReason::RoomBanned => EconomyError::RoomBanned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allow: bool,
    pub reason: Option<DenyReason>,
}

impl GateDecision {
    pub const ALLOW: GateDecision = GateDecision {
        allow: true,
        reason: None,
    };

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allow: false,
            reason: Some(reason),
        }
    }
}

/// Whether `user` currently holds an active ban in `room`.
pub fn is_banned_from_room(room: &Room, user: &User, now: i64) -> bool {
    match room.banned_users.get(&user.display_id) {
        Some(&expiry) => expiry == PERMANENT_BAN || expiry > now,
        None => false,
    }
}

/// Platform admins and the room host bypass seat locks.
pub fn can_bypass_lock(room: &Room, user: &User) -> bool {
    user.is_admin || room.is_host(&user.display_id)
}

/// Platform admins, the host and room admins may moderate seats.
pub fn can_moderate(room: &Room, user: &User) -> bool {
    user.is_admin || room.is_host(&user.display_id) || room.is_room_admin(&user.display_id)
}

pub fn can_occupy_seat(room: &Room, user: &User, seat_index: usize, now: i64) -> GateDecision {
    if is_banned_from_room(room, user, now) {
        return GateDecision::deny(DenyReason::BannedFromRoom);
    }
    let locked = room
        .seats
        .get(seat_index)
        .map(|s| s.is_locked)
        .unwrap_or(false);
    if locked && !can_bypass_lock(room, user) {
        return GateDecision::deny(DenyReason::SeatLocked);
    }
    GateDecision::ALLOW
}

pub fn can_enter_room(room: &Room, user: &User, now: i64) -> GateDecision {
    if room.is_banned && !user.is_admin {
        return GateDecision::deny(DenyReason::RoomBanned);
    }
    if user.is_globally_banned(now) {
        return GateDecision::deny(DenyReason::AccountBanned);
    }
    if is_banned_from_room(room, user, now) {
        return GateDecision::deny(DenyReason::BannedFromRoom);
    }
    GateDecision::ALLOW
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    /// Whether `uid` may enter `room_id` right now.
    pub fn entry_decision(&self, room_id: &RoomId, uid: &UserUid) -> Result<GateDecision> {
        let room = self.require_room(room_id)?;
        let user = self.require_user(uid)?;
        Ok(can_enter_room(&room, &user, self.now()))
    }

    /// Whether `uid` may sit in seat `seat_index` of `room_id` right now.
    pub fn seat_decision(
        &self,
        room_id: &RoomId,
        uid: &UserUid,
        seat_index: usize,
    ) -> Result<GateDecision> {
        let room = self.require_room(room_id)?;
        let user = self.require_user(uid)?;
        Ok(can_occupy_seat(&room, &user, seat_index, self.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{room_fixture, seed_room, seed_user, setup, user_fixture, T0};
    use majlis_shared::DisplayId;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_permanent_room_ban_denies() {
        let mut room = room_fixture("r1", "100000");
        let user = user_fixture("u1", "111111", 0);
        room.banned_users.insert(user.display_id.clone(), PERMANENT_BAN);

        let decision = can_occupy_seat(&room, &user, 1, NOW);
        assert!(!decision.allow);
        assert_eq!(decision.reason, Some(DenyReason::BannedFromRoom));
    }

    #[test]
    fn test_future_room_ban_denies_and_elapsed_allows() {
        let mut room = room_fixture("r1", "100000");
        let user = user_fixture("u1", "111111", 0);

        room.banned_users.insert(user.display_id.clone(), NOW + 1);
        assert!(!can_occupy_seat(&room, &user, 1, NOW).allow);

        room.banned_users.insert(user.display_id.clone(), NOW);
        assert!(can_occupy_seat(&room, &user, 1, NOW).allow);
        // The stale entry stays until explicitly cleared.
        assert!(room.banned_users.contains_key(&user.display_id));
    }

    #[test]
    fn test_absent_ban_allows() {
        let room = room_fixture("r1", "100000");
        let user = user_fixture("u1", "111111", 0);
        assert_eq!(can_occupy_seat(&room, &user, 2, NOW), GateDecision::ALLOW);
    }

    #[test]
    fn test_locked_seat_only_for_admin_or_host() {
        let mut room = room_fixture("r1", "100000");
        room.seats[3].is_locked = true;

        let guest = user_fixture("u1", "111111", 0);
        let decision = can_occupy_seat(&room, &guest, 3, NOW);
        assert_eq!(decision.reason, Some(DenyReason::SeatLocked));

        let host = user_fixture("h", "100000", 0);
        assert!(can_occupy_seat(&room, &host, 3, NOW).allow);

        let mut admin = user_fixture("a", "222222", 0);
        admin.is_admin = true;
        assert!(can_occupy_seat(&room, &admin, 3, NOW).allow);
    }

    #[test]
    fn test_enter_room_checks_global_and_room_bans() {
        let mut room = room_fixture("r1", "100000");
        let mut user = user_fixture("u1", "111111", 0);
        assert!(can_enter_room(&room, &user, NOW).allow);

        user.is_banned = true;
        user.ban_expires_at = NOW + 1000;
        assert_eq!(
            can_enter_room(&room, &user, NOW).reason,
            Some(DenyReason::AccountBanned)
        );
        user.ban_expires_at = NOW - 1;
        assert!(can_enter_room(&room, &user, NOW).allow);

        room.is_banned = true;
        assert_eq!(
            can_enter_room(&room, &user, NOW).reason,
            Some(DenyReason::RoomBanned)
        );
    }

    #[test]
    fn test_decisions_read_current_documents() {
        let (majlis, clock) = setup();
        let mut room = room_fixture("r1", "100000");
        room.banned_users.insert(DisplayId("111111".into()), T0 + 500);
        seed_room(&majlis, &room);
        seed_user(&majlis, &user_fixture("u1", "111111", 0));

        let rid = RoomId::new("r1");
        let uid = UserUid::new("u1");
        assert!(!majlis.entry_decision(&rid, &uid).unwrap().allow);
        assert!(!majlis.seat_decision(&rid, &uid, 1).unwrap().allow);

        clock.advance(501);
        assert!(majlis.entry_decision(&rid, &uid).unwrap().allow);
        assert!(majlis.entry_decision(&RoomId::new("nope"), &uid).is_err());
    }
}
