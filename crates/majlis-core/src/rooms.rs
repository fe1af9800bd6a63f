//! Room lifecycle, presence and room-level moderation.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::{debug, info};

use majlis_shared::constants::{
    DEFAULT_GAME_LUCK, DEFAULT_HOOK_THRESHOLD, MAX_BATCH_WRITES, MINUTE_MS, PERMANENT_BAN,
};
use majlis_shared::{Clock, DisplayId, GameMode, Room, RoomId, User, UserUid, Viewer};
use majlis_store::{
    Direction, DocumentStore, FieldUpdate, FilterOp, Query, Subscription, WatchTarget,
};

use crate::error::{EconomyError, Result};
use crate::gate;
use crate::paths;
use crate::seats::{normalize_room, seats_update, unseat_user};
use crate::service::Majlis;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoom {
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GameConfig {
    pub game_luck: u8,
    pub game_mode: GameMode,
    pub hook_threshold: i64,
}

/// Platform flags. `None` leaves a flag unchanged.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RoomFlags {
    pub is_hot: Option<bool>,
    pub is_official: Option<bool>,
    pub is_activities: Option<bool>,
    pub is_banned: Option<bool>,
}

fn viewer_record(user: &User, now: i64) -> Viewer {
    Viewer {
        uid: user.uid.clone(),
        display_id: user.display_id.clone(),
        name: user.name.clone(),
        avatar: user.avatar.clone(),
        admin_role: user.admin_role,
        vip_level: user.effective_vip_level(now),
        equipped_frame: user.frame(),
        timestamp: now,
    }
}

fn require_owner(room: &Room, actor: &User) -> Result<()> {
    if gate::can_bypass_lock(room, actor) {
        Ok(())
    } else {
        Err(EconomyError::PermissionDenied(
            "only the host may manage this room".into(),
        ))
    }
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    /// Create the host's room. Rooms are keyed by the host's display id.
    pub fn create_room(&self, host_uid: &UserUid, draft: NewRoom) -> Result<Room> {
        let host = self.require_user(host_uid)?;
        if !host.can_create_room && !host.is_admin {
            return Err(EconomyError::PermissionDenied(
                "user may not create rooms".into(),
            ));
        }
        let now = self.now();
        let seat_count = self.config.default_seat_count;
        let room = Room {
            id: RoomId::new(host.display_id.as_str()),
            display_id: host.display_id.clone(),
            title: draft.title,
            host_id: host.display_id.clone(),
            host_name: host.name.clone(),
            host_avatar: host.avatar.clone(),
            thumbnail: draft.thumbnail,
            seat_count,
            seats: Room::empty_seats(seat_count),
            contributors: BTreeMap::new(),
            cup_start_time: now,
            room_wealth: 0,
            banned_users: BTreeMap::new(),
            admins: BTreeSet::new(),
            viewer_count: 0,
            is_banned: false,
            is_hot: false,
            is_official: false,
            is_activities: false,
            game_luck: DEFAULT_GAME_LUCK,
            game_mode: GameMode::default(),
            hook_threshold: DEFAULT_HOOK_THRESHOLD,
            created_at: now,
        };

        let path = paths::room(&room.id)?;
        self.store.transaction(|tx| -> Result<()> {
            if tx.get(&path)?.is_some() {
                return Err(EconomyError::InvalidArgument(format!(
                    "room {} already exists",
                    room.id
                )));
            }
            tx.set(&path, &room)?;
            Ok(())
        })?;

        info!(room = %room.id, host = %host.display_id, "room created");
        Ok(room)
    }

    /// Every room, busiest first.
    pub fn list_rooms(&self) -> Result<Vec<Room>> {
        let query =
            Query::collection(paths::ROOMS)?.order_by("viewer_count", Direction::Descending);
        self.store
            .query(&query)?
            .iter()
            .map(|doc| Ok(doc.decode()?))
            .collect()
    }

    pub fn rooms_by_host(&self, host: &DisplayId) -> Result<Vec<Room>> {
        let query = Query::collection(paths::ROOMS)?.filter("host_id", FilterOp::Eq, host)?;
        self.store
            .query(&query)?
            .iter()
            .map(|doc| Ok(doc.decode()?))
            .collect()
    }

    /// Register `uid` as a viewer. Re-entering refreshes the viewer record
    /// without counting twice.
    pub fn enter_room(&self, room_id: &RoomId, uid: &UserUid) -> Result<Room> {
        let user = self.require_user(uid)?;
        let room_path = paths::room(room_id)?;
        let viewer_path = paths::viewer(room_id, uid)?;
        let now = self.now();

        let room = self.store.transaction(|tx| -> Result<Room> {
            let mut room: Room = tx
                .get_as(&room_path)?
                .ok_or_else(|| EconomyError::RoomNotFound(room_id.clone()))?;
            if let Some(reason) = gate::can_enter_room(&room, &user, now).reason {
                return Err(reason.into_error(0));
            }
            if tx.get(&viewer_path)?.is_none() {
                tx.update(&room_path, FieldUpdate::new().increment("viewer_count", 1));
                room.viewer_count += 1;
            }
            tx.set(&viewer_path, &viewer_record(&user, now))?;
            Ok(room)
        })?;

        debug!(room = %room_id, uid = %uid, viewers = room.viewer_count, "room entered");
        Ok(room)
    }

    /// Drop `uid` from the viewers and from any seat they hold.
    pub fn exit_room(&self, room_id: &RoomId, uid: &UserUid) -> Result<Room> {
        let user = self.get_user(uid)?;
        let room_path = paths::room(room_id)?;
        let viewer_path = paths::viewer(room_id, uid)?;

        let room = self.store.transaction(|tx| -> Result<Room> {
            let mut room: Room = tx
                .get_as(&room_path)?
                .ok_or_else(|| EconomyError::RoomNotFound(room_id.clone()))?;
            normalize_room(&mut room);

            let mut update = FieldUpdate::new();
            if tx.get(&viewer_path)?.is_some() {
                tx.delete(&viewer_path);
                room.viewer_count = (room.viewer_count - 1).max(0);
                update = update.set("viewer_count", room.viewer_count)?;
            }
            if let Some(user) = &user {
                if unseat_user(&mut room, user) {
                    update = update.set("seats", &room.seats)?;
                }
            }
            tx.update(&room_path, update);
            Ok(room)
        })?;

        debug!(room = %room_id, uid = %uid, viewers = room.viewer_count, "room exited");
        Ok(room)
    }

    /// Ban `target` from the room for `minutes`, or permanently when `None`.
    /// The target is unseated and removed from the viewers.
    pub fn ban_user_from_room(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        target: &DisplayId,
        minutes: Option<i64>,
    ) -> Result<Room> {
        if let Some(m) = minutes {
            if m <= 0 {
                return Err(EconomyError::InvalidAmount(m));
            }
        }
        let actor = self.require_user(actor)?;
        let target_user = self.find_user_by_display_id(target)?;
        let room_path = paths::room(room_id)?;
        let viewer_path = match &target_user {
            Some(user) => Some(paths::viewer(room_id, &user.uid)?),
            None => None,
        };
        let expiry = match minutes {
            Some(m) => self.expiry_after(m, MINUTE_MS)?,
            None => PERMANENT_BAN,
        };

        let room = self.store.transaction(|tx| -> Result<Room> {
            let mut room: Room = tx
                .get_as(&room_path)?
                .ok_or_else(|| EconomyError::RoomNotFound(room_id.clone()))?;
            if !gate::can_moderate(&room, &actor) {
                return Err(EconomyError::PermissionDenied(
                    "only the host or a room admin may ban".into(),
                ));
            }
            if room.is_host(target) {
                return Err(EconomyError::PermissionDenied(
                    "the host cannot be banned from their own room".into(),
                ));
            }
            normalize_room(&mut room);
            room.banned_users.insert(target.clone(), expiry);
            for seat in room.seats.iter_mut() {
                if seat.user_id.as_ref() == Some(target) {
                    seat.vacate();
                }
            }
            if let Some(viewer_path) = &viewer_path {
                if tx.get(viewer_path)?.is_some() {
                    tx.delete(viewer_path);
                    room.viewer_count = (room.viewer_count - 1).max(0);
                }
            }
            tx.update(
                &room_path,
                seats_update(&room)?
                    .set("banned_users", &room.banned_users)?
                    .set("viewer_count", room.viewer_count)?,
            );
            Ok(room)
        })?;

        info!(
            room = %room_id,
            target = %target,
            expiry,
            by = %actor.display_id,
            "user banned from room"
        );
        Ok(room)
    }

    pub fn unban_user_from_room(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        target: &DisplayId,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        let room = self.mutate_room(room_id, |room| {
            if !gate::can_moderate(room, &actor) {
                return Err(EconomyError::PermissionDenied(
                    "only the host or a room admin may unban".into(),
                ));
            }
            room.banned_users.remove(target);
            Ok(FieldUpdate::new().set("banned_users", &room.banned_users)?)
        })?;
        info!(room = %room_id, target = %target, "user unbanned from room");
        Ok(room)
    }

    pub fn add_room_admin(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        target: &DisplayId,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        self.mutate_room(room_id, |room| {
            require_owner(room, &actor)?;
            room.admins.insert(target.clone());
            Ok(FieldUpdate::new().set("admins", &room.admins)?)
        })
    }

    pub fn remove_room_admin(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        target: &DisplayId,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        self.mutate_room(room_id, |room| {
            require_owner(room, &actor)?;
            room.admins.remove(target);
            Ok(FieldUpdate::new().set("admins", &room.admins)?)
        })
    }

    /// Gameplay tuning. Platform admins only.
    pub fn update_game_config(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        config: GameConfig,
    ) -> Result<Room> {
        let actor = self.require_user(actor)?;
        if !actor.is_admin {
            return Err(EconomyError::PermissionDenied(
                "only platform admins may tune games".into(),
            ));
        }
        if config.game_luck > 100 {
            return Err(EconomyError::InvalidArgument(
                "game luck must be a percentage".into(),
            ));
        }
        if config.hook_threshold < 0 {
            return Err(EconomyError::InvalidAmount(config.hook_threshold));
        }
        let room = self.mutate_room(room_id, |room| {
            room.game_luck = config.game_luck;
            room.game_mode = config.game_mode;
            room.hook_threshold = config.hook_threshold;
            Ok(FieldUpdate::new()
                .set("game_luck", config.game_luck)?
                .set("game_mode", config.game_mode)?
                .set("hook_threshold", config.hook_threshold)?)
        })?;
        info!(room = %room_id, mode = ?config.game_mode, luck = config.game_luck, "game config updated");
        Ok(room)
    }

    /// Platform flags. Callers are trusted.
    pub fn set_room_flags(&self, room_id: &RoomId, flags: RoomFlags) -> Result<Room> {
        let room = self.mutate_room(room_id, |room| {
            let mut update = FieldUpdate::new();
            for (field, value, slot) in [
                ("is_hot", flags.is_hot, &mut room.is_hot),
                ("is_official", flags.is_official, &mut room.is_official),
                ("is_activities", flags.is_activities, &mut room.is_activities),
                ("is_banned", flags.is_banned, &mut room.is_banned),
            ] {
                if let Some(value) = value {
                    *slot = value;
                    update = update.set(field, value)?;
                }
            }
            Ok(update)
        })?;
        info!(room = %room_id, ?flags, "room flags set");
        Ok(room)
    }

    /// Delete the room together with its viewer records.
    pub fn delete_room(&self, room_id: &RoomId, actor: &UserUid) -> Result<()> {
        let actor = self.require_user(actor)?;
        let room = self.require_room(room_id)?;
        require_owner(&room, &actor)?;
        self.purge_room(room_id)?;
        info!(room = %room_id, by = %actor.display_id, "room deleted");
        Ok(())
    }

    pub(crate) fn purge_room(&self, room_id: &RoomId) -> Result<()> {
        let viewers = self.store.query(&Query::collection(&paths::viewers(room_id))?)?;
        for chunk in viewers.chunks(MAX_BATCH_WRITES) {
            let mut batch = self.store.batch();
            for doc in chunk {
                batch.delete(&doc.path);
            }
            batch.commit()?;
        }
        self.store.delete(&paths::room(room_id)?)?;
        Ok(())
    }

    /// Watch a room. Dropping the subscription releases the listener.
    pub fn listen_to_room(&self, room_id: &RoomId) -> Result<Subscription> {
        Ok(self
            .store
            .subscribe(WatchTarget::Document(paths::room(room_id)?))?)
    }

    /// Read-modify-write room fields in one transaction. `f` returns the
    /// field update to commit; an empty update writes nothing.
    fn mutate_room<F>(&self, room_id: &RoomId, mut f: F) -> Result<Room>
    where
        F: FnMut(&mut Room) -> Result<FieldUpdate>,
    {
        let path = paths::room(room_id)?;
        self.store.transaction(|tx| {
            let mut room: Room = tx
                .get_as(&path)?
                .ok_or_else(|| EconomyError::RoomNotFound(room_id.clone()))?;
            let update = f(&mut room)?;
            tx.update(&path, update);
            Ok(room)
        })
    }
}
