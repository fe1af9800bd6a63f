//! Platform administration.
//!
//! These operations trust their caller; the HTTP layer puts them behind the
//! admin token. Fleet-wide resets write in batches of at most
//! `MAX_BATCH_WRITES` and cover every matching document.

use serde::Deserialize;
use tracing::{info, warn};

use majlis_shared::constants::{
    AGENT_STARTING_BALANCE, DAY_MS, MAX_BATCH_WRITES, MAX_VIP_LEVEL, PERMANENT_BAN,
    WEEK_MS, WELCOME_BONUS_DIAMONDS, WELCOME_BONUS_VIP_LEVEL,
};
use majlis_shared::{
    AdminRole, Clock, DisplayId, RequestStatus, Room, RoomId, User, UserUid, WelcomeRequest,
};
use majlis_store::{
    new_doc_path, Direction, Document, DocumentStore, FieldUpdate, FilterOp, Query, WriteBatch,
};

use crate::error::{EconomyError, Result};
use crate::notify::system_notification;
use crate::paths;
use crate::service::Majlis;

/// Length of a global ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanDuration {
    Days(i64),
    Permanent,
    Lifted,
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    fn update_user(&self, uid: &UserUid, update: FieldUpdate) -> Result<()> {
        let path = paths::user(uid)?;
        if self.store.get(&path)?.is_none() {
            return Err(EconomyError::UserNotFound(uid.to_string()));
        }
        self.store.update(&path, update)?;
        Ok(())
    }

    /// Write to every document in `docs`, `chunk` documents per batch.
    fn batch_each<F>(&self, docs: &[Document], chunk: usize, mut f: F) -> Result<usize>
    where
        F: FnMut(&mut WriteBatch<'_, S>, &Document) -> Result<()>,
    {
        for part in docs.chunks(chunk.max(1)) {
            let mut batch = self.store.batch();
            for doc in part {
                f(&mut batch, doc)?;
            }
            batch.commit()?;
        }
        Ok(docs.len())
    }

    // -----------------------------------------------------------------------
    // Per-user
    // -----------------------------------------------------------------------

    pub fn set_global_ban(&self, uid: &UserUid, duration: BanDuration) -> Result<()> {
        let (banned, expires_at) = match duration {
            BanDuration::Days(days) if days <= 0 => return Err(EconomyError::InvalidAmount(days)),
            BanDuration::Days(days) => (true, self.expiry_after(days, DAY_MS)?),
            BanDuration::Permanent => (true, PERMANENT_BAN),
            BanDuration::Lifted => (false, 0),
        };
        self.update_user(
            uid,
            FieldUpdate::new()
                .set("is_banned", banned)?
                .set("ban_expires_at", expires_at)?,
        )?;
        info!(uid = %uid, ?duration, "global ban set");
        Ok(())
    }

    pub fn set_admin_role(&self, uid: &UserUid, role: Option<AdminRole>) -> Result<()> {
        self.update_user(
            uid,
            FieldUpdate::new()
                .set("is_admin", role.is_some())?
                .set("admin_role", role)?,
        )?;
        info!(uid = %uid, ?role, "admin role set");
        Ok(())
    }

    /// Grant VIP `level` for `days`, or permanently when `days` is `None`.
    /// Level 0 revokes VIP.
    pub fn set_vip(&self, uid: &UserUid, level: u8, days: Option<i64>) -> Result<()> {
        if level > MAX_VIP_LEVEL {
            return Err(EconomyError::InvalidArgument(format!(
                "vip level must be at most {MAX_VIP_LEVEL}"
            )));
        }
        let expires_at = match days {
            _ if level == 0 => 0,
            Some(d) if d <= 0 => return Err(EconomyError::InvalidAmount(d)),
            Some(d) => self.expiry_after(d, DAY_MS)?,
            None => 0,
        };
        self.update_user(
            uid,
            FieldUpdate::new()
                .set("vip", level > 0)?
                .set("vip_level", level)?
                .set("vip_expires_at", expires_at)?,
        )?;
        info!(uid = %uid, level, expires_at, "vip set");
        Ok(())
    }

    /// Promote or demote an agent. A fresh agent starts with the standard
    /// agency balance.
    pub fn set_agent(&self, uid: &UserUid, is_agent: bool) -> Result<()> {
        let path = paths::user(uid)?;
        self.store.transaction(|tx| -> Result<()> {
            let user: User = tx
                .get_as(&path)?
                .ok_or_else(|| EconomyError::UserNotFound(uid.to_string()))?;
            let mut update = FieldUpdate::new().set("is_agent", is_agent)?;
            if is_agent && !user.is_agent {
                update = update.set("agency_balance", AGENT_STARTING_BALANCE)?;
            }
            tx.update(&path, update);
            Ok(())
        })?;
        info!(uid = %uid, is_agent, "agent status set");
        Ok(())
    }

    pub fn top_up_agency(&self, uid: &UserUid, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(EconomyError::InvalidAmount(amount));
        }
        let path = paths::user(uid)?;
        self.store.transaction(|tx| -> Result<()> {
            let user: User = tx
                .get_as(&path)?
                .ok_or_else(|| EconomyError::UserNotFound(uid.to_string()))?;
            if !user.is_agent {
                return Err(EconomyError::InvalidArgument(format!("{uid} is not an agent")));
            }
            tx.update(&path, FieldUpdate::new().increment("agency_balance", amount));
            Ok(())
        })?;
        info!(uid = %uid, amount, "agency topped up");
        Ok(())
    }

    pub fn set_can_create_room(&self, uid: &UserUid, allowed: bool) -> Result<()> {
        self.update_user(uid, FieldUpdate::new().set("can_create_room", allowed)?)?;
        info!(uid = %uid, allowed, "room creation permission set");
        Ok(())
    }

    pub fn set_welcome_agent(&self, uid: &UserUid, enabled: bool) -> Result<()> {
        self.update_user(uid, FieldUpdate::new().set("is_welcome_agent", enabled)?)?;
        info!(uid = %uid, enabled, "welcome agent set");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Fleet-wide
    // -----------------------------------------------------------------------

    /// Start a fresh contributor cup in every room.
    pub fn reset_all_room_cups(&self) -> Result<usize> {
        let rooms = self.store.query(&Query::collection(paths::ROOMS)?)?;
        let now = self.now();
        let count = self.batch_each(&rooms, MAX_BATCH_WRITES, |batch, doc| {
            batch.update(
                &doc.path,
                FieldUpdate::new()
                    .set_value("contributors", serde_json::json!({}))
                    .set("cup_start_time", now)?,
            );
            Ok(())
        })?;
        info!(rooms = count, "room cups reset");
        Ok(count)
    }

    /// Clear every seat and viewer record, restoring the default layout.
    pub fn reset_all_ghost_users(&self) -> Result<usize> {
        let rooms = self.store.query(&Query::collection(paths::ROOMS)?)?;
        let seat_count = self.config.default_seat_count;
        let seats = Room::empty_seats(seat_count);

        let count = self.batch_each(&rooms, MAX_BATCH_WRITES, |batch, doc| {
            batch.update(
                &doc.path,
                FieldUpdate::new()
                    .set("seats", &seats)?
                    .set("seat_count", seat_count)?
                    .set("viewer_count", 0)?,
            );
            Ok(())
        })?;

        for doc in &rooms {
            let room_id = RoomId::new(doc.id());
            let viewers = self.store.query(&Query::collection(&paths::viewers(&room_id))?)?;
            self.batch_each(&viewers, MAX_BATCH_WRITES, |batch, viewer| {
                batch.delete(&viewer.path);
                Ok(())
            })?;
        }
        info!(rooms = count, "ghost users cleared");
        Ok(count)
    }

    pub fn reset_all_users_coins(&self) -> Result<usize> {
        let users = self.store.query(&Query::collection(paths::USERS)?)?;
        let count = self.batch_each(&users, MAX_BATCH_WRITES, |batch, doc| {
            batch.update(&doc.path, FieldUpdate::new().set("wallet.coins", 0)?);
            Ok(())
        })?;
        info!(users = count, "all coins reset");
        Ok(count)
    }

    /// Re-key rooms whose id or display id drifted from the host's display id.
    pub fn sync_room_ids_with_host_ids(&self) -> Result<usize> {
        let rooms = self.store.query(&Query::collection(paths::ROOMS)?)?;
        let mut synced = 0;
        for doc in rooms {
            let mut room: Room = doc.decode()?;
            let host_key = RoomId::new(room.host_id.as_str());
            if room.id == host_key && room.display_id == room.host_id && doc.id() == host_key.as_str() {
                continue;
            }
            let target = paths::room(&host_key)?;
            if target != doc.path && self.store.get(&target)?.is_some() {
                warn!(room = %doc.path, host = %room.host_id, "host already has a room, skipping");
                continue;
            }

            room.id = host_key;
            room.display_id = room.host_id.clone();
            let mut batch = self.store.batch();
            batch.set(&target, &room)?;
            if target != doc.path {
                batch.delete(&doc.path);
            }
            batch.commit()?;
            synced += 1;
        }
        info!(rooms = synced, "room ids synced with hosts");
        Ok(synced)
    }

    pub fn delete_all_rooms(&self) -> Result<usize> {
        let rooms = self.store.query(&Query::collection(paths::ROOMS)?)?;
        for doc in &rooms {
            self.purge_room(&RoomId::new(doc.id()))?;
        }
        info!(rooms = rooms.len(), "all rooms deleted");
        Ok(rooms.len())
    }

    // -----------------------------------------------------------------------
    // Welcome agency
    // -----------------------------------------------------------------------

    /// A welcome agent asks for the welcome bonus on behalf of `target`.
    pub fn submit_welcome_request(
        &self,
        agent_uid: &UserUid,
        target: &DisplayId,
    ) -> Result<WelcomeRequest> {
        let agent = self.require_user(agent_uid)?;
        if !agent.is_welcome_agent && !agent.is_admin {
            return Err(EconomyError::PermissionDenied(
                "only welcome agents may submit requests".into(),
            ));
        }
        if self.find_user_by_display_id(target)?.is_none() {
            return Err(EconomyError::TargetNotFound(target.clone()));
        }

        let path = new_doc_path(paths::WELCOME_REQUESTS)?;
        let request = WelcomeRequest {
            id: path.id().to_string(),
            agent_id: agent.uid.clone(),
            agent_name: agent.name.clone(),
            target_display_id: target.clone(),
            status: RequestStatus::Pending,
            timestamp: self.now(),
        };
        self.store.set(&path, &request)?;
        info!(request = %request.id, agent = %agent.display_id, target = %target, "welcome request submitted");
        Ok(request)
    }

    /// Grant the welcome bonus. The request status, VIP grant, diamonds and
    /// notification commit together.
    pub fn approve_welcome_request(&self, request_id: &str) -> Result<()> {
        let request_path = paths::welcome_request(request_id)?;
        let request: WelcomeRequest = self
            .store
            .get_as(&request_path)?
            .ok_or_else(|| EconomyError::RequestNotFound(request_id.to_string()))?;
        let target = self
            .find_user_by_display_id(&request.target_display_id)?
            .ok_or_else(|| EconomyError::TargetNotFound(request.target_display_id.clone()))?;
        let user_path = paths::user(&target.uid)?;
        let now = self.now();

        self.store.transaction(|tx| -> Result<()> {
            let request: WelcomeRequest = tx
                .get_as(&request_path)?
                .ok_or_else(|| EconomyError::RequestNotFound(request_id.to_string()))?;
            if request.status != RequestStatus::Pending {
                return Err(EconomyError::InvalidArgument(format!(
                    "welcome request {request_id} is not pending"
                )));
            }
            if tx.get(&user_path)?.is_none() {
                return Err(EconomyError::TargetNotFound(request.target_display_id.clone()));
            }

            tx.update(
                &request_path,
                FieldUpdate::new().set("status", RequestStatus::Approved)?,
            );
            tx.update(
                &user_path,
                FieldUpdate::new()
                    .set("vip", true)?
                    .set("vip_level", WELCOME_BONUS_VIP_LEVEL)?
                    .set("vip_expires_at", now + WEEK_MS)?
                    .increment("wallet.diamonds", WELCOME_BONUS_DIAMONDS),
            );
            let note_path = new_doc_path(&paths::notifications(&target.uid))?;
            tx.set(
                &note_path,
                &system_notification(
                    note_path.id(),
                    "Welcome",
                    "You received VIP and a diamond bonus from our welcome agency.",
                    now,
                ),
            )?;
            Ok(())
        })?;

        info!(request = %request_id, target = %request.target_display_id, "welcome request approved");
        Ok(())
    }

    pub fn reject_welcome_request(&self, request_id: &str) -> Result<()> {
        let path = paths::welcome_request(request_id)?;
        self.store.transaction(|tx| -> Result<()> {
            let request: WelcomeRequest = tx
                .get_as(&path)?
                .ok_or_else(|| EconomyError::RequestNotFound(request_id.to_string()))?;
            if request.status != RequestStatus::Pending {
                return Err(EconomyError::InvalidArgument(format!(
                    "welcome request {request_id} is not pending"
                )));
            }
            tx.update(&path, FieldUpdate::new().set("status", RequestStatus::Rejected)?);
            Ok(())
        })?;
        info!(request = %request_id, "welcome request rejected");
        Ok(())
    }

    /// Pending requests, newest first.
    pub fn pending_welcome_requests(&self) -> Result<Vec<WelcomeRequest>> {
        let query = Query::collection(paths::WELCOME_REQUESTS)?
            .filter("status", FilterOp::Eq, RequestStatus::Pending)?
            .order_by("timestamp", Direction::Descending);
        self.store
            .query(&query)?
            .iter()
            .map(|doc| Ok(doc.decode()?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use majlis_shared::NotificationKind;

    fn uid(s: &str) -> UserUid {
        UserUid::new(s)
    }

    #[test]
    fn test_global_ban_lifecycle() {
        let (majlis, clock) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 0));

        majlis.set_global_ban(&uid("u1"), BanDuration::Days(1)).unwrap();
        let user = load_user(&majlis, "u1");
        assert!(user.is_globally_banned(clock.now_ms()));
        clock.advance(DAY_MS + 1);
        assert!(!load_user(&majlis, "u1").is_globally_banned(clock.now_ms()));

        majlis.set_global_ban(&uid("u1"), BanDuration::Permanent).unwrap();
        assert_eq!(load_user(&majlis, "u1").ban_expires_at, PERMANENT_BAN);
        majlis.set_global_ban(&uid("u1"), BanDuration::Lifted).unwrap();
        assert!(!load_user(&majlis, "u1").is_banned);

        assert!(majlis.set_global_ban(&uid("nobody"), BanDuration::Permanent).is_err());
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 0));
        let before = load_user(&majlis, "u1");

        let err = majlis
            .set_global_ban(&uid("u1"), BanDuration::Days(i64::MAX))
            .unwrap_err();
        assert!(matches!(err, EconomyError::InvalidAmount(i64::MAX)));
        let err = majlis.set_vip(&uid("u1"), 3, Some(i64::MAX / 1_000)).unwrap_err();
        assert!(matches!(err, EconomyError::InvalidAmount(_)));

        assert_eq!(load_user(&majlis, "u1"), before);
    }

    #[test]
    fn test_roles_vip_and_agents() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 0));

        majlis.set_admin_role(&uid("u1"), Some(AdminRole::SuperAdmin)).unwrap();
        let user = load_user(&majlis, "u1");
        assert!(user.is_admin);
        assert_eq!(user.admin_role, Some(AdminRole::SuperAdmin));

        majlis.set_vip(&uid("u1"), 3, Some(2)).unwrap();
        let user = load_user(&majlis, "u1");
        assert_eq!(user.vip_level, 3);
        assert_eq!(user.vip_expires_at, T0 + 2 * DAY_MS);
        assert!(majlis.set_vip(&uid("u1"), 6, None).is_err());

        majlis.set_agent(&uid("u1"), true).unwrap();
        majlis.top_up_agency(&uid("u1"), 5).unwrap();
        assert_eq!(load_user(&majlis, "u1").agency_balance, AGENT_STARTING_BALANCE + 5);
        // Re-promoting keeps the current balance.
        majlis.set_agent(&uid("u1"), true).unwrap();
        assert_eq!(load_user(&majlis, "u1").agency_balance, AGENT_STARTING_BALANCE + 5);
    }

    #[test]
    fn test_fleet_resets_cover_every_document() {
        let (majlis, clock) = setup();
        for i in 0..(MAX_BATCH_WRITES + 3) {
            let mut user = user_fixture(&format!("u{i}"), &format!("{:06}", 100_000 + i), 0);
            user.wallet.coins = 7;
            seed_user(&majlis, &user);
        }
        assert_eq!(majlis.reset_all_users_coins().unwrap(), MAX_BATCH_WRITES + 3);
        let last = format!("u{}", MAX_BATCH_WRITES + 2);
        assert_eq!(load_user(&majlis, &last).wallet.coins, 0);

        let mut room = room_fixture("r1", "100000");
        room.contributors.insert(
            uid("u1"),
            majlis_shared::Contributor {
                user_id: DisplayId("100001".into()),
                name: "x".into(),
                avatar: String::new(),
                amount: 9,
            },
        );
        room.seats[1].user_id = Some(DisplayId("100001".into()));
        room.viewer_count = 4;
        seed_room(&majlis, &room);
        majlis.enter_room(&RoomId::new("r1"), &uid("u2")).unwrap();

        clock.advance(5);
        assert_eq!(majlis.reset_all_room_cups().unwrap(), 1);
        let room = load_room(&majlis, "r1");
        assert!(room.contributors.is_empty());
        assert_eq!(room.cup_start_time, T0 + 5);

        majlis.reset_all_ghost_users().unwrap();
        let room = load_room(&majlis, "r1");
        assert_eq!(room.viewer_count, 0);
        assert!(room.seats.iter().all(|s| s.is_empty()));
        assert_eq!(room.seats.len(), 11);
        assert!(majlis
            .store()
            .get(&paths::viewer(&RoomId::new("r1"), &uid("u2")).unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sync_and_delete_rooms() {
        let (majlis, _) = setup();
        seed_room(&majlis, &room_fixture("legacy", "100000"));
        seed_room(&majlis, &room_fixture("222222", "222222"));

        assert_eq!(majlis.sync_room_ids_with_host_ids().unwrap(), 1);
        assert!(majlis.get_room(&RoomId::new("legacy")).unwrap().is_none());
        let moved = load_room(&majlis, "100000");
        assert_eq!(moved.id, RoomId::new("100000"));

        assert_eq!(majlis.delete_all_rooms().unwrap(), 2);
        assert!(majlis.list_rooms().unwrap().is_empty());
    }

    #[test]
    fn test_welcome_flow() {
        let (majlis, _) = setup();
        let mut agent = user_fixture("agent", "111111", 0);
        agent.is_welcome_agent = true;
        seed_user(&majlis, &agent);
        seed_user(&majlis, &user_fixture("newbie", "222222", 10));
        seed_user(&majlis, &user_fixture("other", "333333", 0));

        let denied = majlis.submit_welcome_request(&uid("other"), &DisplayId("222222".into()));
        assert!(matches!(denied, Err(EconomyError::PermissionDenied(_))));

        let request = majlis
            .submit_welcome_request(&uid("agent"), &DisplayId("222222".into()))
            .unwrap();
        assert_eq!(majlis.pending_welcome_requests().unwrap().len(), 1);

        majlis.approve_welcome_request(&request.id).unwrap();
        let newbie = load_user(&majlis, "newbie");
        assert_eq!(newbie.wallet.diamonds, 10 + WELCOME_BONUS_DIAMONDS);
        assert_eq!(newbie.vip_level, WELCOME_BONUS_VIP_LEVEL);
        assert_eq!(newbie.vip_expires_at, T0 + WEEK_MS);
        let notes = majlis
            .list_notifications(&uid("newbie"), NotificationKind::System)
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert!(majlis.pending_welcome_requests().unwrap().is_empty());

        // A second approval must not pay twice.
        assert!(majlis.approve_welcome_request(&request.id).is_err());
        assert_eq!(
            load_user(&majlis, "newbie").wallet.diamonds,
            10 + WELCOME_BONUS_DIAMONDS
        );

        let second = majlis
            .submit_welcome_request(&uid("agent"), &DisplayId("333333".into()))
            .unwrap();
        majlis.reject_welcome_request(&second.id).unwrap();
        assert!(majlis.approve_welcome_request(&second.id).is_err());
    }
}
