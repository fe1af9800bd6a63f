//! Account profiles and the per-device account limiter.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, info, warn};

use majlis_shared::{Clock, DeviceRegistration, DisplayId, User, UserUid, Wallet};
use majlis_store::{DocumentStore, FieldUpdate, Subscription, WatchTarget};

use crate::error::{EconomyError, Result};
use crate::paths;
use crate::service::Majlis;

/// Attempts at drawing an unused display id before giving up.
const DISPLAY_ID_ATTEMPTS: usize = 20;

/// How many accounts one device installation may create.
///
/// The per-device counter itself lives under `devices/{deviceId}` and is
/// checked and bumped in the same transaction that creates the profile.
pub trait DevicePolicy: Send + Sync {
    fn limit(&self, device_id: &str) -> u32;
}

/// The same limit for every device.
#[derive(Debug, Clone, Copy)]
pub struct FixedDeviceLimit(pub u32);

impl DevicePolicy for FixedDeviceLimit {
    fn limit(&self, _device_id: &str) -> u32 {
        self.0
    }
}

/// Caller-supplied profile fields for a new account.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    /// Create the profile for `uid`, or return it if it already exists.
    pub fn create_user_profile(
        &self,
        uid: &UserUid,
        device_id: Option<&str>,
        draft: NewUser,
    ) -> Result<User> {
        let path = paths::user(uid)?;
        if let Some(existing) = self.store.get_as::<User>(&path)? {
            return Ok(existing);
        }

        let device = match device_id {
            Some(id) => Some((id, paths::device(id)?, self.devices.limit(id))),
            None => None,
        };

        let display_id = self.allocate_display_id()?;
        let now = self.now();
        let user = User {
            uid: uid.clone(),
            display_id,
            name: draft.name,
            avatar: draft.avatar,
            email: draft.email,
            level: 1,
            wallet: Wallet::default(),
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
            can_create_room: false,
            is_agent: false,
            agency_balance: 0,
            is_welcome_agent: false,
            daily_profit: 0,
            last_daily_reset: now,
            inventory: BTreeMap::new(),
            equipped_frame: String::new(),
            equipped_bubble: String::new(),
            equipped_entry: String::new(),
            created_at: now,
        };

        let (user, created) = self.store.transaction(|tx| {
            if let Some(existing) = tx.get_as::<User>(&path)? {
                return Ok::<_, EconomyError>((existing, false));
            }
            if let Some((device_id, device_path, limit)) = &device {
                let accounts = tx
                    .get_as::<DeviceRegistration>(device_path)?
                    .map_or(0, |r| r.accounts);
                if accounts >= *limit {
                    return Err(EconomyError::DeviceLimitReached { limit: *limit });
                }
                tx.set(
                    device_path,
                    &DeviceRegistration {
                        device_id: device_id.to_string(),
                        accounts: accounts + 1,
                        updated_at: now,
                    },
                )?;
            }
            tx.set(&path, &user)?;
            Ok((user.clone(), true))
        })?;

        if created {
            info!(uid = %uid, display_id = %user.display_id, device = ?device_id, "user profile created");
        }
        Ok(user)
    }

    /// Accounts created so far from `device_id`.
    pub fn device_accounts(&self, device_id: &str) -> Result<u32> {
        let reg: Option<DeviceRegistration> = self.store.get_as(&paths::device(device_id)?)?;
        Ok(reg.map_or(0, |r| r.accounts))
    }

    fn allocate_display_id(&self) -> Result<DisplayId> {
        let mut rng = rand::thread_rng();
        for _ in 0..DISPLAY_ID_ATTEMPTS {
            let candidate = DisplayId::random(&mut rng);
            if self.find_user_by_display_id(&candidate)?.is_none() {
                return Ok(candidate);
            }
            debug!(display_id = %candidate, "display id taken, drawing again");
        }
        Err(EconomyError::InvalidArgument(
            "could not allocate a free display id".into(),
        ))
    }

    /// Read a profile, clearing a lapsed VIP.
    ///
    /// The cleared fields are written back best-effort; the returned value
    /// is normalised either way.
    pub fn get_user(&self, uid: &UserUid) -> Result<Option<User>> {
        let path = paths::user(uid)?;
        let Some(mut user) = self.store.get_as::<User>(&path)? else {
            return Ok(None);
        };

        if user.vip_lapsed(self.now()) {
            user.vip = false;
            user.vip_level = 0;
            user.vip_expires_at = 0;
            let update = FieldUpdate::new()
                .set("vip", false)?
                .set("vip_level", 0)?
                .set("vip_expires_at", 0)?;
            match self.store.update(&path, update) {
                Ok(()) => debug!(uid = %uid, "lapsed vip cleared"),
                Err(e) => warn!(uid = %uid, error = %e, "failed to persist vip expiry"),
            }
        }
        Ok(Some(user))
    }

    pub(crate) fn require_user(&self, uid: &UserUid) -> Result<User> {
        self.get_user(uid)?
            .ok_or_else(|| EconomyError::UserNotFound(uid.to_string()))
    }

    pub fn search_user_by_display_id(&self, display_id: &DisplayId) -> Result<Option<User>> {
        match self.find_user_by_display_id(display_id)? {
            Some(user) => self.get_user(&user.uid),
            None => Ok(None),
        }
    }

    pub fn delete_user(&self, uid: &UserUid) -> Result<()> {
        self.store.delete(&paths::user(uid)?)?;
        info!(uid = %uid, "user deleted");
        Ok(())
    }

    /// Watch a profile. Dropping the subscription releases the listener.
    pub fn listen_to_user(&self, uid: &UserUid) -> Result<Subscription> {
        Ok(self
            .store
            .subscribe(WatchTarget::Document(paths::user(uid)?))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use majlis_store::Snapshot;

    fn draft(name: &str) -> NewUser {
        NewUser {
            name: name.into(),
            avatar: String::new(),
            email: None,
        }
    }

    #[test]
    fn test_create_is_idempotent_per_uid() {
        let (majlis, _) = setup();
        let uid = UserUid::new("u1");
        let first = majlis.create_user_profile(&uid, Some("dev"), draft("a")).unwrap();
        let second = majlis.create_user_profile(&uid, Some("dev"), draft("b")).unwrap();
        assert_eq!(first, second);
        assert!(DisplayId::parse(first.display_id.as_str()).is_ok());
        assert_eq!(majlis.device_accounts("dev").unwrap(), 1);
    }

    #[test]
    fn test_device_limit_counts_only_successful_creates() {
        let (majlis, _) = setup();
        for i in 0..2 {
            majlis
                .create_user_profile(&UserUid::new(format!("u{i}")), Some("dev"), draft("x"))
                .unwrap();
        }
        let err = majlis
            .create_user_profile(&UserUid::new("u3"), Some("dev"), draft("x"))
            .unwrap_err();
        assert!(matches!(err, EconomyError::DeviceLimitReached { limit: 2 }));
        assert_eq!(majlis.device_accounts("dev").unwrap(), 2);
        assert!(majlis.get_user(&UserUid::new("u3")).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_creates_respect_device_limit() {
        let (majlis, _) = setup();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let majlis = majlis.clone();
                std::thread::spawn(move || {
                    majlis.create_user_profile(
                        &UserUid::new(format!("racer{i}")),
                        Some("shared"),
                        draft("x"),
                    )
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(
                    matches!(e, EconomyError::DeviceLimitReached { .. })
                        || e.kind() == crate::ErrorKind::Conflict,
                    "unexpected error: {e}"
                ),
            }
        }
        assert!(created <= 2, "{created} accounts on one device");
        assert_eq!(majlis.device_accounts("shared").unwrap(), created);
        let users = majlis
            .store()
            .query(&majlis_store::Query::collection(paths::USERS).unwrap())
            .unwrap();
        assert_eq!(users.len() as u32, created);
    }

    #[test]
    fn test_custom_device_policy() {
        let (majlis, _) = setup();
        let majlis = majlis.with_device_policy(std::sync::Arc::new(FixedDeviceLimit(1)));
        majlis
            .create_user_profile(&UserUid::new("u1"), Some("dev"), draft("a"))
            .unwrap();
        let err = majlis
            .create_user_profile(&UserUid::new("u2"), Some("dev"), draft("b"))
            .unwrap_err();
        assert!(matches!(err, EconomyError::DeviceLimitReached { limit: 1 }));
        // No device id, no limit.
        majlis
            .create_user_profile(&UserUid::new("u3"), None, draft("c"))
            .unwrap();
    }

    #[test]
    fn test_lapsed_vip_is_cleared_on_read() {
        let (majlis, clock) = setup();
        let mut user = user_fixture("u1", "111111", 0);
        user.vip = true;
        user.vip_level = 3;
        user.vip_expires_at = T0 + 1_000;
        seed_user(&majlis, &user);

        let read = majlis.get_user(&user.uid).unwrap().unwrap();
        assert_eq!(read.vip_level, 3);

        clock.advance(2_000);
        let read = majlis.get_user(&user.uid).unwrap().unwrap();
        assert!(!read.vip);
        assert_eq!(read.vip_level, 0);
        assert_eq!(load_user(&majlis, "u1").vip_expires_at, 0);
    }

    #[test]
    fn test_search_by_display_id() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "123456", 0));
        let found = majlis
            .search_user_by_display_id(&DisplayId("123456".into()))
            .unwrap()
            .unwrap();
        assert_eq!(found.uid, UserUid::new("u1"));
        assert!(majlis
            .search_user_by_display_id(&DisplayId("654321".into()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_listen_sees_delete() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "123456", 0));
        let mut sub = majlis.listen_to_user(&UserUid::new("u1")).unwrap();
        assert!(matches!(
            sub.try_recv(),
            Some(Snapshot::Document { document: Some(_), .. })
        ));

        majlis.delete_user(&UserUid::new("u1")).unwrap();
        assert!(matches!(
            sub.try_recv(),
            Some(Snapshot::Document { document: None, .. })
        ));
        drop(sub);
        assert_eq!(majlis.store().listener_count(), 0);
    }
}
