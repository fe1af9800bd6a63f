//! The [`Majlis`] service handle.
//!
//! Operations are grouped by concern into sibling modules, each adding an
//! `impl Majlis` block, so this file only holds construction and the lookups
//! they share.

use std::sync::Arc;

use majlis_shared::{Clock, DisplayId, Room, RoomId, SystemClock, User};
use majlis_store::{DocumentStore, FilterOp, Query};

use crate::accounts::{DevicePolicy, FixedDeviceLimit};
use crate::config::EconomyConfig;
use crate::error::{EconomyError, Result};
use crate::paths;

pub struct Majlis<S, C = SystemClock> {
    pub(crate) store: Arc<S>,
    pub(crate) clock: C,
    pub(crate) config: EconomyConfig,
    pub(crate) devices: Arc<dyn DevicePolicy>,
}

impl<S, C: Clone> Clone for Majlis<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: self.clock.clone(),
            config: self.config.clone(),
            devices: Arc::clone(&self.devices),
        }
    }
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self::with_config(store, clock, EconomyConfig::default())
    }

    /// Build with custom tunables. Every device gets
    /// `config.max_accounts_per_device` accounts.
    pub fn with_config(store: Arc<S>, clock: C, config: EconomyConfig) -> Self {
        let devices = Arc::new(FixedDeviceLimit(config.max_accounts_per_device));
        Self {
            store,
            clock,
            config,
            devices,
        }
    }

    /// Replace the per-device account limit.
    pub fn with_device_policy(mut self, devices: Arc<dyn DevicePolicy>) -> Self {
        self.devices = devices;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// `now + count * unit_ms`, rejecting `count` when the instant does not
    /// fit in an `i64`.
    pub(crate) fn expiry_after(&self, count: i64, unit_ms: i64) -> Result<i64> {
        count
            .checked_mul(unit_ms)
            .and_then(|span| self.now().checked_add(span))
            .ok_or(EconomyError::InvalidAmount(count))
    }

    pub fn get_room(&self, id: &RoomId) -> Result<Option<Room>> {
        Ok(self.store.get_as(&paths::room(id)?)?)
    }

    pub(crate) fn require_room(&self, id: &RoomId) -> Result<Room> {
        self.get_room(id)?
            .ok_or_else(|| EconomyError::RoomNotFound(id.clone()))
    }

    /// Raw lookup by public display id, without VIP normalisation.
    pub(crate) fn find_user_by_display_id(&self, display_id: &DisplayId) -> Result<Option<User>> {
        let query = Query::collection(paths::USERS)?
            .filter("display_id", FilterOp::Eq, display_id)?
            .limit(1);
        match self.store.query(&query)?.into_iter().next() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }
}
