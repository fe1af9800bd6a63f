//! Room wealth pool payouts.

use tracing::info;

use majlis_shared::constants::HISTORY_LIMIT;
use majlis_shared::{Clock, DisplayId, Room, RoomId, User, UserUid, WealthTransaction};
use majlis_store::{new_doc_path, Direction, DocumentStore, FieldUpdate, Query};

use crate::error::{EconomyError, Result};
use crate::gate;
use crate::paths;
use crate::service::Majlis;

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    /// Pay `amount` from the room's wealth pool to the user with
    /// `target_display_id`, recording an audit entry in the same commit.
    pub fn distribute_room_wealth(
        &self,
        room_id: &RoomId,
        actor: &UserUid,
        target_display_id: &DisplayId,
        amount: i64,
    ) -> Result<WealthTransaction> {
        if amount <= 0 {
            return Err(EconomyError::InvalidAmount(amount));
        }
        let actor = self.require_user(actor)?;
        let target = self
            .find_user_by_display_id(target_display_id)?
            .ok_or_else(|| EconomyError::TargetNotFound(target_display_id.clone()))?;

        let room_path = paths::room(room_id)?;
        let target_path = paths::user(&target.uid)?;
        let history = paths::wealth_transactions(room_id);
        let now = self.now();

        let record = self.store.transaction(|tx| -> Result<WealthTransaction> {
            let room: Room = tx
                .get_as(&room_path)?
                .ok_or_else(|| EconomyError::RoomNotFound(room_id.clone()))?;
            if !gate::can_bypass_lock(&room, &actor) {
                return Err(EconomyError::PermissionDenied(
                    "only the host may distribute room wealth".into(),
                ));
            }
            if room.room_wealth < amount {
                return Err(EconomyError::InsufficientWealth {
                    available: room.room_wealth,
                    required: amount,
                });
            }
            let target: User = tx
                .get_as(&target_path)?
                .ok_or_else(|| EconomyError::TargetNotFound(target_display_id.clone()))?;

            let record_path = new_doc_path(&history)?;
            let record = WealthTransaction {
                id: record_path.id().to_string(),
                target_display_id: target.display_id.clone(),
                target_user_name: target.name.clone(),
                target_user_avatar: target.avatar.clone(),
                amount,
                timestamp: now,
            };

            tx.update(&room_path, FieldUpdate::new().increment("room_wealth", -amount));
            tx.update(
                &target_path,
                FieldUpdate::new().increment("wallet.diamonds", amount),
            );
            tx.set(&record_path, &record)?;
            Ok(record)
        })?;

        info!(
            room = %room_id,
            target = %target_display_id,
            amount,
            by = %actor.display_id,
            "room wealth distributed"
        );
        Ok(record)
    }

    /// Latest payouts, newest first.
    pub fn wealth_history(&self, room_id: &RoomId) -> Result<Vec<WealthTransaction>> {
        let query = Query::collection(&paths::wealth_transactions(room_id))?
            .order_by("timestamp", Direction::Descending)
            .limit(HISTORY_LIMIT);
        self.store
            .query(&query)?
            .iter()
            .map(|doc| Ok(doc.decode()?))
            .collect()
    }
}
