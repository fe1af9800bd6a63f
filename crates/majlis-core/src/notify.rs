//! System notifications and official broadcasts.
//!
//! Other modules treat these as best-effort: failures are logged by the
//! caller and never undo the operation that triggered them.

use tracing::{debug, info};

use majlis_shared::constants::{HISTORY_LIMIT, MAX_BATCH_WRITES};
use majlis_shared::{Broadcast, Clock, Notification, NotificationKind, UserUid};
use majlis_store::{new_doc_path, Direction, DocumentStore, FieldUpdate, FilterOp, Query};

use crate::error::Result;
use crate::paths;
use crate::service::Majlis;

pub(crate) fn system_notification(id: &str, title: &str, body: &str, now: i64) -> Notification {
    Notification {
        id: id.to_string(),
        kind: NotificationKind::System,
        title: title.to_string(),
        body: body.to_string(),
        timestamp: now,
        read: false,
    }
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    pub fn send_system_notification(
        &self,
        uid: &UserUid,
        title: &str,
        body: &str,
    ) -> Result<Notification> {
        let path = new_doc_path(&paths::notifications(uid))?;
        let notification = system_notification(path.id(), title, body, self.now());
        self.store.set(&path, &notification)?;
        debug!(uid = %uid, id = %notification.id, "system notification sent");
        Ok(notification)
    }

    pub fn broadcast_official_message(&self, title: &str, body: &str) -> Result<Broadcast> {
        let path = new_doc_path(paths::BROADCASTS)?;
        let broadcast = Broadcast {
            id: path.id().to_string(),
            title: title.to_string(),
            body: body.to_string(),
            timestamp: self.now(),
        };
        self.store.set(&path, &broadcast)?;
        info!(id = %broadcast.id, "official message broadcast");
        Ok(broadcast)
    }

    /// Newest first. Official messages are shared by every user and are
    /// never marked read.
    pub fn list_notifications(
        &self,
        uid: &UserUid,
        kind: NotificationKind,
    ) -> Result<Vec<Notification>> {
        match kind {
            NotificationKind::System => {
                let query = Query::collection(&paths::notifications(uid))?
                    .filter("kind", FilterOp::Eq, NotificationKind::System)?
                    .order_by("timestamp", Direction::Descending)
                    .limit(HISTORY_LIMIT);
                self.store
                    .query(&query)?
                    .iter()
                    .map(|doc| Ok(doc.decode()?))
                    .collect()
            }
            NotificationKind::Official => {
                let query = Query::collection(paths::BROADCASTS)?
                    .order_by("timestamp", Direction::Descending)
                    .limit(HISTORY_LIMIT);
                self.store
                    .query(&query)?
                    .iter()
                    .map(|doc| {
                        let b: Broadcast = doc.decode()?;
                        Ok(Notification {
                            id: b.id,
                            kind: NotificationKind::Official,
                            title: b.title,
                            body: b.body,
                            timestamp: b.timestamp,
                            read: false,
                        })
                    })
                    .collect()
            }
        }
    }

    /// Mark every unread system notification read. Returns how many changed.
    pub fn mark_system_notifications_read(&self, uid: &UserUid) -> Result<usize> {
        let query = Query::collection(&paths::notifications(uid))?
            .filter("kind", FilterOp::Eq, NotificationKind::System)?
            .filter("read", FilterOp::Eq, false)?;
        let unread = self.store.query(&query)?;

        for chunk in unread.chunks(MAX_BATCH_WRITES) {
            let mut batch = self.store.batch();
            for doc in chunk {
                batch.update(&doc.path, FieldUpdate::new().set("read", true)?);
            }
            batch.commit()?;
        }
        debug!(uid = %uid, count = unread.len(), "notifications marked read");
        Ok(unread.len())
    }
}
