//! Gifting: contributor cup, wealth pool and recipient credit.
//!
//! `send_gift` commits the room and sender side in one transaction, together
//! with a [`RecipientCredit`] written to the `pending_credits` outbox. The
//! recipient's coins live in another user document and are settled
//! afterwards, usually by the background worker. Settlement deletes the
//! outbox entry in the same transaction as the credit, so a credit is applied
//! at most once and survives a lost queue message or a restart.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use majlis_shared::{Clock, Contributor, DisplayId, Room, RoomId, User, UserUid};
use majlis_store::{Direction, DocumentStore, FieldUpdate, Query};

use crate::error::{EconomyError, Result};
use crate::paths;
use crate::seats::{ensure_seat, normalize_room};
use crate::service::Majlis;

/// Post-commit coin credit owed to a gift's recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipientCredit {
    pub id: String,
    pub room_id: RoomId,
    pub recipient: DisplayId,
    pub cost: i64,
    pub coins: i64,
    pub gift_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GiftReceipt {
    /// Share of the cost added to the room wealth pool.
    pub wealth_added: i64,
    pub room_wealth: i64,
    /// `None` when the target seat was empty.
    pub credit: Option<RecipientCredit>,
}

/// Start a fresh cup when the current one is older than `window_ms`.
pub fn roll_cup_window(room: &mut Room, now: i64, window_ms: i64) -> bool {
    if now - room.cup_start_time > window_ms {
        room.contributors.clear();
        room.cup_start_time = now;
        true
    } else {
        false
    }
}

/// Add `amount` to the sender's running contribution, refreshing the cached
/// name and avatar.
pub fn add_contribution(room: &mut Room, sender: &User, amount: i64) {
    let entry = room
        .contributors
        .entry(sender.uid.clone())
        .or_insert_with(|| Contributor {
            user_id: sender.display_id.clone(),
            name: String::new(),
            avatar: String::new(),
            amount: 0,
        });
    entry.user_id = sender.display_id.clone();
    entry.name = sender.name.clone();
    entry.avatar = sender.avatar.clone();
    entry.amount = entry.amount.saturating_add(amount);
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    pub fn send_gift(
        &self,
        room_id: &RoomId,
        sender_uid: &UserUid,
        seat_index: usize,
        cost: i64,
        gift_id: Option<String>,
    ) -> Result<GiftReceipt> {
        if cost <= 0 {
            return Err(EconomyError::InvalidAmount(cost));
        }
        let room_path = paths::room(room_id)?;
        let sender_path = paths::user(sender_uid)?;
        let now = self.now();
        let wealth_added = self.config.wealth_share(cost);
        let max = self.config.max_seat_count;
        let window = self.config.cup_window_ms;

        let credit_id = uuid::Uuid::new_v4().simple().to_string();
        let credit_path = paths::pending_credit(&credit_id)?;

        let (room, credit) = self.store.transaction(|tx| -> Result<(Room, Option<RecipientCredit>)> {
            let mut room: Room = tx
                .get_as(&room_path)?
                .ok_or_else(|| EconomyError::RoomNotFound(room_id.clone()))?;
            let sender: User = tx
                .get_as(&sender_path)?
                .ok_or_else(|| EconomyError::UserNotFound(sender_uid.to_string()))?;

            if sender.wallet.diamonds < cost {
                return Err(EconomyError::InsufficientFunds {
                    available: sender.wallet.diamonds,
                    required: cost,
                });
            }

            normalize_room(&mut room);
            roll_cup_window(&mut room, now, window);
            add_contribution(&mut room, &sender, cost);
            room.room_wealth = room.room_wealth.saturating_add(wealth_added);

            ensure_seat(&mut room, seat_index, max)?;
            let seat = &mut room.seats[seat_index];
            let credit = seat.user_id.clone().map(|recipient| RecipientCredit {
                id: credit_id.clone(),
                room_id: room_id.clone(),
                recipient,
                cost,
                coins: self.config.recipient_share(cost),
                gift_id: gift_id.clone(),
                created_at: now,
            });
            if let Some(credit) = &credit {
                seat.gift_count = seat.gift_count.saturating_add(cost);
                tx.set(&credit_path, credit)?;
            }

            tx.update(
                &room_path,
                FieldUpdate::new()
                    .set("seats", &room.seats)?
                    .set("seat_count", room.seat_count)?
                    .set("contributors", &room.contributors)?
                    .set("cup_start_time", room.cup_start_time)?
                    .set("room_wealth", room.room_wealth)?,
            );
            tx.update(
                &sender_path,
                FieldUpdate::new()
                    .increment("wallet.diamonds", -cost)
                    .increment("diamonds_spent", cost),
            );
            Ok((room, credit))
        })?;

        info!(
            room = %room_id,
            sender = %sender_uid,
            seat = seat_index,
            cost,
            wealth_added,
            "gift sent"
        );

        Ok(GiftReceipt {
            wealth_added,
            room_wealth: room.room_wealth,
            credit,
        })
    }

    /// Apply a recipient credit once.
    ///
    /// Returns `false` when the credit is no longer pending, either because
    /// it was already applied or because the recipient no longer exists.
    pub fn settle_recipient_credit(&self, credit: &RecipientCredit) -> Result<bool> {
        let pending = paths::pending_credit(&credit.id)?;
        let Some(recipient) = self.find_user_by_display_id(&credit.recipient)? else {
            warn!(credit = %credit.id, recipient = %credit.recipient, "gift recipient not found");
            self.store.delete(&pending)?;
            return Ok(false);
        };
        let user_path = paths::user(&recipient.uid)?;

        let applied = self.store.transaction(|tx| {
            if tx.get(&pending)?.is_none() {
                return Ok::<_, EconomyError>(false);
            }
            tx.delete(&pending);
            let Some(user) = tx.get_as::<User>(&user_path)? else {
                return Ok(false);
            };

            let mut update = FieldUpdate::new()
                .increment("wallet.coins", credit.coins)
                .increment("diamonds_received", credit.cost);
            if let Some(gift) = &credit.gift_id {
                // Gift ids are map keys, not path segments, so write the map.
                let mut received = user.received_gifts.clone();
                *received.entry(gift.clone()).or_insert(0) += 1;
                update = update.set("received_gifts", &received)?;
            }
            tx.update(&user_path, update);
            Ok(true)
        })?;

        if applied {
            info!(
                credit = %credit.id,
                recipient = %credit.recipient,
                coins = credit.coins,
                "recipient credited"
            );
        } else {
            debug!(credit = %credit.id, "recipient credit no longer pending");
        }
        Ok(applied)
    }

    /// Credits committed by `send_gift` and not yet settled, oldest first.
    pub fn pending_credits(&self, limit: usize) -> Result<Vec<RecipientCredit>> {
        let query = Query::collection(paths::PENDING_CREDITS)?
            .order_by("created_at", Direction::Ascending)
            .limit(limit);
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

    const HOUR: i64 = 60 * 60 * 1000;

    fn fixture() -> TestMajlis {
        let (majlis, _) = setup();
        seed_room(&majlis, &room_fixture("r1", "100000"));
        seed_user(&majlis, &user_fixture("host", "100000", 0));
        seed_user(&majlis, &user_fixture("sender", "111111", 1_000));
        seed_user(&majlis, &user_fixture("singer", "222222", 0));
        majlis
            .take_seat(&RoomId::new("r1"), 2, &UserUid::new("singer"))
            .unwrap();
        majlis
    }

    fn gift(majlis: &TestMajlis, cost: i64) -> Result<GiftReceipt> {
        majlis.send_gift(
            &RoomId::new("r1"),
            &UserUid::new("sender"),
            2,
            cost,
            Some("rose".into()),
        )
    }

    #[test]
    fn test_gift_arithmetic_and_credit() {
        let majlis = fixture();
        let receipt = gift(&majlis, 99).unwrap();
        assert_eq!(receipt.wealth_added, 14);

        let sender = load_user(&majlis, "sender");
        assert_eq!(sender.wallet.diamonds, 901);
        assert_eq!(sender.diamonds_spent, 99);

        let room = load_room(&majlis, "r1");
        assert_eq!(room.room_wealth, 14);
        assert_eq!(room.seats[2].gift_count, 99);
        assert_eq!(room.contributors[&UserUid::new("sender")].amount, 99);

        let credit = receipt.credit.unwrap();
        assert_eq!(credit.recipient, DisplayId("222222".into()));
        assert_eq!(credit.coins, 29);
        assert!(majlis.settle_recipient_credit(&credit).unwrap());

        let singer = load_user(&majlis, "singer");
        assert_eq!(singer.wallet.coins, 29);
        assert_eq!(singer.diamonds_received, 99);
        assert_eq!(singer.received_gifts["rose"], 1);

        // Replays are no-ops.
        assert!(!majlis.settle_recipient_credit(&credit).unwrap());
        assert_eq!(load_user(&majlis, "singer").wallet.coins, 29);
    }

    #[test]
    fn test_insufficient_funds_changes_nothing() {
        let majlis = fixture();
        let before = load_room(&majlis, "r1");
        let err = gift(&majlis, 1_001).unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientFunds { .. }));
        assert_eq!(load_room(&majlis, "r1"), before);
        assert_eq!(load_user(&majlis, "sender").wallet.diamonds, 1_000);
    }

    #[test]
    fn test_non_positive_cost_is_rejected() {
        let majlis = fixture();
        assert!(matches!(gift(&majlis, 0), Err(EconomyError::InvalidAmount(0))));
    }

    #[test]
    fn test_empty_seat_gets_no_credit() {
        let majlis = fixture();
        let receipt = majlis
            .send_gift(&RoomId::new("r1"), &UserUid::new("sender"), 7, 100, None)
            .unwrap();
        assert!(receipt.credit.is_none());
        assert_eq!(receipt.room_wealth, 15);
        assert_eq!(load_room(&majlis, "r1").seats[7].gift_count, 0);
    }

    #[test]
    fn test_credit_waits_in_outbox_until_settled() {
        let majlis = fixture();
        let credit = gift(&majlis, 100).unwrap().credit.unwrap();
        assert_eq!(majlis.pending_credits(10).unwrap(), vec![credit.clone()]);

        assert!(majlis.settle_recipient_credit(&credit).unwrap());
        assert!(majlis.pending_credits(10).unwrap().is_empty());
        assert!(!majlis.settle_recipient_credit(&credit).unwrap());
        assert_eq!(load_user(&majlis, "singer").wallet.coins, 30);
    }

    #[test]
    fn test_leaving_a_gifted_seat_clears_its_count() {
        let majlis = fixture();
        gift(&majlis, 99).unwrap();
        assert_eq!(load_room(&majlis, "r1").seats[2].gift_count, 99);

        let room = majlis
            .leave_seat(&RoomId::new("r1"), &UserUid::new("singer"))
            .unwrap();
        assert_eq!(room.seats[2], majlis_shared::Seat::empty(2));
        assert_invariants(&room);
        assert_invariants(&load_room(&majlis, "r1"));
    }

    #[test]
    fn test_gift_past_seat_count_grows_the_room() {
        let majlis = fixture();
        let receipt = majlis
            .send_gift(&RoomId::new("r1"), &UserUid::new("sender"), 14, 100, None)
            .unwrap();
        assert!(receipt.credit.is_none());

        let room = load_room(&majlis, "r1");
        assert_eq!(room.seats.len(), 15);
        assert_eq!(room.seat_count, 14);
        assert_eq!(room.seats[2].user_id, Some(DisplayId("222222".into())));
        assert_invariants(&room);
    }

    #[test]
    fn test_seat_index_above_max_changes_nothing() {
        let majlis = fixture();
        let before = load_room(&majlis, "r1");
        let err = majlis
            .send_gift(&RoomId::new("r1"), &UserUid::new("sender"), 31, 100, None)
            .unwrap_err();
        assert!(matches!(err, EconomyError::SeatOutOfRange { index: 31, max: 30 }));
        assert_eq!(load_room(&majlis, "r1"), before);
        assert_eq!(load_user(&majlis, "sender").wallet.diamonds, 1_000);
        assert!(majlis.pending_credits(10).unwrap().is_empty());
    }

    #[test]
    fn test_cup_window_accumulates_then_resets() {
        let (majlis, clock) = setup();
        seed_room(&majlis, &room_fixture("r1", "100000"));
        seed_user(&majlis, &user_fixture("sender", "111111", 1_000));
        let sender = UserUid::new("sender");

        gift_from(&majlis, &sender, 10);
        clock.advance(HOUR);
        gift_from(&majlis, &sender, 20);
        let room = load_room(&majlis, "r1");
        assert_eq!(room.contributors[&sender].amount, 30);
        assert_eq!(room.cup_start_time, T0);

        clock.advance(25 * HOUR);
        gift_from(&majlis, &sender, 5);
        let room = load_room(&majlis, "r1");
        assert_eq!(room.contributors.len(), 1);
        assert_eq!(room.contributors[&sender].amount, 5);
        assert_eq!(room.cup_start_time, T0 + 26 * HOUR);
    }

    #[test]
    fn test_gift_persists_in_sqlite() {
        use majlis_shared::ManualClock;
        use majlis_store::SqliteStore;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("majlis.db");
        {
            let store = Arc::new(SqliteStore::open_at(&db).unwrap());
            let majlis = Majlis::new(Arc::clone(&store), ManualClock::new(T0));
            let room = room_fixture("r1", "100000");
            let sender = user_fixture("sender", "111111", 500);
            store.set(&paths::room(&room.id).unwrap(), &room).unwrap();
            store.set(&paths::user(&sender.uid).unwrap(), &sender).unwrap();
            majlis
                .send_gift(&room.id, &sender.uid, 4, 200, None)
                .unwrap();
        }

        let store = SqliteStore::open_at(&db).unwrap();
        let room: Room = store
            .get_as(&paths::room(&RoomId::new("r1")).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(room.room_wealth, 30);
        let sender: User = store
            .get_as(&paths::user(&UserUid::new("sender")).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(sender.wallet.diamonds, 300);
    }

    fn gift_from(majlis: &TestMajlis, sender: &UserUid, cost: i64) {
        majlis
            .send_gift(&RoomId::new("r1"), sender, 1, cost, None)
            .unwrap();
    }
}
