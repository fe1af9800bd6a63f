//! Wallet mutations.
//!
//! Every path except [`Majlis::admin_adjust_diamonds`] refuses to take a
//! balance negative; that one clamps deductions at zero.

use tracing::info;

use majlis_shared::constants::WEEK_MS;
use majlis_shared::{Clock, Currency, DisplayId, ItemKind, StoreItem, User, UserUid, Wallet};
use majlis_store::{Direction, DocumentStore, FieldUpdate, Query};

use crate::error::{EconomyError, Result};
use crate::paths;
use crate::service::Majlis;

fn require_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        Err(EconomyError::InvalidAmount(amount))
    } else {
        Ok(())
    }
}

fn require_funds(available: i64, required: i64) -> Result<()> {
    if available < required {
        Err(EconomyError::InsufficientFunds {
            available,
            required,
        })
    } else {
        Ok(())
    }
}

impl<S: DocumentStore + 'static, C: Clock> Majlis<S, C> {
    fn user_not_found(uid: &UserUid) -> EconomyError {
        EconomyError::UserNotFound(uid.to_string())
    }

    /// Apply a signed diamond delta, rolling the daily-profit window first.
    ///
    /// Credits count towards `daily_profit`; debits never do.
    pub fn apply_wallet_delta(&self, uid: &UserUid, amount: i64) -> Result<Wallet> {
        let path = paths::user(uid)?;
        let now = self.now();
        let window = self.config.daily_window_ms;

        let wallet = self.store.transaction(|tx| -> Result<Wallet> {
            let user: User = tx
                .get_as(&path)?
                .ok_or_else(|| Self::user_not_found(uid))?;

            let diamonds = user
                .wallet
                .diamonds
                .checked_add(amount)
                .ok_or(EconomyError::InvalidAmount(amount))?;
            if diamonds < 0 {
                return Err(EconomyError::InsufficientFunds {
                    available: user.wallet.diamonds,
                    required: -amount,
                });
            }

            let (mut daily_profit, mut last_reset) = (user.daily_profit, user.last_daily_reset);
            if now - last_reset > window {
                daily_profit = 0;
                last_reset = now;
            }
            if amount > 0 {
                daily_profit = daily_profit
                    .checked_add(amount)
                    .ok_or(EconomyError::InvalidAmount(amount))?;
            }

            tx.update(
                &path,
                FieldUpdate::new()
                    .set("wallet.diamonds", diamonds)?
                    .set("daily_profit", daily_profit)?
                    .set("last_daily_reset", last_reset)?,
            );
            Ok(Wallet {
                diamonds,
                ..user.wallet
            })
        })?;

        info!(uid = %uid, amount, diamonds = wallet.diamonds, "wallet delta applied");
        Ok(wallet)
    }

    /// Convert coins to diamonds 1:1.
    pub fn exchange_coins_to_diamonds(&self, uid: &UserUid, amount: i64) -> Result<Wallet> {
        require_positive(amount)?;
        let path = paths::user(uid)?;
        let wallet = self.store.transaction(|tx| -> Result<Wallet> {
            let user: User = tx
                .get_as(&path)?
                .ok_or_else(|| Self::user_not_found(uid))?;
            require_funds(user.wallet.coins, amount)?;
            let diamonds = user
                .wallet
                .diamonds
                .checked_add(amount)
                .ok_or(EconomyError::InvalidAmount(amount))?;
            tx.update(
                &path,
                FieldUpdate::new()
                    .increment("wallet.coins", -amount)
                    .increment("wallet.diamonds", amount),
            );
            Ok(Wallet {
                diamonds,
                coins: user.wallet.coins - amount,
            })
        })?;
        info!(uid = %uid, amount, "coins exchanged");
        Ok(wallet)
    }

    /// Add or replace a catalog entry.
    pub fn upsert_store_item(&self, item: &StoreItem) -> Result<()> {
        if item.price < 0 {
            return Err(EconomyError::InvalidAmount(item.price));
        }
        let path = paths::store_item(&item.id)
            .map_err(|e| EconomyError::InvalidArgument(format!("item id: {e}")))?;
        self.store.set(&path, item)?;
        info!(item = %item.id, price = item.price, currency = ?item.currency, "store item saved");
        Ok(())
    }

    pub fn list_store_items(&self) -> Result<Vec<StoreItem>> {
        let query = Query::collection(paths::STORE_ITEMS)?.order_by("price", Direction::Ascending);
        self.store
            .query(&query)?
            .iter()
            .map(|doc| Ok(doc.decode()?))
            .collect()
    }

    /// Rent catalog item `item_id` for a week, stacking on any remaining
    /// time. Price, currency and slot come from the catalog entry read in the
    /// purchase transaction. The item is equipped when its slot is empty.
    pub fn purchase_store_item(&self, uid: &UserUid, item_id: &str) -> Result<User> {
        let item_path =
            paths::store_item(item_id).map_err(|_| EconomyError::ItemNotFound(item_id.into()))?;
        let path = paths::user(uid)?;
        let now = self.now();

        let (user, item) = self.store.transaction(|tx| -> Result<(User, StoreItem)> {
            let item: StoreItem = tx
                .get_as(&item_path)?
                .ok_or_else(|| EconomyError::ItemNotFound(item_id.into()))?;
            if item.price < 0 {
                return Err(EconomyError::InvalidAmount(item.price));
            }
            let mut user: User = tx
                .get_as(&path)?
                .ok_or_else(|| Self::user_not_found(uid))?;
            require_funds(user.wallet.balance(item.currency), item.price)?;

            match item.currency {
                Currency::Diamonds => user.wallet.diamonds -= item.price,
                Currency::Coins => user.wallet.coins -= item.price,
            }
            let current = user.inventory.get(&item.id).copied().unwrap_or(0);
            user.inventory
                .insert(item.id.clone(), current.max(now).saturating_add(WEEK_MS));

            let slot = match item.kind {
                ItemKind::Frame => Some(&mut user.equipped_frame),
                ItemKind::Bubble => Some(&mut user.equipped_bubble),
                ItemKind::Entry => Some(&mut user.equipped_entry),
                ItemKind::Other => None,
            };
            if let Some(slot) = slot {
                if slot.is_empty() {
                    *slot = item.id.clone();
                }
            }

            tx.set(&path, &user)?;
            Ok((user, item))
        })?;

        info!(uid = %uid, item = %item.id, price = item.price, "store item purchased");
        Ok(user)
    }

    /// Move diamonds from an agent's agency balance to another user's wallet.
    pub fn transfer_agency_diamonds(
        &self,
        agent_uid: &UserUid,
        target_display_id: &DisplayId,
        amount: i64,
    ) -> Result<()> {
        require_positive(amount)?;
        let target = self
            .find_user_by_display_id(target_display_id)?
            .ok_or_else(|| EconomyError::TargetNotFound(target_display_id.clone()))?;
        let agent_path = paths::user(agent_uid)?;
        let target_path = paths::user(&target.uid)?;

        self.store.transaction(|tx| -> Result<()> {
            let agent: User = tx
                .get_as(&agent_path)?
                .ok_or_else(|| Self::user_not_found(agent_uid))?;
            if !agent.is_agent {
                return Err(EconomyError::PermissionDenied(
                    "only agents may transfer agency diamonds".into(),
                ));
            }
            require_funds(agent.agency_balance, amount)?;
            if tx.get(&target_path)?.is_none() {
                return Err(EconomyError::TargetNotFound(target_display_id.clone()));
            }

            tx.update(
                &agent_path,
                FieldUpdate::new().increment("agency_balance", -amount),
            );
            tx.update(
                &target_path,
                FieldUpdate::new().increment("wallet.diamonds", amount),
            );
            Ok(())
        })?;

        info!(agent = %agent_uid, target = %target_display_id, amount, "agency diamonds transferred");
        Ok(())
    }

    /// Credit, or deduct clamped at zero.
    pub fn admin_adjust_diamonds(&self, uid: &UserUid, delta: i64) -> Result<Wallet> {
        let path = paths::user(uid)?;
        let wallet = self.store.transaction(|tx| -> Result<Wallet> {
            let user: User = tx
                .get_as(&path)?
                .ok_or_else(|| Self::user_not_found(uid))?;
            let diamonds = user.wallet.diamonds.saturating_add(delta).max(0);
            tx.update(&path, FieldUpdate::new().set("wallet.diamonds", diamonds)?);
            Ok(Wallet {
                diamonds,
                ..user.wallet
            })
        })?;
        info!(uid = %uid, delta, diamonds = wallet.diamonds, "diamonds adjusted by admin");
        Ok(wallet)
    }

    pub fn reset_coins(&self, uid: &UserUid) -> Result<()> {
        let path = paths::user(uid)?;
        if self.store.get(&path)?.is_none() {
            return Err(Self::user_not_found(uid));
        }
        self.store
            .update(&path, FieldUpdate::new().set("wallet.coins", 0)?)?;
        info!(uid = %uid, "coins reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use majlis_shared::constants::DAY_MS;

    fn uid(s: &str) -> UserUid {
        UserUid::new(s)
    }

    #[test]
    fn test_daily_profit_rolls_after_window() {
        let (majlis, clock) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 0));

        majlis.apply_wallet_delta(&uid("u1"), 100).unwrap();
        clock.advance(DAY_MS / 2);
        majlis.apply_wallet_delta(&uid("u1"), 20).unwrap();
        majlis.apply_wallet_delta(&uid("u1"), -30).unwrap();
        let user = load_user(&majlis, "u1");
        assert_eq!(user.daily_profit, 120);
        assert_eq!(user.wallet.diamonds, 90);

        clock.advance(DAY_MS);
        majlis.apply_wallet_delta(&uid("u1"), 50).unwrap();
        let user = load_user(&majlis, "u1");
        assert_eq!(user.daily_profit, 50);
        assert_eq!(user.last_daily_reset, T0 + DAY_MS + DAY_MS / 2);
        assert_eq!(user.wallet.diamonds, 140);
    }

    #[test]
    fn test_overdraft_is_rejected() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 10));
        let err = majlis.apply_wallet_delta(&uid("u1"), -11).unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientFunds { available: 10, required: 11 }));
        assert_eq!(load_user(&majlis, "u1").wallet.diamonds, 10);
    }

    #[test]
    fn test_overflowing_delta_is_rejected() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 10));
        let before = load_user(&majlis, "u1");

        let err = majlis.apply_wallet_delta(&uid("u1"), i64::MAX).unwrap_err();
        assert!(matches!(err, EconomyError::InvalidAmount(i64::MAX)));
        assert_eq!(load_user(&majlis, "u1"), before);

        // The balance fits but the day's profit would not.
        let mut rich = user_fixture("u2", "222222", 0);
        rich.daily_profit = i64::MAX - 5;
        seed_user(&majlis, &rich);
        let err = majlis.apply_wallet_delta(&uid("u2"), 10).unwrap_err();
        assert!(matches!(err, EconomyError::InvalidAmount(10)));
        assert_eq!(load_user(&majlis, "u2").wallet.diamonds, 0);
    }

    #[test]
    fn test_exchange_moves_coins() {
        let (majlis, _) = setup();
        let mut user = user_fixture("u1", "111111", 5);
        user.wallet.coins = 40;
        seed_user(&majlis, &user);

        let wallet = majlis.exchange_coins_to_diamonds(&uid("u1"), 30).unwrap();
        assert_eq!(wallet, Wallet { diamonds: 35, coins: 10 });
        assert_eq!(load_user(&majlis, "u1").wallet, wallet);
        assert!(majlis.exchange_coins_to_diamonds(&uid("u1"), 11).is_err());
        assert!(majlis.exchange_coins_to_diamonds(&uid("u1"), 0).is_err());
    }

    fn gold_frame() -> StoreItem {
        StoreItem {
            id: "gold".into(),
            name: "Gold".into(),
            kind: ItemKind::Frame,
            price: 300,
            currency: Currency::Diamonds,
        }
    }

    #[test]
    fn test_purchase_stacks_and_auto_equips() {
        let (majlis, clock) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 1_000));
        let frame = gold_frame();
        majlis.upsert_store_item(&frame).unwrap();

        let user = majlis.purchase_store_item(&uid("u1"), "gold").unwrap();
        assert_eq!(user.inventory["gold"], T0 + WEEK_MS);
        assert_eq!(user.equipped_frame, "gold");

        clock.advance(DAY_MS);
        let user = majlis.purchase_store_item(&uid("u1"), "gold").unwrap();
        assert_eq!(user.inventory["gold"], T0 + 2 * WEEK_MS);
        assert_eq!(user.wallet.diamonds, 400);

        majlis
            .upsert_store_item(&StoreItem {
                id: "silver".into(),
                price: 1,
                currency: Currency::Coins,
                ..frame
            })
            .unwrap();
        let err = majlis.purchase_store_item(&uid("u1"), "silver").unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientFunds { .. }));
        assert_eq!(load_user(&majlis, "u1").equipped_frame, "gold");
    }

    #[test]
    fn test_purchase_charges_catalog_price() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 1_000));
        majlis.upsert_store_item(&gold_frame()).unwrap();

        let err = majlis.purchase_store_item(&uid("u1"), "diamond-crown").unwrap_err();
        assert!(matches!(err, EconomyError::ItemNotFound(_)));
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert_eq!(load_user(&majlis, "u1").wallet.diamonds, 1_000);

        // A repriced catalog entry applies to the next purchase.
        majlis
            .upsert_store_item(&StoreItem {
                price: 450,
                ..gold_frame()
            })
            .unwrap();
        let user = majlis.purchase_store_item(&uid("u1"), "gold").unwrap();
        assert_eq!(user.wallet.diamonds, 550);

        let listed = majlis.list_store_items().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].price, 450);

        let negative = StoreItem {
            price: -1,
            ..gold_frame()
        };
        assert!(matches!(
            majlis.upsert_store_item(&negative),
            Err(EconomyError::InvalidAmount(-1))
        ));
    }

    #[test]
    fn test_agency_transfer_requires_agent() {
        let (majlis, _) = setup();
        let mut agent = user_fixture("agent", "111111", 0);
        agent.agency_balance = 100;
        seed_user(&majlis, &agent);
        seed_user(&majlis, &user_fixture("u2", "222222", 0));
        let target = DisplayId("222222".into());

        let err = majlis.transfer_agency_diamonds(&uid("agent"), &target, 10).unwrap_err();
        assert!(matches!(err, EconomyError::PermissionDenied(_)));

        agent.is_agent = true;
        seed_user(&majlis, &agent);
        majlis.transfer_agency_diamonds(&uid("agent"), &target, 60).unwrap();
        assert_eq!(load_user(&majlis, "agent").agency_balance, 40);
        assert_eq!(load_user(&majlis, "u2").wallet.diamonds, 60);

        let err = majlis.transfer_agency_diamonds(&uid("agent"), &target, 41).unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_admin_deduction_clamps_at_zero() {
        let (majlis, _) = setup();
        seed_user(&majlis, &user_fixture("u1", "111111", 50));
        assert_eq!(majlis.admin_adjust_diamonds(&uid("u1"), 25).unwrap().diamonds, 75);
        assert_eq!(majlis.admin_adjust_diamonds(&uid("u1"), -500).unwrap().diamonds, 0);
    }

    #[test]
    fn test_reset_coins_zeroes_coins_only() {
        let (majlis, _) = setup();
        let mut user = user_fixture("u1", "111111", 50);
        user.wallet.coins = 9;
        seed_user(&majlis, &user);
        majlis.reset_coins(&uid("u1")).unwrap();
        assert_eq!(load_user(&majlis, "u1").wallet, Wallet { diamonds: 50, coins: 0 });
        assert!(matches!(
            majlis.reset_coins(&uid("nobody")),
            Err(EconomyError::UserNotFound(_))
        ));
    }
}
