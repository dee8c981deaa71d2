//! Cart ledger.
//!
//! One active cart per user at any time, created lazily on the first add.
//! A cart is closed (not deleted) when its payment completes, at which point
//! it becomes the historical order record and the next add opens a fresh one.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::{catalog::Food, error::AppError};

#[derive(Debug, Clone, Serialize)]
pub struct CartItem {
    pub id: u64,
    pub food_id: u64,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl CartItem {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Cart {
    pub id: u64,
    pub user_id: u64,
    pub active: bool,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn total(&self) -> Decimal {
        self.items.iter().map(CartItem::subtotal).sum()
    }

    /// Integer currency units for gateway submission; fractions truncate.
    pub fn total_cost(&self) -> i64 {
        self.total().trunc().to_i64().unwrap_or(0)
    }
}

#[derive(Default)]
struct Inner {
    carts: HashMap<u64, Cart>,
    active_by_user: HashMap<u64, u64>,
}

#[derive(Default, Clone)]
pub struct CartLedger {
    inner: Arc<RwLock<Inner>>,
    next_cart_id: Arc<AtomicU64>,
    next_item_id: Arc<AtomicU64>,
}

impl CartLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user's active cart, creating an empty one if none exists.
    pub async fn active_cart(&self, user_id: u64) -> Cart {
        let mut inner = self.inner.write().await;
        self.active_cart_locked(&mut inner, user_id).clone()
    }

    fn active_cart_locked<'a>(&self, inner: &'a mut Inner, user_id: u64) -> &'a mut Cart {
        let existing = inner
            .active_by_user
            .get(&user_id)
            .copied()
            .filter(|id| inner.carts.get(id).is_some_and(|c| c.active));

        let cart_id = match existing {
            Some(id) => id,
            None => {
                let now = Utc::now();
                let cart = Cart {
                    id: self.next_cart_id.fetch_add(1, Ordering::Relaxed) + 1,
                    user_id,
                    active: true,
                    items: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };

                let id = cart.id;
                inner.active_by_user.insert(user_id, id);
                inner.carts.insert(id, cart);
                id
            }
        };

        // Present by construction in both arms.
        inner.carts.get_mut(&cart_id).unwrap()
    }

    /// Adds `delta_qty` of a catalog item to the user's active cart,
    /// incrementing the line if it is already present.
    pub async fn add_item(
        &self,
        user_id: u64,
        food: &Food,
        delta_qty: u32,
    ) -> Result<Cart, AppError> {
        if !food.available {
            return Err(AppError::ItemUnavailable(food.name.clone()));
        }
        if delta_qty == 0 {
            return Err(AppError::InvalidQuantity);
        }

        let mut inner = self.inner.write().await;
        let item_id = self.next_item_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cart = self.active_cart_locked(&mut inner, user_id);

        match cart.items.iter_mut().find(|item| item.food_id == food.id) {
            Some(item) => item.quantity += delta_qty,
            None => cart.items.push(CartItem {
                id: item_id,
                food_id: food.id,
                name: food.name.clone(),
                unit_price: food.price,
                quantity: delta_qty,
                created_at: Utc::now(),
            }),
        }

        cart.updated_at = Utc::now();
        Ok(cart.clone())
    }

    pub async fn set_quantity(
        &self,
        user_id: u64,
        item_id: u64,
        quantity: u32,
    ) -> Result<Cart, AppError> {
        if quantity == 0 {
            return Err(AppError::InvalidQuantity);
        }

        let mut inner = self.inner.write().await;
        let cart = self.active_cart_locked(&mut inner, user_id);
        let item = cart
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or(AppError::RecordNotFound)?;

        item.quantity = quantity;
        cart.updated_at = Utc::now();
        Ok(cart.clone())
    }

    pub async fn remove_item(&self, user_id: u64, item_id: u64) -> Result<Cart, AppError> {
        let mut inner = self.inner.write().await;
        let cart = self.active_cart_locked(&mut inner, user_id);
        let before = cart.items.len();

        cart.items.retain(|item| item.id != item_id);
        if cart.items.len() == before {
            return Err(AppError::RecordNotFound);
        }

        cart.updated_at = Utc::now();
        Ok(cart.clone())
    }

    pub async fn clear(&self, user_id: u64) -> Cart {
        let mut inner = self.inner.write().await;
        let cart = self.active_cart_locked(&mut inner, user_id);

        cart.items.clear();
        cart.updated_at = Utc::now();
        cart.clone()
    }

    pub async fn get(&self, cart_id: u64) -> Option<Cart> {
        let inner = self.inner.read().await;
        inner.carts.get(&cart_id).cloned()
    }

    /// Flips the cart inactive. Re-checks the active flag under the lock, so
    /// a redelivered callback closing the same cart is a no-op.
    pub async fn close(&self, cart_id: u64) -> bool {
        let mut inner = self.inner.write().await;

        let Some(cart) = inner.carts.get_mut(&cart_id) else {
            return false;
        };
        if !cart.active {
            return false;
        }

        cart.active = false;
        cart.updated_at = Utc::now();

        let user_id = cart.user_id;
        if inner.active_by_user.get(&user_id) == Some(&cart_id) {
            inner.active_by_user.remove(&user_id);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn food(id: u64, price: Decimal, available: bool) -> Food {
        Food {
            id,
            name: format!("Food {id}"),
            description: String::new(),
            category: "Mains".to_string(),
            price,
            available,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn total_is_sum_of_subtotals() {
        let ledger = CartLedger::new();
        ledger.add_item(1, &food(1, dec!(350), true), 2).await.unwrap();
        let cart = ledger.add_item(1, &food(2, dec!(150), true), 1).await.unwrap();

        assert_eq!(cart.total(), dec!(850));
        assert_eq!(cart.total_cost(), 850);
    }

    #[tokio::test]
    async fn total_cost_truncates_fractions() {
        let ledger = CartLedger::new();
        let cart = ledger.add_item(1, &food(1, dec!(99.75), true), 1).await.unwrap();

        assert_eq!(cart.total(), dec!(99.75));
        assert_eq!(cart.total_cost(), 99);
    }

    #[tokio::test]
    async fn adding_same_food_increments_quantity() {
        let ledger = CartLedger::new();
        let item = food(1, dec!(100), true);
        ledger.add_item(1, &item, 1).await.unwrap();
        let cart = ledger.add_item(1, &item, 1).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn unavailable_item_is_rejected_without_mutation() {
        let ledger = CartLedger::new();
        let err = ledger.add_item(1, &food(1, dec!(100), false), 1).await;

        assert!(matches!(err, Err(AppError::ItemUnavailable(_))));
        assert!(ledger.active_cart(1).await.items.is_empty());
    }

    #[tokio::test]
    async fn one_active_cart_per_user() {
        let ledger = CartLedger::new();
        let first = ledger.active_cart(1).await;
        let again = ledger.active_cart(1).await;
        assert_eq!(first.id, again.id);

        let other = ledger.active_cart(2).await;
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_opens_a_fresh_cart() {
        let ledger = CartLedger::new();
        let cart = ledger.add_item(1, &food(1, dec!(100), true), 1).await.unwrap();

        assert!(ledger.close(cart.id).await);
        assert!(!ledger.close(cart.id).await);

        // Closed cart survives as the order record.
        let closed = ledger.get(cart.id).await.unwrap();
        assert!(!closed.active);
        assert_eq!(closed.items.len(), 1);

        let next = ledger.active_cart(1).await;
        assert_ne!(next.id, cart.id);
        assert!(next.items.is_empty());
    }

    #[tokio::test]
    async fn set_quantity_rejects_zero() {
        let ledger = CartLedger::new();
        let cart = ledger.add_item(1, &food(1, dec!(100), true), 1).await.unwrap();
        let item_id = cart.items[0].id;

        assert!(matches!(
            ledger.set_quantity(1, item_id, 0).await,
            Err(AppError::InvalidQuantity)
        ));

        let cart = ledger.set_quantity(1, item_id, 3).await.unwrap();
        assert_eq!(cart.items[0].quantity, 3);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let ledger = CartLedger::new();
        ledger.add_item(1, &food(1, dec!(100), true), 1).await.unwrap();
        let cart = ledger.add_item(1, &food(2, dec!(50), true), 1).await.unwrap();

        let cart = ledger.remove_item(1, cart.items[0].id).await.unwrap();
        assert_eq!(cart.items.len(), 1);

        assert!(matches!(
            ledger.remove_item(1, 999).await,
            Err(AppError::RecordNotFound)
        ));

        let cart = ledger.clear(1).await;
        assert!(cart.items.is_empty());
        assert_eq!(cart.total(), Decimal::ZERO);
    }
}
