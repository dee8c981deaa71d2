//! Menu catalog.
//!
//! Read store for the items customers browse and order. Dashboard CRUD over
//! the menu lives with the staff tooling, not here; this service only needs
//! lookups (price, availability) and the browse filters.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct Food {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price: Decimal,
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Default, Clone)]
pub struct Catalog {
    foods: Arc<RwLock<HashMap<u64, Food>>>,
    next_id: Arc<AtomicU64>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(
        &self,
        name: &str,
        description: &str,
        category: &str,
        price: Decimal,
        available: bool,
    ) -> Food {
        let food = Food {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            price,
            available,
            created_at: Utc::now(),
        };

        let mut foods = self.foods.write().await;
        foods.insert(food.id, food.clone());

        food
    }

    pub async fn get(&self, food_id: u64) -> Option<Food> {
        let foods = self.foods.read().await;
        foods.get(&food_id).cloned()
    }

    /// Available items, optionally narrowed by a name/description substring
    /// and a case-insensitive category match. Newest first.
    pub async fn browse(&self, search: Option<&str>, category: Option<&str>) -> Vec<Food> {
        let foods = self.foods.read().await;

        let mut matches: Vec<Food> = foods
            .values()
            .filter(|food| food.available)
            .filter(|food| {
                search.is_none_or(|query| {
                    let query = query.to_lowercase();
                    food.name.to_lowercase().contains(&query)
                        || food.description.to_lowercase().contains(&query)
                })
            })
            .filter(|food| category.is_none_or(|c| food.category.eq_ignore_ascii_case(c)))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.id.cmp(&a.id));
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn browse_hides_unavailable_and_filters() {
        let catalog = Catalog::new();
        catalog
            .add("Chips Masala", "Spiced fries", "Sides", dec!(150), true)
            .await;
        catalog
            .add("Pilau", "Spiced rice with beef", "Mains", dec!(350), true)
            .await;
        catalog
            .add("Ugali Special", "Out of season", "Mains", dec!(100), false)
            .await;

        let all = catalog.browse(None, None).await;
        assert_eq!(all.len(), 2);

        let spiced = catalog.browse(Some("spiced"), None).await;
        assert_eq!(spiced.len(), 2);

        let mains = catalog.browse(None, Some("mains")).await;
        assert_eq!(mains.len(), 1);
        assert_eq!(mains[0].name, "Pilau");
    }

    #[tokio::test]
    async fn browse_orders_newest_first() {
        let catalog = Catalog::new();
        catalog.add("A", "", "x", dec!(1), true).await;
        let b = catalog.add("B", "", "x", dec!(2), true).await;

        let foods = catalog.browse(None, None).await;
        assert_eq!(foods[0].id, b.id);
    }
}
