use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::services::clock::Clock;
use crate::services::coupons::evaluator::CartLine;

/// Guest shopping cart keyed by the storefront session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GuestCart {
    pub session_id: String,
    pub items: Vec<CartLine>,
    /// Bumped on every write; used for compare-and-set updates
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Storage for guest carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the cart for a session, or `None` when absent or expired.
    async fn get(&self, session_id: &str) -> Result<Option<GuestCart>, ServiceError>;

    /// Replaces the cart contents. When `expected_version` is given the write
    /// only succeeds if the stored version matches (an absent cart has version 0).
    async fn set(
        &self,
        session_id: &str,
        items: Vec<CartLine>,
        expected_version: Option<u64>,
    ) -> Result<GuestCart, ServiceError>;

    async fn clear(&self, session_id: &str) -> Result<(), ServiceError>;

    /// Drops every cart that has been idle longer than the TTL.
    async fn evict_expired(&self) -> usize;
}

pub struct InMemoryCartStore {
    carts: DashMap<String, GuestCart>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryCartStore {
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            carts: DashMap::new(),
            ttl,
            clock,
        }
    }

    fn is_expired(&self, cart: &GuestCart, now: DateTime<Utc>) -> bool {
        now - cart.updated_at >= self.ttl
    }

    pub fn len(&self) -> usize {
        self.carts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carts.is_empty()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get(&self, session_id: &str) -> Result<Option<GuestCart>, ServiceError> {
        let now = self.clock.now();
        let expired = match self.carts.get(session_id) {
            Some(cart) if !self.is_expired(&cart, now) => return Ok(Some(cart.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.carts
                .remove_if(session_id, |_, cart| self.is_expired(cart, now));
            debug!(session_id, "evicted expired guest cart");
        }
        Ok(None)
    }

    async fn set(
        &self,
        session_id: &str,
        items: Vec<CartLine>,
        expected_version: Option<u64>,
    ) -> Result<GuestCart, ServiceError> {
        let now = self.clock.now();
        match self.carts.entry(session_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = if self.is_expired(occupied.get(), now) {
                    0
                } else {
                    occupied.get().version
                };
                if let Some(expected) = expected_version {
                    if expected != current {
                        return Err(ServiceError::Conflict(format!(
                            "Cart version mismatch: expected {}, found {}",
                            expected, current
                        )));
                    }
                }
                let cart = GuestCart {
                    session_id: session_id.to_string(),
                    items,
                    version: current + 1,
                    updated_at: now,
                };
                occupied.insert(cart.clone());
                Ok(cart)
            }
            Entry::Vacant(vacant) => {
                if let Some(expected) = expected_version {
                    if expected != 0 {
                        return Err(ServiceError::Conflict(format!(
                            "Cart version mismatch: expected {}, found 0",
                            expected
                        )));
                    }
                }
                let cart = GuestCart {
                    session_id: session_id.to_string(),
                    items,
                    version: 1,
                    updated_at: now,
                };
                vacant.insert(cart.clone());
                Ok(cart)
            }
        }
    }

    async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        self.carts.remove(session_id);
        Ok(())
    }

    async fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.carts.len();
        self.carts.retain(|_, cart| now - cart.updated_at < self.ttl);
        before.saturating_sub(self.carts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::FixedClock;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn line(product_id: i64) -> CartLine {
        CartLine {
            product_id,
            category_id: None,
            price: dec!(10.00),
            quantity: 1,
        }
    }

    fn store() -> (InMemoryCartStore, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        let store = InMemoryCartStore::with_clock(Duration::minutes(30), Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn versions_increase_on_every_write() {
        let (store, _) = store();
        let first = store.set("s1", vec![line(1)], None).await.unwrap();
        assert_eq!(first.version, 1);

        let second = store.set("s1", vec![line(2)], Some(1)).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(store.get("s1").await.unwrap().unwrap().items, vec![line(2)]);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_cart_untouched() {
        let (store, _) = store();
        store.set("s1", vec![line(1)], None).await.unwrap();
        store.set("s1", vec![line(2)], Some(1)).await.unwrap();

        let result = store.set("s1", vec![line(3)], Some(1)).await;
        assert_matches!(result, Err(ServiceError::Conflict(_)));

        let cart = store.get("s1").await.unwrap().unwrap();
        assert_eq!(cart.version, 2);
        assert_eq!(cart.items, vec![line(2)]);
    }

    #[tokio::test]
    async fn absent_cart_has_version_zero() {
        let (store, _) = store();
        assert_matches!(
            store.set("new", vec![], Some(3)).await,
            Err(ServiceError::Conflict(_))
        );
        assert_eq!(store.set("new", vec![], Some(0)).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn idle_carts_expire() {
        let (store, clock) = store();
        store.set("s1", vec![line(1)], None).await.unwrap();

        clock.advance(Duration::minutes(29));
        assert!(store.get("s1").await.unwrap().is_some());

        clock.advance(Duration::minutes(1));
        assert!(store.get("s1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn evict_expired_keeps_fresh_carts() {
        let (store, clock) = store();
        store.set("old", vec![line(1)], None).await.unwrap();
        clock.advance(Duration::minutes(20));
        store.set("fresh", vec![line(2)], None).await.unwrap();
        clock.advance(Duration::minutes(15));

        assert_eq!(store.evict_expired().await, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_removes_cart() {
        let (store, _) = store();
        store.set("s1", vec![line(1)], None).await.unwrap();
        store.clear("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
        store.clear("missing").await.unwrap();
    }
}
