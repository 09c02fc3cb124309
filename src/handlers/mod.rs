pub mod carts;
pub mod common;
pub mod coupons;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart_store::{CartStore, InMemoryCartStore},
    clock::Clock,
    coupons::CouponService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub coupons: Arc<CouponService>,
    pub carts: Arc<dyn CartStore>,
}

impl AppServices {
    /// Builds the services with an in-memory guest cart store.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        clock: Arc<dyn Clock>,
        guest_cart_ttl: chrono::Duration,
    ) -> Self {
        let carts: Arc<dyn CartStore> =
            Arc::new(InMemoryCartStore::with_clock(guest_cart_ttl, clock.clone()));
        Self::with_cart_store(db_pool, event_sender, clock, carts)
    }

    /// Builds the services around an existing cart store.
    pub fn with_cart_store(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        clock: Arc<dyn Clock>,
        carts: Arc<dyn CartStore>,
    ) -> Self {
        let coupons = Arc::new(CouponService::new(db_pool, event_sender, clock));
        Self { coupons, carts }
    }
}
