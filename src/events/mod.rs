use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

// Coupon lifecycle events published by the services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    CouponCreated(Uuid),
    CouponUpdated(Uuid),
    CouponDeleted(Uuid),
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        customer_id: Option<Uuid>,
        discount_amount: Option<Decimal>,
    },
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        if let Err(e) = LoggingHandler.handle_event(event.clone()).await {
            error!("Failed to handle event {:?}: {}", event, e);
        }
    }

    warn!("Event processing loop has ended");
}

struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        match event {
            Event::CouponCreated(id) => info!(coupon_id = %id, "coupon created"),
            Event::CouponUpdated(id) => info!(coupon_id = %id, "coupon updated"),
            Event::CouponDeleted(id) => info!(coupon_id = %id, "coupon deleted"),
            Event::CouponRedeemed {
                coupon_id,
                order_id,
                customer_id,
                discount_amount,
            } => info!(
                coupon_id = %coupon_id,
                order_id = %order_id,
                customer_id = ?customer_id,
                discount_amount = ?discount_amount,
                "coupon redeemed"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();

        sender.send(Event::CouponCreated(id)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::CouponCreated(id)));
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::CouponDeleted(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::CouponDeleted(Uuid::new_v4())).await;
    }
}
