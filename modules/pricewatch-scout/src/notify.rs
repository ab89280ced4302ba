use anyhow::Result;
use async_trait::async_trait;
use pricewatch_common::{NotificationEvent, NotificationReason, TrackedProduct};
use tracing::info;

use crate::traits::Notifier;

/// Minimum drop, in percent, worth a price-drop alert.
pub const PRICE_DROP_PERCENT: f64 = 5.0;

/// Alerts implied by moving `before` to the newly accepted values.
///
/// A target hit takes precedence over a plain drop; back-in-stock is
/// independent of price.
pub fn price_events(
    before: &TrackedProduct,
    new_price: Option<f64>,
    new_stock: Option<bool>,
) -> Vec<NotificationEvent> {
    let mut events = Vec::new();
    let old_price = before.current_price;
    let event = |reason| NotificationEvent {
        product_id: before.id,
        product_name: before.name.clone(),
        url: before.url.clone(),
        old_price,
        new_price,
        reason,
    };

    if let Some(price) = new_price {
        match (before.target_price, old_price) {
            (Some(target), old) if price <= target && old.map_or(true, |o| o > target) => {
                events.push(event(NotificationReason::TargetReached { target }));
            }
            (Some(target), _) if price <= target => {}
            (_, Some(old)) if old > 0.0 && price < old => {
                let percent = (old - price) / old * 100.0;
                if percent >= PRICE_DROP_PERCENT {
                    events.push(event(NotificationReason::PriceDrop {
                        percent: (percent * 10.0).round() / 10.0,
                    }));
                }
            }
            _ => {}
        }
    }

    if before.in_stock == Some(false) && new_stock == Some(true) {
        events.push(event(NotificationReason::BackInStock));
    }
    events
}

/// Writes alerts to the log. Stand-in sink for the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        info!(
            product_id = %event.product_id,
            product = event.product_name.as_str(),
            url = event.url.as_str(),
            old_price = ?event.old_price,
            new_price = ?event.new_price,
            reason = ?event.reason,
            "Price alert"
        );
        Ok(())
    }
}
