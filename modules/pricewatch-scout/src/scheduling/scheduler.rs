use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use pricewatch_common::TrackedProduct;

/// Decides which products are due for a check on this tick.
pub struct ProductScheduler {
    /// Cadence for products without their own interval.
    default_interval_minutes: u32,
}

pub struct ScheduleResult {
    pub due: Vec<ScheduledProduct>,
    /// Active products not yet due, or currently refreshing.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledProduct {
    pub id: Uuid,
    pub reason: ScheduleReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleReason {
    NeverChecked,
    /// Interval elapsed since the last check.
    Cadence,
}

impl ProductScheduler {
    pub fn new(default_interval_minutes: u32) -> Self {
        Self {
            default_interval_minutes: default_interval_minutes.max(1),
        }
    }

    pub fn schedule(&self, products: &[TrackedProduct], now: DateTime<Utc>) -> ScheduleResult {
        let mut due = Vec::new();
        let mut skipped = 0usize;

        for product in products.iter().filter(|p| p.is_active) {
            if product.is_refreshing {
                skipped += 1;
                continue;
            }
            let interval = product
                .check_interval_minutes
                .filter(|m| *m > 0)
                .unwrap_or(self.default_interval_minutes);

            match product.last_checked {
                None => due.push(ScheduledProduct {
                    id: product.id,
                    reason: ScheduleReason::NeverChecked,
                }),
                Some(last) if now - last >= Duration::minutes(i64::from(interval)) => {
                    due.push(ScheduledProduct {
                        id: product.id,
                        reason: ScheduleReason::Cadence,
                    })
                }
                Some(_) => skipped += 1,
            }
        }

        debug!(due = due.len(), skipped, "Schedule computed");
        ScheduleResult { due, skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(last_checked_mins_ago: Option<i64>, interval: Option<u32>) -> TrackedProduct {
        let mut p = TrackedProduct::new("https://shop.example/p/1", "Bougies");
        p.last_checked = last_checked_mins_ago.map(|m| Utc::now() - Duration::minutes(m));
        p.check_interval_minutes = interval;
        p
    }

    #[test]
    fn never_checked_is_due() {
        let result = ProductScheduler::new(60).schedule(&[product(None, None)], Utc::now());
        assert_eq!(result.due[0].reason, ScheduleReason::NeverChecked);
    }

    #[test]
    fn per_product_interval_overrides_default() {
        let products = [product(Some(20), Some(15)), product(Some(20), None)];
        let result = ProductScheduler::new(60).schedule(&products, Utc::now());
        assert_eq!(result.due.len(), 1);
        assert_eq!(result.due[0].id, products[0].id);
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn refreshing_and_inactive_are_excluded() {
        let mut busy = product(None, None);
        busy.is_refreshing = true;
        let mut paused = product(None, None);
        paused.is_active = false;

        let result = ProductScheduler::new(60).schedule(&[busy, paused], Utc::now());
        assert!(result.due.is_empty());
        assert_eq!(result.skipped, 1);
    }
}
