use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use pricewatch_common::ExtractionSettings;

use super::scheduler::ProductScheduler;
use crate::pipeline::{ExtractError, ExtractionCoordinator};
use crate::ScoutDeps;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub failed: usize,
    /// Claimed by someone else between scheduling and claiming.
    pub busy: usize,
    pub not_due: usize,
}

/// Periodic driver: every tick resolves settings once, picks the due
/// products and checks them with bounded concurrency.
pub struct TickLoop {
    deps: ScoutDeps,
    coordinator: Arc<ExtractionCoordinator>,
    max_concurrent: usize,
}

impl TickLoop {
    pub fn new(deps: ScoutDeps, max_concurrent: usize) -> Self {
        let coordinator = Arc::new(ExtractionCoordinator::new(deps.clone()));
        Self {
            deps,
            coordinator,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let raw = self.deps.store.load_settings().await?;
        let settings =
            ExtractionSettings::from_settings(&raw).context("resolving extraction settings")?;
        let products = self.deps.store.list_products().await?;
        let schedule = ProductScheduler::new(settings.refresh_interval_minutes)
            .schedule(&products, Utc::now());

        let mut report = TickReport {
            not_due: schedule.skipped,
            ..TickReport::default()
        };
        if schedule.due.is_empty() {
            return Ok(report);
        }
        info!(due = schedule.due.len(), "Checking due products");

        let settings = &settings;
        let outcomes: Vec<_> = stream::iter(schedule.due)
            .map(|s| {
                let coordinator = self.coordinator.clone();
                async move {
                    let product = coordinator.claim(s.id).await?;
                    coordinator.run_isolated(product, settings.clone()).await
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(_) => report.checked += 1,
                Err(ExtractError::AlreadyRefreshing(_)) => report.busy += 1,
                Err(_) => report.failed += 1,
            }
        }
        info!(
            checked = report.checked,
            failed = report.failed,
            busy = report.busy,
            not_due = report.not_due,
            "Tick complete"
        );
        Ok(report)
    }

    /// Tick every `every` until `shutdown` resolves. A failing tick is logged
    /// and the loop carries on.
    pub async fn run(&self, every: Duration, shutdown: impl Future<Output = ()>) {
        let cleared = match self.deps.store.clear_stale_refresh_flags().await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Failed to clear stale refresh flags");
                0
            }
        };
        if cleared > 0 {
            warn!(cleared, "Cleared refresh flags left by a previous run");
        }

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping tick loop");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Tick failed");
                    }
                }
            }
        }
    }
}
