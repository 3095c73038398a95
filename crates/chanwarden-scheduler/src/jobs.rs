//! Wiring of the recurring core jobs onto a [`JobScheduler`].

use std::sync::Arc;
use std::time::Duration;

use chanwarden_core::config::{ChanwardenConfig, SchedulerConfig};
use chanwarden_core::error::Result;
use chanwarden_core::traits::{PersistenceGateway, TransportGateway};
use chrono::Utc;

use crate::engine::JobScheduler;
use crate::lifecycle::LifecycleManager;
use crate::listings::ListingRefresher;
use crate::notify::{RateLimitedNotifier, ThrottlePolicy};
use crate::publish::PublicationPipeline;

pub const EXPIRY_SWEEP: &str = "expiry_sweep";
pub const POST_PUBLICATION: &str = "post_publication";
pub const METRIC_REFRESH: &str = "metric_refresh";
pub const HOUSEKEEPING: &str = "housekeeping";

/// The components driven by the scheduler, sharing one notifier.
#[derive(Clone)]
pub struct CoreJobs {
    pub lifecycle: Arc<LifecycleManager>,
    pub publication: Arc<PublicationPipeline>,
    pub listings: Arc<ListingRefresher>,
    pub notifier: Arc<RateLimitedNotifier>,
}

impl CoreJobs {
    pub fn new(
        store: Arc<dyn PersistenceGateway>,
        transport: Arc<dyn TransportGateway>,
        config: &ChanwardenConfig,
    ) -> Self {
        let notifier = Arc::new(RateLimitedNotifier::new(
            transport.clone(),
            ThrottlePolicy::from(&config.notifier),
        ));
        let scheduler = &config.scheduler;
        Self {
            lifecycle: Arc::new(LifecycleManager::new(
                store.clone(),
                transport.clone(),
                notifier.clone(),
                scheduler.sweep_pacing(),
            )),
            publication: Arc::new(PublicationPipeline::new(
                store.clone(),
                transport.clone(),
                notifier.clone(),
                scheduler.publication_pacing(),
            )),
            listings: Arc::new(ListingRefresher::new(
                store,
                transport,
                scheduler.metric_refresh_pacing(),
            )),
            notifier,
        }
    }

    /// Register the four recurring jobs at their configured cadence.
    pub fn register(&self, scheduler: &mut JobScheduler, config: &SchedulerConfig) -> Result<()> {
        let lifecycle = self.lifecycle.clone();
        scheduler.register_job(EXPIRY_SWEEP, secs(config.expiry_sweep_secs), move || {
            let lifecycle = lifecycle.clone();
            async move {
                lifecycle.sweep(Utc::now()).await;
            }
        })?;

        let publication = self.publication.clone();
        scheduler.register_job(POST_PUBLICATION, secs(config.post_publication_secs), move || {
            let publication = publication.clone();
            async move {
                publication.run(Utc::now()).await;
            }
        })?;

        let listings = self.listings.clone();
        scheduler.register_job(METRIC_REFRESH, secs(config.metric_refresh_secs), move || {
            let listings = listings.clone();
            async move {
                listings.refresh_member_counts().await;
            }
        })?;

        let listings = self.listings.clone();
        scheduler.register_job(HOUSEKEEPING, secs(config.housekeeping_secs), move || {
            let listings = listings.clone();
            async move {
                listings.housekeeping().await;
            }
        })?;

        Ok(())
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
