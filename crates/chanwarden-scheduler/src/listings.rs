//! Long-cycle jobs over tracked listings: member count refresh and housekeeping.

use std::sync::Arc;
use std::time::Duration;

use chanwarden_core::traits::{PersistenceGateway, TransportGateway};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub listings: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct ListingRefresher {
    store: Arc<dyn PersistenceGateway>,
    transport: Arc<dyn TransportGateway>,
    pacing: Duration,
}

impl ListingRefresher {
    pub fn new(
        store: Arc<dyn PersistenceGateway>,
        transport: Arc<dyn TransportGateway>,
        pacing: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            pacing,
        }
    }

    /// Pull the current member count of every tracked listing.
    pub async fn refresh_member_counts(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let listings = match self.store.list_tracked_listings().await {
            Ok(listings) => listings,
            Err(e) => {
                tracing::error!("❌ Listing query failed: {e}");
                return report;
            }
        };
        report.listings = listings.len();

        for (i, listing) in listings.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            let count = match self.transport.get_member_count(listing.channel_id).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(channel_id = listing.channel_id, "⚠️ Member count unavailable: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            match self
                .store
                .update_listing_members(listing.owner_id, count)
                .await
            {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    tracing::warn!(owner_id = listing.owner_id, "⚠️ Listing update failed: {e}");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "📊 Member counts refreshed: {}/{} listings",
            report.updated,
            report.listings
        );
        report
    }

    /// Consistency check. Logs only.
    pub async fn housekeeping(&self) -> usize {
        match self.store.list_tracked_listings().await {
            Ok(listings) => {
                tracing::info!("🧹 Housekeeping: {} tracked listings", listings.len());
                listings.len()
            }
            Err(e) => {
                tracing::warn!("⚠️ Housekeeping query failed: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Call, FakeGateway};

    fn refresher(fake: &Arc<FakeGateway>) -> ListingRefresher {
        ListingRefresher::new(fake.clone(), fake.clone(), Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_updates_counts() {
        let fake = Arc::new(FakeGateway::new());
        fake.add_listing(7, 100, 1500);
        fake.add_listing(8, 200, 42);

        let report = refresher(&fake).refresh_member_counts().await;

        assert_eq!(report.updated, 2);
        assert_eq!(fake.listing(7).unwrap().members_count, 1500);
        assert_eq!(fake.listing(8).unwrap().members_count, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_is_paced() {
        let fake = Arc::new(FakeGateway::new());
        fake.add_listing(7, 100, 1);
        fake.add_listing(8, 200, 2);

        refresher(&fake).refresh_member_counts().await;

        let times: Vec<_> = fake
            .timed_calls()
            .into_iter()
            .filter(|(_, c)| matches!(c, Call::GetMemberCount { .. }))
            .map(|(t, _)| t)
            .collect();
        assert!(times[1] - times[0] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_channel_does_not_stop_refresh() {
        let fake = Arc::new(FakeGateway::new());
        fake.add_unreachable_listing(7, 100);
        fake.add_listing(8, 200, 20);

        let report = refresher(&fake).refresh_member_counts().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(fake.listing(7).unwrap().members_count, 0);
        assert_eq!(fake.listing(8).unwrap().members_count, 20);
    }

    #[tokio::test]
    async fn test_housekeeping_counts_listings() {
        let fake = Arc::new(FakeGateway::new());
        fake.add_listing(7, 100, 10);
        assert_eq!(refresher(&fake).housekeeping().await, 1);

        fake.fail_storage(true);
        assert_eq!(refresher(&fake).housekeeping().await, 0);
    }
}
