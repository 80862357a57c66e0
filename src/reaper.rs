use crate::ebay::browse::{Availability, Marketplace};
use crate::models::SweepSummary;
use crate::store::Store;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Items untouched for this many days get their availability re-checked.
pub const DEFAULT_STALE_DAYS: i64 = 7;

pub struct StaleItemReaper {
    store: Store,
    market: Arc<dyn Marketplace>,
}

impl StaleItemReaper {
    pub fn new(store: Store, market: Arc<dyn Marketplace>) -> Self {
        Self { store, market }
    }

    /// Re-checks every stale item: still in stock → refresh `updated_at`,
    /// gone → delete, check failed → leave it for the next sweep. An
    /// ambiguous answer never deletes.
    pub async fn sweep(&self, stale_days: i64) -> SweepSummary {
        let cutoff = Utc::now() - Duration::days(stale_days);
        let mut summary = SweepSummary::default();

        let stale = match self.store.stale_items(cutoff).await {
            Ok(stale) => stale,
            Err(err) => {
                error!(target: "charityshop.reaper", error = %err, "stale item query failed");
                return summary;
            }
        };

        for item in stale {
            summary.examined += 1;
            match self.market.item_availability(&item.ebay_id).await {
                Ok(Availability::Active) => match self.store.touch_item(item.id).await {
                    Ok(()) => summary.refreshed += 1,
                    Err(err) => {
                        warn!(
                            target: "charityshop.reaper",
                            ebay_id = %item.ebay_id,
                            error = %err,
                            "failed to refresh item"
                        );
                        summary.errored += 1;
                    }
                },
                Ok(Availability::Inactive) => match self.store.delete_item(item.id).await {
                    Ok(_) => summary.deleted += 1,
                    Err(err) => {
                        warn!(
                            target: "charityshop.reaper",
                            ebay_id = %item.ebay_id,
                            error = %err,
                            "failed to delete inactive item"
                        );
                        summary.errored += 1;
                    }
                },
                Err(err) => {
                    warn!(
                        target: "charityshop.reaper",
                        ebay_id = %item.ebay_id,
                        error = %err,
                        "availability check failed, leaving item untouched"
                    );
                    summary.errored += 1;
                }
            }
        }

        info!(
            target: "charityshop.reaper",
            examined = summary.examined,
            refreshed = summary.refreshed,
            deleted = summary.deleted,
            errored = summary.errored,
            "sweep finished"
        );
        crate::metrics::sweep_counters(
            summary.examined,
            summary.refreshed,
            summary.deleted,
            summary.errored,
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::browse::BrowseError;
    use crate::models::{AdditionalImages, CategoryRef, NewItem};
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Clone, Copy)]
    enum Scripted {
        Active,
        Inactive,
        Fails,
    }

    struct AvailabilityMap {
        outcomes: HashMap<String, Scripted>,
    }

    #[async_trait]
    impl Marketplace for AvailabilityMap {
        async fn search_by_charity(
            &self,
            _charity_id: i64,
            _cursor: Option<&str>,
        ) -> Result<crate::ebay::browse::SearchPage, BrowseError> {
            Err(BrowseError::Request("not scripted".to_string()))
        }

        async fn item_availability(&self, item_id: &str) -> Result<Availability, BrowseError> {
            match self.outcomes.get(item_id) {
                Some(Scripted::Active) => Ok(Availability::Active),
                Some(Scripted::Inactive) => Ok(Availability::Inactive),
                _ => Err(BrowseError::MalformedAvailability),
            }
        }
    }

    fn sample_item(ebay_id: &str) -> NewItem {
        NewItem {
            ebay_id: ebay_id.to_string(),
            name: "Vintage Book".to_string(),
            price: 9.99,
            shipping_price: None,
            img_url: None,
            additional_images: AdditionalImages::default(),
            web_url: "https://ebay.com/itm/1".to_string(),
            charity_id: 281,
            category: "Fiction".to_string(),
            category_list: vec![
                CategoryRef {
                    category_id: None,
                    category_name: "Books".to_string(),
                },
                CategoryRef {
                    category_id: None,
                    category_name: "Fiction".to_string(),
                },
            ],
            item_location: None,
            condition: None,
            seller: None,
        }
    }

    async fn seeded_store(ids: &[&str], stale: bool) -> Store {
        let store = Store::memory().await.expect("store");
        store
            .upsert_charity(281, "Test Charity", "for testing")
            .await
            .expect("charity");
        let batch: Vec<NewItem> = ids.iter().map(|id| sample_item(id)).collect();
        store.insert_items(&batch).await.expect("insert");
        if stale {
            for id in ids {
                store
                    .backdate_item(id, Utc::now() - Duration::days(10))
                    .await
                    .expect("backdate");
            }
        }
        store
    }

    #[tokio::test]
    async fn sweep_refreshes_deletes_and_spares_per_status() {
        let store = seeded_store(&["id-active", "id-gone", "id-odd"], true).await;
        let market = Arc::new(AvailabilityMap {
            outcomes: HashMap::from([
                ("id-active".to_string(), Scripted::Active),
                ("id-gone".to_string(), Scripted::Inactive),
                ("id-odd".to_string(), Scripted::Fails),
            ]),
        });

        let summary = StaleItemReaper::new(store.clone(), market)
            .sweep(DEFAULT_STALE_DAYS)
            .await;

        assert_eq!(summary.examined, 3);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.errored, 1);

        // Active item survives with a fresh timestamp.
        let cutoff = Utc::now() - Duration::days(DEFAULT_STALE_DAYS);
        let still_stale = store.stale_items(cutoff).await.expect("stale");
        assert_eq!(still_stale.len(), 1);
        assert_eq!(still_stale[0].ebay_id, "id-odd");

        // Inactive item is gone, ambiguous one is untouched.
        assert!(
            store
                .get_item_by_ebay_id("id-gone")
                .await
                .expect("query")
                .is_none()
        );
        assert!(
            store
                .get_item_by_ebay_id("id-odd")
                .await
                .expect("query")
                .is_some()
        );
    }

    #[tokio::test]
    async fn fresh_items_are_not_examined() {
        let store = seeded_store(&["id-fresh"], false).await;
        let market = Arc::new(AvailabilityMap {
            outcomes: HashMap::from([("id-fresh".to_string(), Scripted::Inactive)]),
        });

        let summary = StaleItemReaper::new(store.clone(), market)
            .sweep(DEFAULT_STALE_DAYS)
            .await;

        assert_eq!(summary.examined, 0);
        assert_eq!(summary.deleted, 0);
        assert!(
            store
                .get_item_by_ebay_id("id-fresh")
                .await
                .expect("query")
                .is_some()
        );
    }
}
