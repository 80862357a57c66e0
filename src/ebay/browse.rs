use crate::ebay::auth::{EbayAuthError, get_app_access_token};
use crate::ebay::config::{BROWSE_SCOPE, ROOT, SEARCH_LIMIT, SEARCH_OFFSET};
use crate::http::build_client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("{0}")]
    Auth(#[from] EbayAuthError),
    #[error("{0}")]
    Request(String),
    #[error("availability response missing estimatedAvailabilities")]
    MalformedAvailability,
}

/// One page of charity search results. `item_summaries` stays `None` when the
/// response carried no `itemSummaries` key at all, which is distinct from an
/// empty page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub item_summaries: Option<Vec<RawItem>>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub price: Option<RawPrice>,
    #[serde(default)]
    pub item_web_url: Option<String>,
    #[serde(default)]
    pub categories: Vec<RawCategory>,
    #[serde(default)]
    pub adult_only: bool,
    #[serde(default)]
    pub shipping_options: Vec<RawShippingOption>,
    #[serde(default)]
    pub thumbnail_images: Vec<RawImage>,
    #[serde(default)]
    pub additional_images: Vec<RawImage>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub item_location: Option<Value>,
    #[serde(default)]
    pub seller: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPrice {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCategory {
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawShippingOption {
    #[serde(default)]
    pub shipping_cost: Option<RawPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawImage {
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDetail {
    #[serde(default)]
    estimated_availabilities: Vec<EstimatedAvailability>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimatedAvailability {
    #[serde(default)]
    estimated_availability_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Active,
    Inactive,
}

/// Marketplace operations the pipeline and reaper consume. Implemented by
/// [`BrowseClient`] for real traffic and by scripted fakes in tests.
#[async_trait]
pub trait Marketplace: Send + Sync {
    async fn search_by_charity(
        &self,
        charity_id: i64,
        cursor: Option<&str>,
    ) -> Result<SearchPage, BrowseError>;

    async fn item_availability(&self, item_id: &str) -> Result<Availability, BrowseError>;
}

#[derive(Clone, Default)]
pub struct BrowseClient;

impl BrowseClient {
    pub fn new() -> Self {
        Self
    }
}

/// Search URL of the first page for a charity. The offset is a fixed constant
/// of this initial query; follow-up pages come from the `next` URL the server
/// returns.
pub fn initial_search_url(charity_id: i64) -> String {
    format!(
        "{}/buy/browse/v1/item_summary/search?limit={}&offset={}&charity_ids={}",
        *ROOT, SEARCH_LIMIT, SEARCH_OFFSET, charity_id
    )
}

#[async_trait]
impl Marketplace for BrowseClient {
    async fn search_by_charity(
        &self,
        charity_id: i64,
        cursor: Option<&str>,
    ) -> Result<SearchPage, BrowseError> {
        let token = get_app_access_token(&[BROWSE_SCOPE]).await?;
        let url = match cursor {
            Some(next) => next.to_string(),
            None => initial_search_url(charity_id),
        };
        debug!(target: "charityshop.ebay", charity_id, %url, "charity search request");

        let client = build_client();
        let response = client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| BrowseError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(BrowseError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json::<SearchPage>()
            .await
            .map_err(|err| BrowseError::Request(err.to_string()))
    }

    async fn item_availability(&self, item_id: &str) -> Result<Availability, BrowseError> {
        let token = get_app_access_token(&[BROWSE_SCOPE]).await?;
        let url = format!("{}/buy/browse/v1/item/{}", *ROOT, encode(item_id));

        let client = build_client();
        let response = client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| BrowseError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(BrowseError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let detail: ItemDetail = response
            .json()
            .await
            .map_err(|err| BrowseError::Request(err.to_string()))?;
        availability_from_detail(&detail)
    }
}

fn availability_from_detail(detail: &ItemDetail) -> Result<Availability, BrowseError> {
    let status = detail
        .estimated_availabilities
        .first()
        .and_then(|entry| entry.estimated_availability_status.as_deref())
        .ok_or(BrowseError::MalformedAvailability)?;
    if status == "IN_STOCK" {
        Ok(Availability::Active)
    } else {
        Ok(Availability::Inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail_with_status(status: &str) -> ItemDetail {
        ItemDetail {
            estimated_availabilities: vec![EstimatedAvailability {
                estimated_availability_status: Some(status.to_string()),
            }],
        }
    }

    #[test]
    fn initial_url_carries_fixed_limit_and_offset() {
        let url = initial_search_url(281);
        assert!(url.contains("/buy/browse/v1/item_summary/search"));
        assert!(url.ends_with("limit=200&offset=200&charity_ids=281"));
    }

    #[test]
    fn page_without_item_summaries_key_stays_none() {
        let page: SearchPage = serde_json::from_str("{}").expect("decode");
        assert!(page.item_summaries.is_none());
        assert!(page.next.is_none());
    }

    #[test]
    fn page_with_empty_item_summaries_is_some() {
        let page: SearchPage = serde_json::from_str(r#"{"itemSummaries": []}"#).expect("decode");
        let items = page.item_summaries.expect("key present");
        assert!(items.is_empty());
    }

    #[test]
    fn raw_item_decodes_optional_fields() {
        let raw = r#"{
            "itemId": "v1|111|0",
            "title": "Vintage Book",
            "price": {"value": "9.99", "currency": "USD"},
            "itemWebUrl": "https://ebay.com/itm/111",
            "categories": [
                {"categoryId": "1", "categoryName": "Books"},
                {"categoryId": "2", "categoryName": "Fiction"}
            ],
            "shippingOptions": [{"shippingCost": {"value": "3.50"}}],
            "thumbnailImages": [{"imageUrl": "https://img.ebay.com/1.jpg"}],
            "condition": "Good",
            "seller": {"username": "shop"}
        }"#;
        let item: RawItem = serde_json::from_str(raw).expect("decode");
        assert_eq!(item.item_id.as_deref(), Some("v1|111|0"));
        assert!(!item.adult_only);
        assert_eq!(item.categories.len(), 2);
        assert_eq!(
            item.shipping_options[0]
                .shipping_cost
                .as_ref()
                .and_then(|cost| cost.value.as_deref()),
            Some("3.50")
        );
        assert!(item.additional_images.is_empty());
        assert!(item.item_location.is_none());
    }

    #[test]
    fn in_stock_maps_to_active() {
        let detail = detail_with_status("IN_STOCK");
        assert_eq!(
            availability_from_detail(&detail).expect("status"),
            Availability::Active
        );
    }

    #[test]
    fn known_non_stock_statuses_map_to_inactive() {
        for status in ["OUT_OF_STOCK", "LIMITED_STOCK", "UNAVAILABLE", "DISCONTINUED"] {
            let detail = detail_with_status(status);
            assert_eq!(
                availability_from_detail(&detail).expect("status"),
                Availability::Inactive,
                "status {status}"
            );
        }
    }

    #[test]
    fn missing_availability_entries_are_an_error() {
        let detail = ItemDetail {
            estimated_availabilities: vec![],
        };
        assert!(matches!(
            availability_from_detail(&detail),
            Err(BrowseError::MalformedAvailability)
        ));

        let detail: ItemDetail = serde_json::from_str("{}").expect("decode");
        assert!(matches!(
            availability_from_detail(&detail),
            Err(BrowseError::MalformedAvailability)
        ));
    }
}
