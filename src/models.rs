use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;

/// A charity whose id is assigned by the marketplace, not by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charity {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRef {
    #[serde(default)]
    pub category_id: Option<String>,
    pub category_name: String,
}

/// Container shape the additional-image list is persisted under, so an item
/// without extras still round-trips as `{"additionalImages": []}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalImages {
    #[serde(default)]
    pub additional_images: Vec<ImageRef>,
}

/// A normalized item ready for persistence. `charity_id` is a plain foreign
/// key value, resolved by the store at save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub ebay_id: String,
    pub name: String,
    pub price: f64,
    pub shipping_price: Option<f64>,
    pub img_url: Option<String>,
    pub additional_images: AdditionalImages,
    pub web_url: String,
    pub charity_id: i64,
    pub category: String,
    pub category_list: Vec<CategoryRef>,
    pub item_location: Option<Value>,
    pub condition: Option<String>,
    pub seller: Option<Value>,
}

pub const NAME_MAX_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("name exceeds {NAME_MAX_LEN} characters")]
    NameTooLong,
    #[error("price must be a finite non-negative number")]
    InvalidPrice,
}

impl NewItem {
    /// Checked independently per record at save time; a failing record is
    /// excluded from the batch without aborting it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ebay_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("ebay_id"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        if self.name.chars().count() > NAME_MAX_LEN {
            return Err(ValidationError::NameTooLong);
        }
        if self.web_url.trim().is_empty() {
            return Err(ValidationError::EmptyField("web_url"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ValidationError::InvalidPrice);
        }
        Ok(())
    }
}

/// A stored item as served back out of the store.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub ebay_id: String,
    pub name: String,
    pub price: f64,
    pub shipping_price: Option<f64>,
    pub img_url: Option<String>,
    pub additional_images: AdditionalImages,
    pub web_url: String,
    pub charity_id: i64,
    pub category: String,
    pub category_list: Vec<CategoryRef>,
    pub item_location: Option<Value>,
    pub condition: Option<String>,
    pub seller: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one ingestion run. `result` follows the job-executor contract:
/// "success", "success - no items", or the error message that ended the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub charity_id: i64,
    pub result: String,
    pub processed: u64,
    pub saved: u64,
    pub skipped: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.result.starts_with("success")
    }
}

/// Outcome of one reaper sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepSummary {
    pub examined: u64,
    pub refreshed: u64,
    pub deleted: u64,
    pub errored: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
