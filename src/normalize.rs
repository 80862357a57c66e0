use crate::ebay::browse::RawItem;
use crate::filter::is_allowed;
use crate::models::{AdditionalImages, CategoryRef, ImageRef, NewItem};
use tracing::debug;

/// Maps a raw marketplace record into a [`NewItem`]. Returns `None` when the
/// record is filtered out or missing something required; the caller counts
/// that as skipped.
pub fn normalize(raw: &RawItem, charity_id: i64) -> Option<NewItem> {
    let Some(title) = raw.title.as_deref() else {
        debug!(target: "charityshop.ingest", "raw item without title skipped");
        return None;
    };
    if !is_allowed(title, raw.adult_only) {
        debug!(target: "charityshop.ingest", title, "raw item rejected by content filter");
        return None;
    }

    let Some(ebay_id) = raw.item_id.clone() else {
        debug!(target: "charityshop.ingest", title, "raw item without itemId skipped");
        return None;
    };
    let Some(web_url) = raw.item_web_url.clone() else {
        debug!(target: "charityshop.ingest", %ebay_id, "raw item without itemWebUrl skipped");
        return None;
    };
    let Some(price) = raw
        .price
        .as_ref()
        .and_then(|price| price.value.as_deref())
        .and_then(|value| value.parse::<f64>().ok())
    else {
        debug!(target: "charityshop.ingest", %ebay_id, "raw item without usable price skipped");
        return None;
    };

    // The display category is the second entry of the category path; a path
    // shorter than that disqualifies the item.
    let Some(category) = raw
        .categories
        .get(1)
        .and_then(|entry| entry.category_name.clone())
    else {
        debug!(target: "charityshop.ingest", %ebay_id, "category path shorter than 2 entries, skipped");
        return None;
    };

    let shipping_price = raw
        .shipping_options
        .first()
        .and_then(|option| option.shipping_cost.as_ref())
        .and_then(|cost| cost.value.as_deref())
        .and_then(|value| value.parse::<f64>().ok());

    let img_url = raw
        .thumbnail_images
        .first()
        .and_then(|image| image.image_url.clone());

    let additional_images = AdditionalImages {
        additional_images: raw
            .additional_images
            .iter()
            .filter_map(|image| image.image_url.clone())
            .map(|image_url| ImageRef { image_url })
            .collect(),
    };

    let category_list = raw
        .categories
        .iter()
        .filter_map(|entry| {
            entry.category_name.clone().map(|category_name| CategoryRef {
                category_id: entry.category_id.clone(),
                category_name,
            })
        })
        .collect();

    Some(NewItem {
        ebay_id,
        name: title.to_string(),
        price,
        shipping_price,
        img_url,
        additional_images,
        web_url,
        charity_id,
        category,
        category_list,
        item_location: raw.item_location.clone(),
        condition: raw.condition.clone(),
        seller: raw.seller.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_item(overrides: impl FnOnce(&mut serde_json::Value)) -> RawItem {
        let mut value = json!({
            "itemId": "v1|111|0",
            "title": "Vintage Book",
            "price": {"value": "9.99", "currency": "USD"},
            "itemWebUrl": "https://ebay.com/itm/111",
            "categories": [
                {"categoryId": "1", "categoryName": "Books"},
                {"categoryId": "2", "categoryName": "Fiction"}
            ],
            "adultOnly": false,
            "shippingOptions": [{"shippingCost": {"value": "3.50"}}],
            "thumbnailImages": [{"imageUrl": "https://img.ebay.com/1.jpg"}],
            "additionalImages": [
                {"imageUrl": "https://img.ebay.com/2.jpg"},
                {"imageUrl": "https://img.ebay.com/3.jpg"}
            ],
            "condition": "Good",
            "itemLocation": {"postalCode": "SW1", "country": "GB"},
            "seller": {"username": "shop", "feedbackPercentage": "99.1"}
        });
        overrides(&mut value);
        serde_json::from_value(value).expect("raw item")
    }

    #[test]
    fn complete_item_normalizes_with_all_optionals() {
        let item = normalize(&raw_item(|_| {}), 281).expect("normalized");
        assert_eq!(item.ebay_id, "v1|111|0");
        assert_eq!(item.name, "Vintage Book");
        assert_eq!(item.price, 9.99);
        assert_eq!(item.shipping_price, Some(3.50));
        assert_eq!(item.img_url.as_deref(), Some("https://img.ebay.com/1.jpg"));
        assert_eq!(item.additional_images.additional_images.len(), 2);
        assert_eq!(item.charity_id, 281);
        assert_eq!(item.category, "Fiction");
        assert_eq!(item.category_list.len(), 2);
        assert_eq!(item.condition.as_deref(), Some("Good"));
        assert!(item.item_location.is_some());
        assert!(item.seller.is_some());
    }

    #[test]
    fn adult_only_returns_none() {
        let raw = raw_item(|v| v["adultOnly"] = json!(true));
        assert!(normalize(&raw, 281).is_none());
    }

    #[test]
    fn denylisted_title_returns_none() {
        let raw = raw_item(|v| v["title"] = json!("Playboy Magazine"));
        assert!(normalize(&raw, 281).is_none());
        let raw = raw_item(|v| v["title"] = json!("the sexiest item"));
        assert!(normalize(&raw, 281).is_none());
    }

    #[test]
    fn missing_required_fields_return_none() {
        for field in ["itemId", "title", "price", "itemWebUrl"] {
            let raw = raw_item(|v| {
                v.as_object_mut().unwrap().remove(field);
            });
            assert!(normalize(&raw, 281).is_none(), "field {field}");
        }
    }

    #[test]
    fn unparseable_price_returns_none() {
        let raw = raw_item(|v| v["price"]["value"] = json!("nine dollars"));
        assert!(normalize(&raw, 281).is_none());
    }

    #[test]
    fn category_path_shorter_than_two_returns_none() {
        let raw = raw_item(|v| {
            v["categories"] = json!([{"categoryId": "1", "categoryName": "Books"}])
        });
        assert!(normalize(&raw, 281).is_none());

        let raw = raw_item(|v| v["categories"] = json!([]));
        assert!(normalize(&raw, 281).is_none());
    }

    #[test]
    fn absent_optionals_default_independently() {
        let raw = raw_item(|v| {
            let obj = v.as_object_mut().unwrap();
            obj.remove("shippingOptions");
            obj.remove("thumbnailImages");
            obj.remove("additionalImages");
            obj.remove("condition");
            obj.remove("itemLocation");
            obj.remove("seller");
        });
        let item = normalize(&raw, 281).expect("normalized");
        assert_eq!(item.shipping_price, None);
        assert_eq!(item.img_url, None);
        assert_eq!(item.additional_images, AdditionalImages::default());
        assert_eq!(item.condition, None);
        assert!(item.item_location.is_none());
        assert!(item.seller.is_none());
    }

    #[test]
    fn shipping_option_without_cost_defaults_to_none() {
        let raw = raw_item(|v| v["shippingOptions"] = json!([{}]));
        let item = normalize(&raw, 281).expect("normalized");
        assert_eq!(item.shipping_price, None);
    }
}
