#![allow(dead_code)]

use crate::models::{AdditionalImages, CategoryRef, Charity, Item, NewItem};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored json column corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Subset of an item the reaper works from.
#[derive(Debug, Clone)]
pub struct StaleItem {
    pub id: i64,
    pub ebay_id: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS charities (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ebay_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    price REAL NOT NULL,
    shipping_price REAL,
    img_url TEXT,
    additional_images TEXT NOT NULL DEFAULT '{"additionalImages":[]}',
    web_url TEXT NOT NULL,
    charity_id INTEGER NOT NULL REFERENCES charities(id) ON DELETE CASCADE,
    category TEXT NOT NULL,
    category_list TEXT NOT NULL DEFAULT '[]',
    item_location TEXT,
    condition TEXT,
    seller TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_charity_id ON items(charity_id);
CREATE INDEX IF NOT EXISTS idx_items_updated_at ON items(updated_at);
"#;

/// SQLite caps bound parameters per statement; existence checks chunk their
/// id lists well under it.
const IN_CHUNK: usize = 400;

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections_from_env())
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory store, migrated and ready. A single connection keeps every
    /// caller on the same database.
    pub async fn memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_charity(
        &self,
        id: i64,
        name: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO charities (id, name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn charity_exists(&self, id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM charities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_charity(&self, id: i64) -> Result<Option<Charity>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM charities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(Charity {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
        .map_err(StoreError::Database)
    }

    /// Charity ownership cascades: deleting a charity deletes its items.
    pub async fn delete_charity(&self, id: i64) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM charities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Which of the given external ids are already stored. One query per
    /// chunk, not one per id.
    pub async fn existing_ebay_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT ebay_id FROM items WHERE ebay_id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await?;
            for row in rows {
                found.insert(row.try_get("ebay_id")?);
            }
        }
        Ok(found)
    }

    /// Persists a batch in one transaction. Records are validated
    /// independently: an invalid or rejected record is logged and left out
    /// without aborting the rest. Returns the count actually committed, so a
    /// record swallowed by the `ebay_id` unique constraint does not inflate
    /// the number.
    pub async fn insert_items(&self, batch: &[NewItem]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut committed = 0u64;

        for item in batch {
            if let Err(err) = item.validate() {
                warn!(
                    target: "charityshop.store",
                    ebay_id = %item.ebay_id,
                    error = %err,
                    "item failed validation, excluded from batch"
                );
                continue;
            }
            let additional_images = serde_json::to_string(&item.additional_images)?;
            let category_list = serde_json::to_string(&item.category_list)?;
            let item_location = item.item_location.as_ref().map(|value| value.to_string());
            let seller = item.seller.as_ref().map(|value| value.to_string());

            let result = sqlx::query(
                r#"
                INSERT INTO items (
                    ebay_id, name, price, shipping_price, img_url,
                    additional_images, web_url, charity_id, category,
                    category_list, item_location, condition, seller,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(ebay_id) DO NOTHING
                "#,
            )
            .bind(&item.ebay_id)
            .bind(&item.name)
            .bind(item.price)
            .bind(item.shipping_price)
            .bind(&item.img_url)
            .bind(additional_images)
            .bind(&item.web_url)
            .bind(item.charity_id)
            .bind(&item.category)
            .bind(category_list)
            .bind(item_location)
            .bind(&item.condition)
            .bind(seller)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) => committed += done.rows_affected(),
                Err(err) => warn!(
                    target: "charityshop.store",
                    ebay_id = %item.ebay_id,
                    error = %err,
                    "item insert rejected, excluded from batch"
                ),
            }
        }

        tx.commit().await?;
        Ok(committed)
    }

    pub async fn get_item_by_ebay_id(&self, ebay_id: &str) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query("SELECT * FROM items WHERE ebay_id = ?")
            .bind(ebay_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| item_from_row(&row)).transpose()
    }

    pub async fn count_items(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Items whose `updated_at` predates the cutoff, oldest first.
    pub async fn stale_items(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, ebay_id, updated_at FROM items WHERE updated_at < ? ORDER BY updated_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(StaleItem {
                    id: row.try_get("id")?,
                    ebay_id: row.try_get("ebay_id")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    /// Refreshes `updated_at`; the only mutation the reaper applies to a
    /// surviving item.
    pub async fn touch_item(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE items SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_item(&self, id: i64) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    #[cfg(test)]
    pub(crate) async fn backdate_item(
        &self,
        ebay_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE items SET updated_at = ? WHERE ebay_id = ?")
            .bind(updated_at)
            .bind(ebay_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item, StoreError> {
    let additional_images: String = row.try_get("additional_images")?;
    let category_list: String = row.try_get("category_list")?;
    let item_location: Option<String> = row.try_get("item_location")?;
    let seller: Option<String> = row.try_get("seller")?;

    Ok(Item {
        id: row.try_get("id")?,
        ebay_id: row.try_get("ebay_id")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        shipping_price: row.try_get("shipping_price")?,
        img_url: row.try_get("img_url")?,
        additional_images: serde_json::from_str::<AdditionalImages>(&additional_images)?,
        web_url: row.try_get("web_url")?,
        charity_id: row.try_get("charity_id")?,
        category: row.try_get("category")?,
        category_list: serde_json::from_str::<Vec<CategoryRef>>(&category_list)?,
        item_location: item_location
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        condition: row.try_get("condition")?,
        seller: seller.map(|raw| serde_json::from_str(&raw)).transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn max_connections_from_env() -> u32 {
    std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(5)
}
