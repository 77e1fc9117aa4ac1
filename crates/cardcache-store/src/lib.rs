//! Card persistence: the `CardStore` seam, its Postgres implementation, and
//! an in-memory implementation used by engine tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use cardcache_core::{normalize_name, CanonicalCard};
use sqlx::postgres::PgPool;
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "cardcache-store";

/// Rows fetched per page when scanning existing primary keys.
pub const KEY_SCAN_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connecting to store: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("reading existing card keys: {0}")]
    Read(#[source] sqlx::Error),
    #[error("writing card {oracle_id}: {source}")]
    Write {
        oracle_id: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Persistence seam for canonical cards. The engine only ever needs key
/// membership plus whole-record reads and writes.
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Every primary key currently present, loaded fresh for one cycle.
    async fn existing_ids(&self) -> Result<HashSet<String>, StoreError>;

    async fn get(&self, oracle_id: &str) -> Result<Option<CanonicalCard>, StoreError>;

    async fn insert(&self, card: &CanonicalCard) -> Result<(), StoreError>;

    async fn update(&self, card: &CanonicalCard) -> Result<(), StoreError>;
}

const INSERT_CARD_SQL: &str = r#"
    INSERT INTO cards
        (cardid, card_name, scryfall_uri, color, color_identity,
         type, cmc, mana_cost, oracle_text, filtered_name)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

const UPDATE_CARD_SQL: &str = r#"
    UPDATE cards
       SET card_name = $2,
           scryfall_uri = $3,
           color = $4,
           color_identity = $5,
           type = $6,
           cmc = $7,
           mana_cost = $8,
           oracle_text = $9,
           filtered_name = $10
     WHERE cardid = $1
"#;

const SELECT_CARD_SQL: &str = r#"
    SELECT cardid, card_name, scryfall_uri, color, color_identity,
           type, cmc, mana_cost, oracle_text, filtered_name
      FROM cards
     WHERE cardid = $1
"#;

const SCAN_KEYS_SQL: &str = "SELECT cardid FROM cards ORDER BY cardid LIMIT $1 OFFSET $2";

const INSERT_TYPE_SQL: &str = r#"
    INSERT INTO types (type_filtered, type)
    VALUES ($1, $2)
    ON CONFLICT DO NOTHING
"#;

const INSERT_CARD_TYPE_SQL: &str = r#"
    INSERT INTO card_types (oracle_id, type_filtered)
    VALUES ($1, $2)
    ON CONFLICT DO NOTHING
"#;

/// Postgres-backed store over a single shared pool, reused across cycles.
#[derive(Debug, Clone)]
pub struct PgCardStore {
    pool: PgPool,
    write_type_index: bool,
}

impl PgCardStore {
    pub async fn connect(database_url: &str, write_type_index: bool) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(StoreError::Connect)?;
        Ok(Self {
            pool,
            write_type_index,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Secondary write target: normalized type tokens joined to the card.
    async fn index_types(&self, card: &CanonicalCard) -> Result<(), StoreError> {
        for ty in &card.types {
            let filtered = normalize_name(ty);
            sqlx::query(INSERT_TYPE_SQL)
                .bind(&filtered)
                .bind(ty)
                .execute(&self.pool)
                .await
                .map_err(|source| StoreError::Write {
                    oracle_id: card.oracle_id.clone(),
                    source,
                })?;
            sqlx::query(INSERT_CARD_TYPE_SQL)
                .bind(&card.oracle_id)
                .bind(&filtered)
                .execute(&self.pool)
                .await
                .map_err(|source| StoreError::Write {
                    oracle_id: card.oracle_id.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

fn row_to_card(row: sqlx::postgres::PgRow) -> Result<CanonicalCard, sqlx::Error> {
    Ok(CanonicalCard {
        oracle_id: row.try_get("cardid")?,
        name: row.try_get("card_name")?,
        search_uri: row.try_get("scryfall_uri")?,
        color: row.try_get("color")?,
        color_identity: row.try_get("color_identity")?,
        types: row.try_get("type")?,
        cmc: row.try_get("cmc")?,
        mana_cost: row.try_get("mana_cost")?,
        oracle_text: row.try_get("oracle_text")?,
        filtered_name: row.try_get("filtered_name")?,
    })
}

fn bind_card<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    card: &'q CanonicalCard,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&card.oracle_id)
        .bind(&card.name)
        .bind(&card.search_uri)
        .bind(&card.color)
        .bind(&card.color_identity)
        .bind(&card.types)
        .bind(card.cmc)
        .bind(&card.mana_cost)
        .bind(&card.oracle_text)
        .bind(&card.filtered_name)
}

#[async_trait]
impl CardStore for PgCardStore {
    async fn existing_ids(&self) -> Result<HashSet<String>, StoreError> {
        let mut ids = HashSet::new();
        let mut offset: i64 = 0;
        loop {
            let rows = sqlx::query(SCAN_KEYS_SQL)
                .bind(KEY_SCAN_PAGE_SIZE)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::Read)?;
            let page_len = rows.len();
            for row in rows {
                let id: String = row.try_get("cardid").map_err(StoreError::Read)?;
                ids.insert(id);
            }
            if (page_len as i64) < KEY_SCAN_PAGE_SIZE {
                break;
            }
            offset += KEY_SCAN_PAGE_SIZE;
        }
        debug!(keys = ids.len(), "loaded existing card keys");
        Ok(ids)
    }

    async fn get(&self, oracle_id: &str) -> Result<Option<CanonicalCard>, StoreError> {
        let row = sqlx::query(SELECT_CARD_SQL)
            .bind(oracle_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Read)?;
        row.map(row_to_card).transpose().map_err(StoreError::Read)
    }

    async fn insert(&self, card: &CanonicalCard) -> Result<(), StoreError> {
        bind_card(sqlx::query(INSERT_CARD_SQL), card)
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::Write {
                oracle_id: card.oracle_id.clone(),
                source,
            })?;
        if self.write_type_index {
            self.index_types(card).await?;
        }
        Ok(())
    }

    async fn update(&self, card: &CanonicalCard) -> Result<(), StoreError> {
        bind_card(sqlx::query(UPDATE_CARD_SQL), card)
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::Write {
                oracle_id: card.oracle_id.clone(),
                source,
            })?;
        Ok(())
    }
}

/// In-memory store for exercising the engine without Postgres. Pages its
/// key scan the same way the Postgres store does so the short-page exit
/// condition is covered by tests.
#[derive(Debug, Default)]
pub struct MemoryCardStore {
    cards: Mutex<HashMap<String, CanonicalCard>>,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.cards.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cards.lock().await.is_empty()
    }

    pub async fn contains(&self, oracle_id: &str) -> bool {
        self.cards.lock().await.contains_key(oracle_id)
    }

    pub async fn seed(&self, card: CanonicalCard) {
        self.cards
            .lock()
            .await
            .insert(card.oracle_id.clone(), card);
    }
}

#[async_trait]
impl CardStore for MemoryCardStore {
    async fn existing_ids(&self) -> Result<HashSet<String>, StoreError> {
        let cards = self.cards.lock().await;
        let mut sorted: Vec<&String> = cards.keys().collect();
        sorted.sort();

        let page_size = KEY_SCAN_PAGE_SIZE as usize;
        let mut ids = HashSet::new();
        let mut offset = 0;
        loop {
            let page = &sorted[offset.min(sorted.len())..(offset + page_size).min(sorted.len())];
            for id in page {
                ids.insert((*id).clone());
            }
            if page.len() < page_size {
                break;
            }
            offset += page_size;
        }
        Ok(ids)
    }

    async fn get(&self, oracle_id: &str) -> Result<Option<CanonicalCard>, StoreError> {
        Ok(self.cards.lock().await.get(oracle_id).cloned())
    }

    async fn insert(&self, card: &CanonicalCard) -> Result<(), StoreError> {
        self.cards
            .lock()
            .await
            .insert(card.oracle_id.clone(), card.clone());
        Ok(())
    }

    async fn update(&self, card: &CanonicalCard) -> Result<(), StoreError> {
        self.cards
            .lock()
            .await
            .insert(card.oracle_id.clone(), card.clone());
        Ok(())
    }
}
