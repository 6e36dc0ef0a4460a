use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures_util::StreamExt;
use moka::future::Cache;
use sqlx::MySqlPool;
use tracing::info;

/// Expected capacity and false-positive rate.
const FILTER_CAPACITY: usize = 100_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

#[inline]
fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Two-tier username lookup in front of the `users` table.
///
/// The cuckoo filter answers "definitely free" without touching the database;
/// the moka cache answers "definitely taken" for recently seen names. Anything
/// else falls through to a query.
pub struct UsernameIndex {
    filter: RwLock<CuckooFilter<String>>,
    taken: Cache<String, ()>,
}

impl Default for UsernameIndex {
    fn default() -> Self {
        Self::new(FILTER_CAPACITY, 500_000, Duration::from_secs(86_400))
    }
}

impl UsernameIndex {
    pub fn new(filter_capacity: usize, cache_capacity: u64, cache_ttl: Duration) -> Self {
        Self {
            filter: RwLock::new(CuckooFilter::new(filter_capacity, FALSE_POSITIVE_RATE)),
            taken: Cache::builder()
                .max_capacity(cache_capacity)
                .time_to_live(cache_ttl)
                .build(),
        }
    }

    /// False positives possible, false negatives not.
    pub fn might_exist(&self, username: &str) -> bool {
        let username = normalize(username);
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&username)
    }

    pub async fn mark_taken(&self, username: &str) {
        let username = normalize(username);
        self.filter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(&username);
        self.taken.insert(username, ()).await;
    }

    pub fn is_cached_taken(&self, username: &str) -> bool {
        self.taken.contains_key(&normalize(username))
    }

    /// true => username AVAILABLE
    pub async fn is_available(&self, username: &str, pool: &MySqlPool) -> Result<bool, sqlx::Error> {
        if !self.might_exist(username) {
            return Ok(true);
        }
        if self.is_cached_taken(username) {
            return Ok(false);
        }

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ? LIMIT 1)",
        )
        .bind(normalize(username))
        .fetch_one(pool)
        .await?
            != 0;

        if exists {
            self.taken.insert(normalize(username), ()).await;
        }
        Ok(!exists)
    }

    fn add_batch(&self, usernames: &[String]) {
        let mut filter = self.filter.write().unwrap_or_else(PoisonError::into_inner);
        for username in usernames {
            filter.add(username);
        }
    }

    /// Streams every username into the filter and recently active ones into the cache.
    pub async fn warmup(&self, pool: &MySqlPool, recent_days: u32, batch_size: usize) -> Result<usize> {
        let mut stream = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT username,
                   CAST(COALESCE(last_login_at >= NOW() - INTERVAL ? DAY, 0) AS SIGNED) AS recent
            FROM users
            "#,
        )
        .bind(recent_days)
        .fetch(pool);

        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0usize;

        while let Some(row) = stream.next().await {
            let (username, recent) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;
            let username = normalize(&username);
            if recent != 0 {
                self.taken.insert(username.clone(), ()).await;
            }
            batch.push(username);
            total += 1;

            if batch.len() >= batch_size {
                self.add_batch(&batch);
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.add_batch(&batch);
        }

        info!(total, recent_days, "Username index warmup complete");
        Ok(total)
    }
}
