//! Read-through cache for daily bars.
//!
//! Bars are kept in memory per symbol and, when a directory is configured,
//! mirrored to one JSON file per symbol so a restart does not refetch the
//! whole watchlist. Entries older than the TTL are fetched again.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::MarketData;
use crate::clock::{system_clock, SharedClock};
use crate::config::DataSettings;
use crate::types::Bar;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedBars {
    fetched_at: DateTime<Utc>,
    /// Largest request this entry fully answers.
    covers: usize,
    bars: Vec<Bar>,
}

impl CachedBars {
    fn serves(&self, limit: usize, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at < ttl && (self.covers >= limit || self.bars.len() >= limit)
    }

    fn tail(&self, limit: usize) -> Vec<Bar> {
        let skip = self.bars.len().saturating_sub(limit);
        self.bars[skip..].to_vec()
    }
}

/// [`MarketData`] decorator that serves recent bars from a cache.
pub struct CachedMarketData {
    inner: Arc<dyn MarketData>,
    entries: DashMap<String, CachedBars>,
    dir: Option<PathBuf>,
    ttl: Duration,
    keep_last_bars: usize,
    clock: SharedClock,
}

impl CachedMarketData {
    pub fn new(inner: Arc<dyn MarketData>, settings: &DataSettings) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            dir: settings.cache_dir.as_ref().map(|dir| PathBuf::from(dir).join("bars")),
            ttl: Duration::minutes(settings.cache_ttl_minutes),
            keep_last_bars: settings.cache_keep_last_bars.max(1),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Drop the in-memory and on-disk entry for `symbol`.
    pub async fn invalidate(&self, symbol: &str) {
        self.entries.remove(symbol);
        if let Some(path) = self.file_path(symbol) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(symbol, path = %path.display(), error = %e, "Failed to remove cached bars");
                }
            }
        }
    }

    /// Symbols currently held in memory.
    pub fn cached_symbols(&self) -> usize {
        self.entries.len()
    }

    /// Cache file for `symbol`, if a directory is set and the symbol is a
    /// plain ticker.
    fn file_path(&self, symbol: &str) -> Option<PathBuf> {
        let plain = !symbol.is_empty()
            && symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !plain {
            return None;
        }
        self.dir.as_ref().map(|dir| dir.join(format!("{symbol}.json")))
    }

    async fn load_file(&self, symbol: &str) -> Option<CachedBars> {
        let path = self.file_path(symbol)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(symbol, path = %path.display(), error = %e, "Failed to read cached bars");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(symbol, path = %path.display(), error = %e, "Ignoring unreadable bar cache");
                None
            }
        }
    }

    async fn save_file(&self, symbol: &str, entry: &CachedBars) {
        let Some(path) = self.file_path(symbol) else {
            return;
        };
        let result: std::io::Result<()> = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let body = serde_json::to_vec(entry).map_err(std::io::Error::other)?;
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, body).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = result {
            warn!(symbol, path = %path.display(), error = %e, "Failed to write bar cache");
        }
    }
}

#[async_trait::async_trait]
impl MarketData for CachedMarketData {
    async fn get_daily_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let now = self.clock.now();

        let hit = self
            .entries
            .get(symbol)
            .filter(|entry| entry.serves(limit, now, self.ttl))
            .map(|entry| entry.tail(limit));
        if let Some(bars) = hit {
            debug!(symbol, limit, "Bars served from memory cache");
            return Ok(bars);
        }

        if let Some(entry) = self.load_file(symbol).await {
            if entry.serves(limit, now, self.ttl) {
                debug!(symbol, limit, "Bars served from disk cache");
                let bars = entry.tail(limit);
                self.entries.insert(symbol.to_string(), entry);
                return Ok(bars);
            }
        }

        let bars = self.inner.get_daily_bars(symbol, limit).await?;
        let skip = bars.len().saturating_sub(self.keep_last_bars);
        let entry = CachedBars {
            fetched_at: now,
            covers: if skip > 0 { self.keep_last_bars } else { limit },
            bars: bars[skip..].to_vec(),
        };
        self.save_file(symbol, &entry).await;
        self.entries.insert(symbol.to_string(), entry);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::Error;
    use mockall::mock;

    mock! {
        pub Bars {}

        #[async_trait::async_trait]
        impl MarketData for Bars {
            async fn get_daily_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>>;
        }
    }

    fn series(n: usize) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(n as i64);
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar {
                    ts: start + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn settings(dir: Option<PathBuf>) -> DataSettings {
        DataSettings {
            cache_dir: dir.map(|d| d.to_string_lossy().into_owned()),
            cache_ttl_minutes: 60,
            cache_keep_last_bars: 50,
            ..Default::default()
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("swing-bot-cache-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn test_repeat_request_is_served_from_memory() {
        let mut inner = MockBars::new();
        inner
            .expect_get_daily_bars()
            .times(1)
            .returning(|_, limit| Ok(series(limit)));

        let cache = CachedMarketData::new(Arc::new(inner), &settings(None));
        let first = cache.get_daily_bars("AAPL", 30).await.unwrap();
        let second = cache.get_daily_bars("AAPL", 20).await.unwrap();

        assert_eq!(first.len(), 30);
        assert_eq!(second.len(), 20);
        assert_eq!(second.last(), first.last());
        assert_eq!(cache.cached_symbols(), 1);
    }

    #[tokio::test]
    async fn test_expired_or_short_entries_are_refetched() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut inner = MockBars::new();
        inner
            .expect_get_daily_bars()
            .times(3)
            .returning(|_, limit| Ok(series(limit)));

        let cache =
            CachedMarketData::new(Arc::new(inner), &settings(None)).with_clock(clock.clone());
        cache.get_daily_bars("AAPL", 20).await.unwrap();
        // Wider window than cached.
        assert_eq!(cache.get_daily_bars("AAPL", 40).await.unwrap().len(), 40);

        clock.advance(Duration::minutes(61));
        cache.get_daily_bars("AAPL", 20).await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_is_trimmed_to_keep_last_bars() {
        let mut inner = MockBars::new();
        inner
            .expect_get_daily_bars()
            .times(2)
            .returning(|_, limit| Ok(series(limit)));

        let cache = CachedMarketData::new(Arc::new(inner), &settings(None));
        assert_eq!(cache.get_daily_bars("AAPL", 80).await.unwrap().len(), 80);
        // Only 50 were kept, so 60 needs another fetch.
        assert_eq!(cache.get_daily_bars("AAPL", 40).await.unwrap().len(), 40);
        assert_eq!(cache.get_daily_bars("AAPL", 60).await.unwrap().len(), 60);
    }

    #[tokio::test]
    async fn test_disk_cache_survives_restart() {
        let dir = temp_dir();

        let mut inner = MockBars::new();
        inner
            .expect_get_daily_bars()
            .times(1)
            .returning(|_, limit| Ok(series(limit)));
        let cache = CachedMarketData::new(Arc::new(inner), &settings(Some(dir.clone())));
        let fetched = cache.get_daily_bars("MSFT", 25).await.unwrap();

        let mut cold = MockBars::new();
        cold.expect_get_daily_bars().times(0);
        let restarted = CachedMarketData::new(Arc::new(cold), &settings(Some(dir.clone())));
        let loaded = restarted.get_daily_bars("MSFT", 25).await.unwrap();
        assert_eq!(loaded, fetched);

        restarted.invalidate("MSFT").await;
        assert!(!dir.join("bars").join("MSFT.json").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let mut inner = MockBars::new();
        let mut seq = mockall::Sequence::new();
        inner
            .expect_get_daily_bars()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|symbol, _| Err(Error::Connectivity(format!("no bars for {symbol}"))));
        inner
            .expect_get_daily_bars()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, limit| Ok(series(limit)));

        let cache = CachedMarketData::new(Arc::new(inner), &settings(None));
        assert!(cache.get_daily_bars("NVDA", 10).await.is_err());
        assert_eq!(cache.cached_symbols(), 0);
        assert_eq!(cache.get_daily_bars("NVDA", 10).await.unwrap().len(), 10);
    }
}
