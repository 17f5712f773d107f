//! Storage-bounded cache of decoded seeds.
//!
//! The cache keeps whole decoded seeds in memory with their backing
//! artifacts on disk, bounded by a byte budget. Eviction is true LRU:
//! recency is bumped on covering-seed reads as well as on ingest, the
//! least-recently-used entry goes first, and the sole remaining entry is
//! never evicted even when it alone exceeds the budget; an empty cache is
//! useless to an offline vessel. Metadata is mirrored into the persistent
//! store so the cache survives restarts.
//!
//! A miss is a normal outcome here, never an error. Satellite connectivity
//! is routinely absent for days; every consumer treats "no covering seed"
//! as ordinary.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SeedCacheConfig;
use crate::error::Result;
use crate::seed::{codec, WeatherSeed};
use crate::store::{SeedMetaRow, SpatialVectorStore};
use crate::types::BoundingBox;

/// Ingest metadata accompanying a decoded seed.
#[derive(Debug, Clone)]
pub struct SeedMetadata {
    /// Size of the backing artifact on disk.
    pub file_size_bytes: u64,
    /// When the seed stops being served.
    pub expires_at: DateTime<Utc>,
    /// Backing artifact location, deleted on eviction when present.
    pub artifact_path: Option<PathBuf>,
}

/// A cached decoded seed with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CachedSeedEntry {
    pub id: String,
    pub bbox: BoundingBox,
    /// Recency stamp; bumped on ingest and on covering-seed reads.
    pub downloaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub file_size_bytes: u64,
    pub artifact_path: Option<PathBuf>,
    pub seed: Arc<WeatherSeed>,
}

struct CacheInner {
    /// Unbounded LRU map; byte/count budgets are enforced manually so the
    /// artifact-deletion path always runs.
    entries: LruCache<String, CachedSeedEntry>,
    storage_used: u64,
}

/// Counters exposed by [`SeedCache::stats`].
#[derive(Debug, Clone, Default)]
pub struct SeedCacheStats {
    pub entries: usize,
    pub storage_used_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_purged: u64,
}

/// Bounded on-device cache of decoded weather seeds.
pub struct SeedCache {
    config: SeedCacheConfig,
    store: Arc<SpatialVectorStore>,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_purged: AtomicU64,
}

impl SeedCache {
    /// Create an empty cache over a persistent store.
    pub fn new(store: Arc<SpatialVectorStore>, config: SeedCacheConfig) -> Self {
        Self {
            config,
            store,
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                storage_used: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_purged: AtomicU64::new(0),
        }
    }

    /// Rebuild the cache from the persistent metadata table, re-decoding
    /// surviving artifacts from disk.
    ///
    /// Rows whose artifact is gone or no longer decodes are dropped: a bad
    /// seed is local damage, never a startup failure. Rows already expired
    /// are purged. Entries are replayed oldest-recency-first so LRU order
    /// matches the persisted stamps.
    pub fn open(store: Arc<SpatialVectorStore>, config: SeedCacheConfig) -> Result<Self> {
        let cache = Self::new(store.clone(), config);
        let now = Utc::now();

        for row in store.load_seed_meta()? {
            if row.expires_at <= now {
                cache.drop_row(&row, "expired during downtime");
                cache.expired_purged.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let Some(path) = row.artifact_path.as_deref() else {
                cache.drop_row(&row, "no backing artifact recorded");
                continue;
            };
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(seed_id = %row.id, %err, "artifact unreadable, dropping cache row");
                    cache.drop_row(&row, "artifact unreadable");
                    continue;
                }
            };
            let seed = match codec::decode(&bytes) {
                Ok(seed) => seed,
                Err(err) => {
                    warn!(seed_id = %row.id, %err, "artifact no longer decodes, dropping");
                    cache.drop_row(&row, "artifact undecodable");
                    continue;
                }
            };

            let mut inner = cache.inner.lock();
            inner.storage_used += row.file_size_bytes;
            inner.entries.put(
                row.id.clone(),
                CachedSeedEntry {
                    id: row.id.clone(),
                    bbox: row.bbox,
                    downloaded_at: row.downloaded_at,
                    expires_at: row.expires_at,
                    file_size_bytes: row.file_size_bytes,
                    artifact_path: Some(PathBuf::from(path)),
                    seed: Arc::new(seed),
                },
            );
        }

        let reloaded = cache.len();
        if reloaded > 0 {
            info!(entries = reloaded, "seed cache rebuilt from persistent metadata");
        }
        cache.enforce_lru()?;
        Ok(cache)
    }

    /// Insert or refresh a decoded seed, stamp its recency now, mirror the
    /// metadata row, then run eviction.
    pub fn add_seed(&self, seed: WeatherSeed, metadata: SeedMetadata) -> Result<()> {
        let now = Utc::now();
        let entry = CachedSeedEntry {
            id: seed.id.clone(),
            bbox: seed.bounding_box,
            downloaded_at: now,
            expires_at: metadata.expires_at,
            file_size_bytes: metadata.file_size_bytes,
            artifact_path: metadata.artifact_path,
            seed: Arc::new(seed),
        };

        self.store.upsert_seed_meta(&SeedMetaRow {
            id: entry.id.clone(),
            bbox: entry.bbox,
            downloaded_at: entry.downloaded_at,
            expires_at: entry.expires_at,
            file_size_bytes: entry.file_size_bytes,
            artifact_path: entry
                .artifact_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        })?;

        {
            let mut inner = self.inner.lock();
            inner.storage_used += entry.file_size_bytes;
            let new_path = entry.artifact_path.clone();
            if let Some(previous) = inner.entries.put(entry.id.clone(), entry) {
                inner.storage_used -= previous.file_size_bytes;
                if previous.artifact_path != new_path {
                    remove_artifact(previous.artifact_path.as_deref());
                }
            }
        }

        self.enforce_lru()?;
        Ok(())
    }

    /// Evict least-recently-used entries until the byte and count budgets
    /// hold. The sole remaining entry is never evicted, even over budget.
    /// Returns the number evicted.
    pub fn enforce_lru(&self) -> Result<usize> {
        let budget = self.config.max_storage_bytes();
        let mut evicted = Vec::new();

        {
            let mut inner = self.inner.lock();
            while inner.entries.len() > 1
                && (inner.storage_used > budget || inner.entries.len() > self.config.max_entries)
            {
                let Some((id, entry)) = inner.entries.pop_lru() else {
                    break;
                };
                inner.storage_used -= entry.file_size_bytes;
                debug!(seed_id = %id, bytes = entry.file_size_bytes, "evicting seed");
                evicted.push(entry);
            }
        }

        for entry in &evicted {
            remove_artifact(entry.artifact_path.as_deref());
            self.store.delete_seed_meta(&entry.id)?;
        }
        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        Ok(evicted.len())
    }

    /// Exact sum of cached artifact sizes. Matches the post-eviction state.
    pub fn storage_used(&self) -> u64 {
        self.inner.lock().storage_used
    }

    /// Number of cached seeds.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best non-expired seed whose box and time range cover the point, or
    /// `None`; a miss is the everyday offline outcome, not an error.
    ///
    /// "Best" means newest model run, ties broken by finer resolution. A
    /// hit bumps the entry's recency in memory and in the metadata table.
    pub fn find_covering_seed(
        &self,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Option<Arc<WeatherSeed>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let mut best: Option<(String, Arc<WeatherSeed>)> = None;
        for (id, entry) in inner.entries.iter() {
            if entry.expires_at <= now || !entry.seed.covers(lat, lon, at) {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    entry.seed.model_run > current.model_run
                        || (entry.seed.model_run == current.model_run
                            && entry.seed.resolution_deg < current.resolution_deg)
                }
            };
            if better {
                best = Some((id.clone(), entry.seed.clone()));
            }
        }

        let Some((id, seed)) = best else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        inner.entries.promote(&id);
        if let Some(entry) = inner.entries.peek_mut(&id) {
            entry.downloaded_at = now;
        }
        drop(inner);

        // Metadata recency is bookkeeping, not safety; a failed touch is
        // logged and the read still succeeds.
        if let Err(err) = self.store.touch_seed_meta(&id, now) {
            warn!(seed_id = %id, %err, "failed to persist recency bump");
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(seed)
    }

    /// Drop expired entries, their artifacts, and their metadata rows.
    /// Returns the number purged.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<CachedSeedEntry> = {
            let mut inner = self.inner.lock();
            let ids: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            let mut popped = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(entry) = inner.entries.pop(id) {
                    inner.storage_used -= entry.file_size_bytes;
                    popped.push(entry);
                }
            }
            popped
        };

        for entry in &expired {
            remove_artifact(entry.artifact_path.as_deref());
            self.store.delete_seed_meta(&entry.id)?;
        }
        self.expired_purged
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        Ok(expired.len())
    }

    /// Counters snapshot.
    pub fn stats(&self) -> SeedCacheStats {
        let inner = self.inner.lock();
        SeedCacheStats {
            entries: inner.entries.len(),
            storage_used_bytes: inner.storage_used,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_purged: self.expired_purged.load(Ordering::Relaxed),
        }
    }

    fn drop_row(&self, row: &SeedMetaRow, reason: &str) {
        debug!(seed_id = %row.id, reason, "dropping stale seed metadata row");
        if let Some(path) = row.artifact_path.as_deref() {
            remove_artifact(Some(std::path::Path::new(path)));
        }
        if let Err(err) = self.store.delete_seed_meta(&row.id) {
            warn!(seed_id = %row.id, %err, "failed to delete stale metadata row");
        }
    }
}

fn remove_artifact(path: Option<&std::path::Path>) {
    let Some(path) = path else {
        return;
    };
    match std::fs::remove_file(path) {
        Ok(()) => debug!(?path, "deleted backing artifact"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(?path, %err, "failed to delete backing artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::Variable;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    const MB: u64 = 1024 * 1024;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 0, 0, 0).unwrap()
    }

    /// Seed over a 1-degree box anchored at `lat0/lon0`, valid for 48 h.
    fn boxed_seed(id: &str, lat0: f64, lon0: f64, model_run: DateTime<Utc>) -> WeatherSeed {
        let latitudes = vec![lat0, lat0 + 1.0];
        let longitudes = vec![lon0, lon0 + 1.0];
        let time_steps: Vec<_> = (0..48).map(|h| base() + Duration::hours(h)).collect();
        let grid = time_steps.len() * 4;
        let mut variables = BTreeMap::new();
        variables.insert(
            "u10".to_string(),
            Variable::Raw {
                values: vec![5.0; grid],
            },
        );
        WeatherSeed {
            id: id.to_string(),
            model_source: "test".to_string(),
            model_run,
            created_at: model_run,
            bounding_box: BoundingBox {
                lat_min: lat0,
                lat_max: lat0 + 1.0,
                lon_min: lon0,
                lon_max: lon0 + 1.0,
            },
            resolution_deg: 1.0,
            time_steps,
            latitudes,
            longitudes,
            variables,
        }
    }

    fn metadata(size: u64) -> SeedMetadata {
        SeedMetadata {
            file_size_bytes: size,
            expires_at: Utc::now() + Duration::days(2),
            artifact_path: None,
        }
    }

    fn cache_with_budget(mb: u64) -> SeedCache {
        let store = Arc::new(SpatialVectorStore::open_in_memory().unwrap());
        SeedCache::new(
            store,
            SeedCacheConfig {
                max_storage_mb: mb,
                ..Default::default()
            },
        )
    }

    #[test]
    fn lru_evicts_oldest_under_byte_budget() {
        let cache = cache_with_budget(10);
        cache.add_seed(boxed_seed("a", 10.0, 10.0, base()), metadata(5 * MB)).unwrap();
        cache.add_seed(boxed_seed("b", 20.0, 20.0, base()), metadata(5 * MB)).unwrap();
        cache.add_seed(boxed_seed("c", 30.0, 30.0, base()), metadata(5 * MB)).unwrap();

        // Exactly the two most-recently-added survive.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.storage_used(), 10 * MB);
        assert!(cache
            .find_covering_seed(10.5, 10.5, base() + Duration::hours(1))
            .is_none());
        assert!(cache
            .find_covering_seed(20.5, 20.5, base() + Duration::hours(1))
            .is_some());
        assert!(cache
            .find_covering_seed(30.5, 30.5, base() + Duration::hours(1))
            .is_some());
    }

    #[test]
    fn read_bumps_recency_before_eviction() {
        let cache = cache_with_budget(10);
        cache.add_seed(boxed_seed("a", 10.0, 10.0, base()), metadata(5 * MB)).unwrap();
        cache.add_seed(boxed_seed("b", 20.0, 20.0, base()), metadata(5 * MB)).unwrap();

        // Reading "a" makes "b" the LRU victim when "c" arrives.
        assert!(cache
            .find_covering_seed(10.5, 10.5, base() + Duration::hours(1))
            .is_some());
        cache.add_seed(boxed_seed("c", 30.0, 30.0, base()), metadata(5 * MB)).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache
            .find_covering_seed(10.5, 10.5, base() + Duration::hours(1))
            .is_some());
        assert!(cache
            .find_covering_seed(20.5, 20.5, base() + Duration::hours(1))
            .is_none());
    }

    #[test]
    fn sole_entry_survives_over_budget() {
        let cache = cache_with_budget(10);
        cache
            .add_seed(boxed_seed("big", 10.0, 10.0, base()), metadata(50 * MB))
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.storage_used(), 50 * MB);
    }

    #[test]
    fn refresh_replaces_size_accounting() {
        let cache = cache_with_budget(100);
        cache.add_seed(boxed_seed("a", 10.0, 10.0, base()), metadata(5 * MB)).unwrap();
        cache.add_seed(boxed_seed("a", 10.0, 10.0, base()), metadata(7 * MB)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.storage_used(), 7 * MB);
    }

    #[test]
    fn miss_is_a_normal_outcome() {
        let cache = cache_with_budget(10);
        assert!(cache.find_covering_seed(0.0, 0.0, base()).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn expired_entries_do_not_serve() {
        let cache = cache_with_budget(10);
        cache
            .add_seed(
                boxed_seed("stale", 10.0, 10.0, base()),
                SeedMetadata {
                    file_size_bytes: MB,
                    expires_at: Utc::now() - Duration::hours(1),
                    artifact_path: None,
                },
            )
            .unwrap();
        assert!(cache
            .find_covering_seed(10.5, 10.5, base() + Duration::hours(1))
            .is_none());
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.storage_used(), 0);
    }

    #[test]
    fn newest_model_run_wins_coverage_ties() {
        let cache = cache_with_budget(100);
        cache
            .add_seed(boxed_seed("old-run", 10.0, 10.0, base() - Duration::hours(12)), metadata(MB))
            .unwrap();
        cache
            .add_seed(boxed_seed("new-run", 10.0, 10.0, base()), metadata(MB))
            .unwrap();

        let seed = cache
            .find_covering_seed(10.5, 10.5, base() + Duration::hours(1))
            .unwrap();
        assert_eq!(seed.id, "new-run");
    }

    #[test]
    fn reloads_from_persistent_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SpatialVectorStore::open(dir.path().join("truth.db")).unwrap());
        let config = SeedCacheConfig::default();

        // Write a real artifact to disk and ingest it.
        let artifact = codec::testutil::uniform_artifact("persisted", 4, 5.0, 0.0);
        let bytes = codec::encode(&artifact).unwrap();
        let artifact_path = dir.path().join("persisted.seed.zst");
        std::fs::write(&artifact_path, &bytes).unwrap();

        {
            let cache = SeedCache::new(store.clone(), config.clone());
            let seed = codec::decode(&bytes).unwrap();
            cache
                .add_seed(
                    seed,
                    SeedMetadata {
                        file_size_bytes: bytes.len() as u64,
                        expires_at: Utc::now() + Duration::days(2),
                        artifact_path: Some(artifact_path.clone()),
                    },
                )
                .unwrap();
        }

        let reopened = SeedCache::open(store, config).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.storage_used(), bytes.len() as u64);
    }

    #[test]
    fn reload_drops_rows_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SpatialVectorStore::open(dir.path().join("truth.db")).unwrap());

        store
            .upsert_seed_meta(&SeedMetaRow {
                id: "ghost".to_string(),
                bbox: BoundingBox {
                    lat_min: 0.0,
                    lat_max: 1.0,
                    lon_min: 0.0,
                    lon_max: 1.0,
                },
                downloaded_at: Utc::now(),
                expires_at: Utc::now() + Duration::days(1),
                file_size_bytes: MB,
                artifact_path: Some(
                    dir.path().join("missing.seed.zst").to_string_lossy().into_owned(),
                ),
            })
            .unwrap();

        let cache = SeedCache::open(store.clone(), SeedCacheConfig::default()).unwrap();
        assert!(cache.is_empty());
        assert!(store.load_seed_meta().unwrap().is_empty());
    }

    #[test]
    fn eviction_deletes_backing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with_budget(10);

        let path_a = dir.path().join("a.seed.zst");
        std::fs::write(&path_a, b"artifact-a").unwrap();

        cache
            .add_seed(
                boxed_seed("a", 10.0, 10.0, base()),
                SeedMetadata {
                    file_size_bytes: 6 * MB,
                    expires_at: Utc::now() + Duration::days(1),
                    artifact_path: Some(path_a.clone()),
                },
            )
            .unwrap();
        cache.add_seed(boxed_seed("b", 20.0, 20.0, base()), metadata(6 * MB)).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(!path_a.exists(), "evicted artifact should be deleted");
    }
}
