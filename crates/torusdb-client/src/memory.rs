//! In-memory storage node used by tests and local development.
//!
//! Models the shard-side contract the coordinator relies on: upsert
//! semantics for primaries, a tagged replica store keyed by source shard,
//! ascending id scans, and brute-force L2 search.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use torusdb_core::{DatabaseDescriptor, Error, Result, SearchHit, VectorRecord};

use crate::api::ShardApi;

#[derive(Default)]
struct ShardState {
    databases: HashMap<String, DatabaseDescriptor>,
    primaries: HashMap<String, BTreeMap<i64, VectorRecord>>,
    replicas: HashMap<String, HashMap<(String, i64), VectorRecord>>,
}

/// A storage node held entirely in memory.
pub struct InMemoryShard {
    shard_id: String,
    state: Mutex<ShardState>,
    down: AtomicBool,
}

impl InMemoryShard {
    /// Creates an empty shard.
    #[must_use]
    pub fn new(shard_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            shard_id: shard_id.into(),
            state: Mutex::new(ShardState::default()),
            down: AtomicBool::new(false),
        })
    }

    /// Simulates the node going down (every call fails Unavailable) or
    /// coming back.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of primary records in a database.
    #[must_use]
    pub fn primary_count(&self, database_id: &str) -> usize {
        self.state
            .lock()
            .primaries
            .get(database_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Ids of all primary records in a database, ascending.
    #[must_use]
    pub fn primary_ids(&self, database_id: &str) -> Vec<i64> {
        self.state
            .lock()
            .primaries
            .get(database_id)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a tagged replica copy exists.
    #[must_use]
    pub fn has_replica(&self, database_id: &str, id: i64, source_shard_id: &str) -> bool {
        self.state
            .lock()
            .replicas
            .get(database_id)
            .is_some_and(|m| m.contains_key(&(source_shard_id.to_string(), id)))
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::unavailable(format!(
                "shard {} is down",
                self.shard_id
            )));
        }
        Ok(())
    }

    fn check_dimension(db: &DatabaseDescriptor, len: usize) -> Result<()> {
        if len != db.dimension as usize {
            return Err(Error::dimension_mismatch(db.dimension as usize, len));
        }
        Ok(())
    }

    fn distance(a: &[f32], b: &[f32]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (f64::from(x - y)).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn rank(probe: &[f32], k: usize, records: impl Iterator<Item = VectorRecord>) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = records
            .map(|vector| {
                let distance = Self::distance(probe, &vector.embedding);
                SearchHit {
                    distance,
                    similarity: 1.0 / (1.0 + distance),
                    vector,
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            a.merge_key()
                .partial_cmp(&b.merge_key())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }
}

#[async_trait]
impl ShardApi for InMemoryShard {
    async fn add_vector(&self, record: &VectorRecord) -> Result<i64> {
        self.check_up()?;
        let mut state = self.state.lock();
        let db = state
            .databases
            .get(&record.database_id)
            .ok_or_else(|| Error::not_found("database", &record.database_id))?;
        Self::check_dimension(db, record.embedding.len())?;
        state
            .primaries
            .entry(record.database_id.clone())
            .or_default()
            .insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn get_vector(&self, database_id: &str, id: i64) -> Result<VectorRecord> {
        self.check_up()?;
        self.state
            .lock()
            .primaries
            .get(database_id)
            .and_then(|m| m.get(&id))
            .cloned()
            .ok_or_else(|| Error::not_found("vector", id))
    }

    async fn delete_vector(&self, database_id: &str, id: i64) -> Result<bool> {
        self.check_up()?;
        Ok(self
            .state
            .lock()
            .primaries
            .get_mut(database_id)
            .and_then(|m| m.remove(&id))
            .is_some())
    }

    async fn search(&self, database_id: &str, probe: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.check_up()?;
        let state = self.state.lock();
        let db = state
            .databases
            .get(database_id)
            .ok_or_else(|| Error::not_found("database", database_id))?;
        Self::check_dimension(db, probe.len())?;
        let records = state
            .primaries
            .get(database_id)
            .map(|m| m.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(Self::rank(probe, k, records.into_iter()))
    }

    async fn create_database(&self, database: &DatabaseDescriptor) -> Result<()> {
        self.check_up()?;
        let mut state = self.state.lock();
        if let Some(existing) = state.databases.get(&database.id) {
            if existing.dimension != database.dimension {
                return Err(Error::conflict(format!(
                    "database `{}` exists with dimension {}",
                    database.id, existing.dimension
                )));
            }
            return Ok(());
        }
        state
            .databases
            .insert(database.id.clone(), database.clone());
        Ok(())
    }

    async fn drop_database(&self, database_id: &str) -> Result<()> {
        self.check_up()?;
        let mut state = self.state.lock();
        if state.databases.remove(database_id).is_none() {
            return Err(Error::not_found("database", database_id));
        }
        state.primaries.remove(database_id);
        state.replicas.remove(database_id);
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        self.check_up()?;
        let state = self.state.lock();
        let mut databases: Vec<DatabaseDescriptor> = state
            .databases
            .values()
            .map(|db| {
                let mut db = db.clone();
                db.vector_count = state
                    .primaries
                    .get(&db.id)
                    .map(|m| m.len() as u64)
                    .unwrap_or(0);
                db
            })
            .collect();
        databases.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(databases)
    }

    async fn scan_range(
        &self,
        database_id: &str,
        from_exclusive: i64,
        to_inclusive: i64,
        limit: usize,
    ) -> Result<Vec<VectorRecord>> {
        self.check_up()?;
        Ok(self
            .state
            .lock()
            .primaries
            .get(database_id)
            .map(|m| {
                m.range((Bound::Excluded(from_exclusive), Bound::Included(to_inclusive)))
                    .take(limit)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_batch(&self, database_id: &str, records: &[VectorRecord]) -> Result<()> {
        self.check_up()?;
        let mut state = self.state.lock();
        if !state.databases.contains_key(database_id) {
            return Err(Error::not_found("database", database_id));
        }
        let primaries = state.primaries.entry(database_id.to_string()).or_default();
        for record in records {
            primaries.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn delete_batch(&self, database_id: &str, ids: &[i64]) -> Result<()> {
        self.check_up()?;
        if let Some(primaries) = self.state.lock().primaries.get_mut(database_id) {
            for id in ids {
                primaries.remove(id);
            }
        }
        Ok(())
    }

    async fn add_vector_replica(
        &self,
        record: &VectorRecord,
        source_shard_id: &str,
    ) -> Result<()> {
        self.check_up()?;
        self.state
            .lock()
            .replicas
            .entry(record.database_id.clone())
            .or_default()
            .insert((source_shard_id.to_string(), record.id), record.clone());
        Ok(())
    }

    async fn get_vector_replica(
        &self,
        database_id: &str,
        id: i64,
        source_shard_id: &str,
    ) -> Result<VectorRecord> {
        self.check_up()?;
        self.state
            .lock()
            .replicas
            .get(database_id)
            .and_then(|m| m.get(&(source_shard_id.to_string(), id)))
            .cloned()
            .ok_or_else(|| Error::not_found("replica", id))
    }

    async fn delete_vector_replica(
        &self,
        database_id: &str,
        id: i64,
        source_shard_id: &str,
    ) -> Result<bool> {
        self.check_up()?;
        Ok(self
            .state
            .lock()
            .replicas
            .get_mut(database_id)
            .and_then(|m| m.remove(&(source_shard_id.to_string(), id)))
            .is_some())
    }

    async fn search_replicas(
        &self,
        database_id: &str,
        probe: &[f32],
        k: usize,
        source_shard_id: &str,
    ) -> Result<Vec<SearchHit>> {
        self.check_up()?;
        let state = self.state.lock();
        let records: Vec<VectorRecord> = state
            .replicas
            .get(database_id)
            .map(|m| {
                m.iter()
                    .filter(|((source, _), _)| source == source_shard_id)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self::rank(probe, k, records.into_iter()))
    }

    async fn ping(&self) -> Result<()> {
        self.check_up()
    }
}
