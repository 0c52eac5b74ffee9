//! Multi-collection vector storage
//!
//! `VectorStorage` owns the name → index map and routes every data
//! operation to the right collection. Creation and deletion take the map
//! writer lock; data operations share it, so different collections
//! proceed in parallel (each index serializes itself internally).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::hnsw::{
    DistanceMetric, HnswConfig, HnswIndex, SearchResult, VectorData, VectorRecord,
};

const MANIFEST_FILE: &str = "collections.json";
const SNAPSHOT_EXT: &str = "hnsw";

/// Immutable description of a collection, fixed at creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    #[serde(default)]
    pub hnsw: HnswConfig,
}

impl CollectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("collection name is empty".to_string()));
        }
        if self.dimension == 0 {
            return Err(Error::InvalidConfig(
                "dimension must be at least 1".to_string(),
            ));
        }
        self.hnsw.validate().map_err(Error::InvalidConfig)
    }
}

/// Point-in-time stats for one collection.
#[derive(Clone, Debug, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub dimension: usize,
    pub vector_count: usize,
    pub memory_usage_bytes: usize,
    pub index_size_bytes: usize,
    pub metric: DistanceMetric,
}

/// A named collection: its config plus the index that serves it.
pub struct Collection {
    config: CollectionConfig,
    index: HnswIndex,
}

impl Collection {
    fn new(config: CollectionConfig) -> Result<Self> {
        let index = HnswIndex::new(config.dimension, config.metric, config.hnsw)?;
        Ok(Self { config, index })
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn index(&self) -> &HnswIndex {
        &self.index
    }

    fn stats(&self) -> CollectionStats {
        CollectionStats {
            name: self.config.name.clone(),
            dimension: self.config.dimension,
            vector_count: self.index.len(),
            memory_usage_bytes: self.index.memory_usage(),
            index_size_bytes: self.index.graph_bytes(),
            metric: self.config.metric,
        }
    }
}

/// Serialized manifest: the configs of every collection under the root.
#[derive(Serialize, Deserialize)]
struct Manifest {
    collections: Vec<CollectionConfig>,
}

/// The storage manager.
pub struct VectorStorage {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    data_dir: Option<PathBuf>,
}

impl VectorStorage {
    /// In-memory storage without persistence.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            data_dir: None,
        }
    }

    /// Storage persisting each collection under `data_dir`.
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            data_dir: Some(data_dir.into()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn map_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Collection>>>> {
        self.collections
            .read()
            .map_err(|_| Error::internal("storage lock poisoned"))
    }

    fn map_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Collection>>>> {
        self.collections
            .write()
            .map_err(|_| Error::internal("storage lock poisoned"))
    }

    /// Create a collection. Returns `false` when the name is taken or
    /// the config is invalid.
    #[instrument(skip(self, config), fields(name = %config.name))]
    pub fn create_collection(&self, config: CollectionConfig) -> bool {
        if let Err(e) = config.validate() {
            warn!(error = %e, "rejecting collection config");
            return false;
        }
        let Ok(mut map) = self.map_write() else {
            return false;
        };
        if map.contains_key(&config.name) {
            return false;
        }

        let name = config.name.clone();
        let collection = match Collection::new(config) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!(error = %e, "failed to build index for new collection");
                return false;
            }
        };

        // An empty snapshot marks the collection on disk right away.
        if let Some(path) = self.snapshot_path(&name) {
            if let Err(e) = collection.index.save(&path) {
                warn!(error = %e, "failed to write initial snapshot");
            }
        }

        map.insert(name.clone(), collection);
        info!(name = %name, "collection created");
        true
    }

    /// Drop a collection and its snapshot. Returns `false` for unknown
    /// names.
    #[instrument(skip(self))]
    pub fn delete_collection(&self, name: &str) -> bool {
        let Ok(mut map) = self.map_write() else {
            return false;
        };
        if map.remove(name).is_none() {
            return false;
        }
        drop(map);

        if let Some(path) = self.snapshot_path(name) {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(error = %e, path = %path.display(), "failed to remove snapshot");
                }
            }
        }
        info!(name, "collection deleted");
        true
    }

    /// Collection names. Enumeration order is unspecified.
    pub fn list_collections(&self) -> Vec<String> {
        self.map_read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Stats for every collection.
    pub fn list_stats(&self) -> Vec<CollectionStats> {
        self.map_read()
            .map(|map| map.values().map(|c| c.stats()).collect())
            .unwrap_or_default()
    }

    /// Stats for one collection, if it exists.
    pub fn get_stats(&self, name: &str) -> Option<CollectionStats> {
        self.map_read().ok()?.get(name).map(|c| c.stats())
    }

    /// Look up a collection handle.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.map_read()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Data operations, delegated to the named index
    // ------------------------------------------------------------------

    pub fn insert(
        &self,
        name: &str,
        values: Vec<f32>,
        id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        self.collection(name)?.index.insert(values, id, metadata)
    }

    pub fn batch_insert(&self, name: &str, records: Vec<VectorRecord>) -> Result<usize> {
        self.collection(name)?.index.batch_insert(records)
    }

    pub fn remove(&self, name: &str, id: &str) -> Result<bool> {
        self.collection(name)?.index.remove(id)
    }

    pub fn get(&self, name: &str, id: &str) -> Result<Option<VectorData>> {
        self.collection(name)?.index.get(id)
    }

    pub fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        self.collection(name)?.index.search(query, k, ef_override)
    }

    pub fn batch_search(
        &self,
        name: &str,
        queries: &[Vec<f32>],
        k: usize,
        ef_override: Option<usize>,
    ) -> Result<Vec<Vec<SearchResult>>> {
        self.collection(name)?
            .index
            .batch_search(queries, k, ef_override)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn root(&self) -> Result<&Path> {
        self.data_dir
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("storage has no data directory".to_string()))
    }

    fn snapshot_path(&self, name: &str) -> Option<PathBuf> {
        let root = self.data_dir.as_deref()?;
        Some(root.join(format!("{}.{}", sanitize_name(name), SNAPSHOT_EXT)))
    }

    /// Persist every collection: one snapshot per index plus the
    /// manifest. Each file is replaced atomically.
    #[instrument(skip(self))]
    pub fn save_all(&self) -> Result<()> {
        let root = self.root()?.to_path_buf();
        fs::create_dir_all(&root)?;

        let snapshot: Vec<Arc<Collection>> = self.map_read()?.values().cloned().collect();
        let mut configs = Vec::with_capacity(snapshot.len());
        for collection in &snapshot {
            let path = self
                .snapshot_path(&collection.config.name)
                .ok_or_else(|| Error::internal("data dir vanished"))?;
            collection.index.save(&path)?;
            configs.push(collection.config.clone());
        }

        configs.sort_by(|a, b| a.name.cmp(&b.name));
        let manifest = Manifest { collections: configs };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::internal(format!("manifest serialization failed: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&root)?;
        std::io::Write::write_all(&mut tmp, json.as_bytes())?;
        tmp.persist(root.join(MANIFEST_FILE))
            .map_err(|e| Error::Io(e.error))?;

        info!(collections = snapshot.len(), root = %root.display(), "saved all collections");
        Ok(())
    }

    /// Restore every collection listed in the manifest. Corrupt
    /// snapshots are skipped with a warning unless `strict` is set, in
    /// which case the first one fails the whole load.
    #[instrument(skip(self))]
    pub fn load_all(&self, strict: bool) -> Result<()> {
        let root = self.root()?.to_path_buf();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            info!(root = %root.display(), "no manifest; starting empty");
            return Ok(());
        }

        let json = fs::read_to_string(&manifest_path)?;
        let manifest: Manifest = serde_json::from_str(&json)
            .map_err(|e| Error::corrupt(&manifest_path, format!("bad manifest: {e}")))?;

        let mut loaded = 0usize;
        for config in manifest.collections {
            if let Err(e) = config.validate() {
                if strict {
                    return Err(e);
                }
                warn!(name = %config.name, error = %e, "skipping collection with bad config");
                continue;
            }
            let path = self
                .snapshot_path(&config.name)
                .ok_or_else(|| Error::internal("data dir vanished"))?;

            let index = if path.exists() {
                match HnswIndex::load(&path) {
                    Ok(index) => index,
                    Err(e @ Error::CorruptSnapshot { .. }) => {
                        if strict {
                            return Err(e);
                        }
                        warn!(name = %config.name, error = %e, "skipping corrupt snapshot");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                warn!(name = %config.name, "manifest entry without snapshot; starting empty");
                HnswIndex::new(config.dimension, config.metric, config.hnsw)?
            };

            if index.dimension() != config.dimension || index.metric() != config.metric {
                let e = Error::corrupt(&path, "snapshot does not match manifest config");
                if strict {
                    return Err(e);
                }
                warn!(name = %config.name, error = %e, "skipping mismatched snapshot");
                continue;
            }

            let name = config.name.clone();
            self.map_write()?
                .insert(name, Arc::new(Collection { config, index }));
            loaded += 1;
        }

        info!(collections = loaded, root = %root.display(), "loaded collections");
        Ok(())
    }
}

impl Default for VectorStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Collection names become file names; anything outside `[A-Za-z0-9._-]`
/// is replaced.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(name: &str, dimension: usize) -> CollectionConfig {
        let mut hnsw = HnswConfig::default();
        hnsw.seed = 42;
        CollectionConfig {
            name: name.to_string(),
            dimension,
            metric: DistanceMetric::Cosine,
            hnsw,
        }
    }

    #[test]
    fn test_create_and_list() {
        let storage = VectorStorage::new();
        assert!(storage.create_collection(config("alpha", 4)));
        assert!(storage.create_collection(config("beta", 8)));

        let mut names = storage.list_collections();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_create_duplicate_fails() {
        let storage = VectorStorage::new();
        assert!(storage.create_collection(config("dup", 4)));
        assert!(!storage.create_collection(config("dup", 4)));
    }

    #[test]
    fn test_create_invalid_config_fails() {
        let storage = VectorStorage::new();
        assert!(!storage.create_collection(config("", 4)));
        assert!(!storage.create_collection(config("zero-dim", 0)));
        assert!(storage.list_collections().is_empty());
    }

    #[test]
    fn test_delete_collection() {
        let storage = VectorStorage::new();
        assert!(storage.create_collection(config("gone", 4)));
        assert!(storage.delete_collection("gone"));
        assert!(!storage.delete_collection("gone"));
        assert!(storage.list_collections().is_empty());
    }

    #[test]
    fn test_unknown_collection_errors() {
        let storage = VectorStorage::new();
        assert!(matches!(
            storage.insert("nope", vec![1.0], None, HashMap::new()),
            Err(Error::UnknownCollection(_))
        ));
        assert!(matches!(
            storage.search("nope", &[1.0], 5, None),
            Err(Error::UnknownCollection(_))
        ));
        assert!(storage.get_stats("nope").is_none());
    }

    #[test]
    fn test_data_ops_delegate() {
        let storage = VectorStorage::new();
        assert!(storage.create_collection(config("c", 3)));

        let id = storage
            .insert("c", vec![1.0, 0.0, 0.0], Some("a".to_string()), HashMap::new())
            .unwrap();
        assert_eq!(id, "a");

        let found = storage.get("c", "a").unwrap().unwrap();
        assert_eq!(found.values, vec![1.0, 0.0, 0.0]);

        let results = storage.search("c", &[1.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(results[0].id, "a");

        assert!(storage.remove("c", "a").unwrap());
        assert!(storage.get("c", "a").unwrap().is_none());
    }

    #[test]
    fn test_stats_shape() {
        let storage = VectorStorage::new();
        assert!(storage.create_collection(config("s", 3)));
        storage
            .insert("s", vec![1.0, 2.0, 3.0], None, HashMap::new())
            .unwrap();

        let stats = storage.get_stats("s").unwrap();
        assert_eq!(stats.name, "s");
        assert_eq!(stats.dimension, 3);
        assert_eq!(stats.vector_count, 1);
        assert_eq!(stats.metric, DistanceMetric::Cosine);
        assert!(stats.memory_usage_bytes > 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();

        let storage = VectorStorage::with_data_dir(dir.path());
        assert!(storage.create_collection(config("persisted", 3)));
        for i in 0..20 {
            storage
                .insert(
                    "persisted",
                    vec![i as f32, 1.0, 0.0],
                    Some(format!("n{i}")),
                    HashMap::new(),
                )
                .unwrap();
        }
        let before = storage.search("persisted", &[5.0, 1.0, 0.0], 5, None).unwrap();
        storage.save_all().unwrap();

        let restored = VectorStorage::with_data_dir(dir.path());
        restored.load_all(false).unwrap();
        assert_eq!(restored.list_collections(), vec!["persisted"]);
        assert_eq!(restored.get_stats("persisted").unwrap().vector_count, 20);

        let after = restored.search("persisted", &[5.0, 1.0, 0.0], 5, None).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.id, a.id);
        }
    }

    #[test]
    fn test_delete_removes_snapshot_file() {
        let dir = TempDir::new().unwrap();
        let storage = VectorStorage::with_data_dir(dir.path());
        assert!(storage.create_collection(config("temp", 3)));

        let snapshot = dir.path().join("temp.hnsw");
        assert!(snapshot.exists());

        assert!(storage.delete_collection("temp"));
        assert!(!snapshot.exists());
    }

    #[test]
    fn test_load_all_skips_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();

        let storage = VectorStorage::with_data_dir(dir.path());
        assert!(storage.create_collection(config("ok", 3)));
        assert!(storage.create_collection(config("broken", 3)));
        storage
            .insert("ok", vec![1.0, 0.0, 0.0], None, HashMap::new())
            .unwrap();
        storage.save_all().unwrap();

        fs::write(dir.path().join("broken.hnsw"), b"garbage").unwrap();

        let lenient = VectorStorage::with_data_dir(dir.path());
        lenient.load_all(false).unwrap();
        assert_eq!(lenient.list_collections(), vec!["ok"]);

        let strict = VectorStorage::with_data_dir(dir.path());
        assert!(matches!(
            strict.load_all(true),
            Err(Error::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_save_without_data_dir_fails() {
        let storage = VectorStorage::new();
        assert!(matches!(storage.save_all(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("plain-name_1.0"), "plain-name_1.0");
        assert_eq!(sanitize_name("weird/../name"), "weird_.._name");
        assert_eq!(sanitize_name("with space"), "with_space");
    }
}
