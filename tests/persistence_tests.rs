//! Persistence round trips across storage instances
//!
//! A second `VectorStorage` pointed at the same directory stands in for
//! a process restart.

use std::collections::HashMap;
use std::fs;

use tempfile::TempDir;

use vesper::hnsw::{DistanceMetric, HnswConfig};
use vesper::storage::{CollectionConfig, VectorStorage};
use vesper::Error;

fn config(name: &str, dimension: usize, metric: DistanceMetric) -> CollectionConfig {
    let mut hnsw = HnswConfig::default();
    hnsw.seed = 42;
    CollectionConfig {
        name: name.to_string(),
        dimension,
        metric,
        hnsw,
    }
}

#[test]
fn test_restart_preserves_collection_and_search_order() {
    let dir = TempDir::new().unwrap();

    let storage = VectorStorage::with_data_dir(dir.path());
    assert!(storage.create_collection(config("c1", 3, DistanceMetric::Cosine)));
    for (id, values) in [
        ("a", vec![1.0, 0.0, 0.0]),
        ("b", vec![0.0, 1.0, 0.0]),
        ("c", vec![0.0, 0.0, 1.0]),
    ] {
        storage
            .insert("c1", values, Some(id.to_string()), HashMap::new())
            .unwrap();
    }
    assert!(storage.remove("c1", "a").unwrap());

    let before = storage.search("c1", &[1.0, 0.0, 0.0], 2, None).unwrap();
    storage.save_all().unwrap();

    // "Restart": a fresh storage over the same directory.
    let restarted = VectorStorage::with_data_dir(dir.path());
    restarted.load_all(false).unwrap();

    let stats = restarted.get_stats("c1").unwrap();
    assert_eq!(stats.vector_count, 2);
    assert_eq!(stats.metric, DistanceMetric::Cosine);

    let after = restarted.search("c1", &[1.0, 0.0, 0.0], 2, None).unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.id, a.id);
        assert!((b.distance - a.distance).abs() < 1e-5);
    }
    assert!(after.iter().all(|r| r.id != "a"));
}

#[test]
fn test_restart_preserves_multiple_collections() {
    let dir = TempDir::new().unwrap();

    let storage = VectorStorage::with_data_dir(dir.path());
    assert!(storage.create_collection(config("cosine", 4, DistanceMetric::Cosine)));
    assert!(storage.create_collection(config("euclid", 8, DistanceMetric::Euclidean)));

    for i in 0..25 {
        storage
            .insert("cosine", vec![i as f32, 1.0, 0.0, -1.0], None, HashMap::new())
            .unwrap();
        storage
            .insert("euclid", vec![i as f32; 8], None, HashMap::new())
            .unwrap();
    }
    storage.save_all().unwrap();

    let restarted = VectorStorage::with_data_dir(dir.path());
    restarted.load_all(false).unwrap();

    let mut names = restarted.list_collections();
    names.sort();
    assert_eq!(names, vec!["cosine", "euclid"]);
    assert_eq!(restarted.get_stats("cosine").unwrap().vector_count, 25);
    assert_eq!(restarted.get_stats("euclid").unwrap().vector_count, 25);
    assert_eq!(restarted.get_stats("euclid").unwrap().dimension, 8);
}

#[test]
fn test_metadata_survives_restart() {
    let dir = TempDir::new().unwrap();

    let storage = VectorStorage::with_data_dir(dir.path());
    assert!(storage.create_collection(config("meta", 2, DistanceMetric::Euclidean)));

    let mut metadata = HashMap::new();
    metadata.insert("title".to_string(), "first document".to_string());
    metadata.insert("lang".to_string(), "en".to_string());
    storage
        .insert("meta", vec![0.5, -0.5], Some("doc1".to_string()), metadata.clone())
        .unwrap();
    storage.save_all().unwrap();

    let restarted = VectorStorage::with_data_dir(dir.path());
    restarted.load_all(false).unwrap();

    let data = restarted.get("meta", "doc1").unwrap().unwrap();
    assert_eq!(data.values, vec![0.5, -0.5]);
    assert_eq!(data.metadata, metadata);
}

#[test]
fn test_corrupt_snapshot_skipped_unless_strict() {
    let dir = TempDir::new().unwrap();

    let storage = VectorStorage::with_data_dir(dir.path());
    assert!(storage.create_collection(config("good", 3, DistanceMetric::Cosine)));
    assert!(storage.create_collection(config("bad", 3, DistanceMetric::Cosine)));
    storage
        .insert("good", vec![1.0, 0.0, 0.0], None, HashMap::new())
        .unwrap();
    storage.save_all().unwrap();

    // Truncate one snapshot to simulate a torn write from a crash.
    let bad_path = dir.path().join("bad.hnsw");
    let bytes = fs::read(&bad_path).unwrap();
    fs::write(&bad_path, &bytes[..bytes.len() / 3]).unwrap();

    let lenient = VectorStorage::with_data_dir(dir.path());
    lenient.load_all(false).unwrap();
    assert_eq!(lenient.list_collections(), vec!["good"]);

    let strict = VectorStorage::with_data_dir(dir.path());
    let err = strict.load_all(true).unwrap_err();
    assert!(matches!(err, Error::CorruptSnapshot { .. }));
}

#[test]
fn test_repeated_save_load_is_stable() {
    let dir = TempDir::new().unwrap();

    let storage = VectorStorage::with_data_dir(dir.path());
    assert!(storage.create_collection(config("stable", 6, DistanceMetric::Euclidean)));
    for i in 0..50 {
        storage
            .insert(
                "stable",
                vec![i as f32, 0.0, 1.0, -1.0, 0.5, 2.0],
                Some(format!("n{i}")),
                HashMap::new(),
            )
            .unwrap();
    }

    let query = vec![25.0, 0.0, 1.0, -1.0, 0.5, 2.0];
    let mut expected: Option<Vec<String>> = None;

    // Save/load cycles must not drift: same ids in the same order.
    let mut current = storage;
    for _ in 0..3 {
        current.save_all().unwrap();
        let next = VectorStorage::with_data_dir(dir.path());
        next.load_all(false).unwrap();

        let ids: Vec<String> = next
            .search("stable", &query, 10, None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        match &expected {
            None => expected = Some(ids),
            Some(prior) => assert_eq!(prior, &ids),
        }
        current = next;
    }
}
