//! Versioned binary snapshots for HNSW indexes
//!
//! Layout (little-endian):
//! 1. Magic `HNSW\0` (5 bytes)
//! 2. u32 format version
//! 3. u32 dimension, u32 metric code, u32 m, u32 m_max0,
//!    u32 ef_construction, u32 ef_search, f32 ml
//! 4. u32 max_level, i64 entry_point (-1 when empty)
//! 5. u64 node_count, then per node: u64 internal_index, u32 level,
//!    u8 tombstone flag, length-prefixed id, u32 metadata count with
//!    length-prefixed key/value pairs, dimension * f32 values
//! 6. Per node (stream order), per layer 0..=level: u32 neighbor_count,
//!    neighbor_count * u64 internal indices
//! 7. u32 CRC-32 over everything before it
//!
//! Writers compact: tombstoned nodes are dropped and internal indices
//! rewritten densely, so the flag byte is always written as 0. Loaders
//! still honor a set flag. Replacement is atomic (temp file + rename).

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{info, instrument};

use super::index::{HnswIndex, IndexState};
use super::types::{DistanceMetric, HnswConfig, Node, VectorData, MAX_LEVEL};
use crate::error::{Error, Result};

const MAGIC: &[u8; 5] = b"HNSW\0";
const FORMAT_VERSION: u32 = 1;

/// Dimensions above this are rejected before any allocation is sized
/// from the header.
const MAX_DIMENSION: usize = 65_536;

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

impl HnswIndex {
    /// Write a compacted snapshot of this index to `path`.
    #[instrument(skip(self, path))]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        // Exclusive lock: the graph must not move while it is serialized.
        let state = self.lock_write()?;

        let live: Vec<u32> = (0..state.nodes.len() as u32)
            .filter(|i| !state.tombstones.contains(i))
            .collect();
        let mut remap = vec![u32::MAX; state.nodes.len()];
        for (new_idx, &old) in live.iter().enumerate() {
            remap[old as usize] = new_idx as u32;
        }

        let max_level = live
            .iter()
            .map(|&i| state.nodes[i as usize].level)
            .max()
            .unwrap_or(0);
        let entry_point = match state.entry_point {
            Some(e) => {
                let mapped = remap[e as usize];
                if mapped == u32::MAX {
                    return Err(Error::internal("entry point is tombstoned"));
                }
                mapped as i64
            }
            None => -1,
        };

        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        put_u32(&mut buf, FORMAT_VERSION);
        put_u32(&mut buf, self.dimension() as u32);
        put_u32(&mut buf, self.metric().code());
        put_u32(&mut buf, self.config().m as u32);
        put_u32(&mut buf, self.config().m_max0 as u32);
        put_u32(&mut buf, self.config().ef_construction as u32);
        put_u32(&mut buf, self.config().ef_search as u32);
        put_f32(&mut buf, self.config().ml);
        put_u32(&mut buf, max_level as u32);
        put_i64(&mut buf, entry_point);

        put_u64(&mut buf, live.len() as u64);
        for (new_idx, &old) in live.iter().enumerate() {
            let node = &state.nodes[old as usize];
            let payload = state.payloads[old as usize]
                .as_ref()
                .ok_or_else(|| Error::internal(format!("live node {old} has no payload")))?;

            put_u64(&mut buf, new_idx as u64);
            put_u32(&mut buf, node.level as u32);
            buf.push(0u8);
            put_str(&mut buf, &payload.id);

            // Sorted metadata keys keep snapshot bytes stable across runs.
            let mut entries: Vec<_> = payload.metadata.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            put_u32(&mut buf, entries.len() as u32);
            for (key, value) in entries {
                put_str(&mut buf, key);
                put_str(&mut buf, value);
            }

            for &v in &payload.values {
                put_f32(&mut buf, v);
            }
        }

        for &old in &live {
            let node = &state.nodes[old as usize];
            for list in &node.neighbors {
                let mapped: Vec<u32> = list
                    .iter()
                    .map(|&n| remap[n as usize])
                    .filter(|&n| n != u32::MAX)
                    .collect();
                put_u32(&mut buf, mapped.len() as u32);
                for n in mapped {
                    put_u64(&mut buf, n as u64);
                }
            }
        }

        let crc = crc32fast::hash(&buf);
        put_u32(&mut buf, crc);

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        info!(
            path = %path.display(),
            nodes = live.len(),
            bytes = buf.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Load an index from a snapshot written by [`save`](Self::save).
    #[instrument(skip(path))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;

        if bytes.len() < MAGIC.len() + 8 {
            return Err(Error::corrupt(path, "file too short"));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_le_bytes(
            crc_bytes
                .try_into()
                .map_err(|_| Error::corrupt(path, "missing checksum"))?,
        );
        if crc32fast::hash(body) != stored_crc {
            return Err(Error::corrupt(path, "checksum mismatch"));
        }

        let mut r = SnapReader::new(body, path);
        if r.bytes(MAGIC.len())? != &MAGIC[..] {
            return Err(Error::corrupt(path, "bad magic"));
        }
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::corrupt(path, format!("unsupported version {version}")));
        }

        let dimension = r.u32()? as usize;
        if dimension == 0 || dimension > MAX_DIMENSION {
            return Err(Error::corrupt(path, format!("implausible dimension {dimension}")));
        }
        let metric_code = r.u32()?;
        let metric = DistanceMetric::from_code(metric_code)
            .ok_or_else(|| Error::corrupt(path, format!("unknown metric code {metric_code}")))?;
        let config = HnswConfig {
            m: r.u32()? as usize,
            m_max0: r.u32()? as usize,
            ef_construction: r.u32()? as usize,
            ef_search: r.u32()? as usize,
            ml: r.f32()?,
            seed: rand::random(),
        };
        config
            .validate()
            .map_err(|e| Error::corrupt(path, format!("bad index params: {e}")))?;

        let max_level = r.u32()?;
        if max_level > MAX_LEVEL as u32 {
            return Err(Error::corrupt(path, format!("implausible max_level {max_level}")));
        }
        let entry_raw = r.i64()?;
        let node_count = r.u64()? as usize;

        let mut levels: Vec<Option<u8>> = vec![None; node_count];
        let mut tombstoned: Vec<bool> = vec![false; node_count];
        let mut payloads: Vec<Option<VectorData>> = vec![None; node_count];
        let mut stream_order: Vec<u32> = Vec::with_capacity(node_count.min(1 << 20));

        for _ in 0..node_count {
            let internal = r.u64()? as usize;
            if internal >= node_count {
                return Err(Error::corrupt(path, format!("node index {internal} out of range")));
            }
            if levels[internal].is_some() {
                return Err(Error::corrupt(path, format!("duplicate node index {internal}")));
            }
            let level = r.u32()?;
            if level > MAX_LEVEL as u32 {
                return Err(Error::corrupt(path, format!("implausible level {level}")));
            }
            let tomb = r.u8()? != 0;
            let id = r.string()?;

            let meta_count = r.u32()?;
            let mut metadata = HashMap::new();
            for _ in 0..meta_count {
                let key = r.string()?;
                let value = r.string()?;
                metadata.insert(key, value);
            }

            let mut values = Vec::with_capacity(dimension);
            for _ in 0..dimension {
                values.push(r.f32()?);
            }

            levels[internal] = Some(level as u8);
            tombstoned[internal] = tomb;
            payloads[internal] = Some(VectorData { id, values, metadata });
            stream_order.push(internal as u32);
        }

        let mut adjacency: Vec<Option<Vec<Vec<u32>>>> = vec![None; node_count];
        for &internal in &stream_order {
            let level = levels[internal as usize]
                .ok_or_else(|| Error::corrupt(path, "node stream inconsistent"))?;
            let mut lists = Vec::with_capacity(level as usize + 1);
            for _ in 0..=level {
                let count = r.u32()? as usize;
                let mut list = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    let neighbor = r.u64()?;
                    if neighbor >= node_count as u64 {
                        return Err(Error::corrupt(
                            path,
                            format!("neighbor index {neighbor} out of range"),
                        ));
                    }
                    list.push(neighbor as u32);
                }
                lists.push(list);
            }
            adjacency[internal as usize] = Some(lists);
        }

        if !r.at_end() {
            return Err(Error::corrupt(path, "trailing bytes after adjacency"));
        }

        let mut state = IndexState::empty(config.seed);
        for i in 0..node_count {
            let level = levels[i].ok_or_else(|| Error::corrupt(path, "missing node entry"))?;
            let neighbors = adjacency[i]
                .take()
                .ok_or_else(|| Error::corrupt(path, "missing adjacency entry"))?;
            state.nodes.push(Node { level, neighbors });

            let data = payloads[i]
                .take()
                .ok_or_else(|| Error::corrupt(path, "missing payload entry"))?;
            if data.values.len() != dimension {
                return Err(Error::corrupt(path, "payload dimension mismatch"));
            }
            if tombstoned[i] {
                state.tombstones.insert(i as u32);
                state.payloads.push(None);
            } else {
                if state.id_to_internal.insert(data.id.clone(), i as u32).is_some() {
                    return Err(Error::corrupt(path, format!("duplicate id {:?}", data.id)));
                }
                state.payloads.push(Some(data));
            }
        }

        state.max_level = max_level as u8;
        state.entry_point = match entry_raw {
            -1 => None,
            e if e >= 0 && (e as usize) < node_count => {
                let e = e as u32;
                if state.tombstones.contains(&e) {
                    return Err(Error::corrupt(path, "entry point is tombstoned"));
                }
                Some(e)
            }
            e => return Err(Error::corrupt(path, format!("entry point {e} out of range"))),
        };
        if state.entry_point.is_none() && !state.id_to_internal.is_empty() {
            return Err(Error::corrupt(path, "live nodes without an entry point"));
        }
        state.next_seq = state.id_to_internal.len() as u64;

        info!(
            path = %path.display(),
            nodes = node_count,
            live = state.id_to_internal.len(),
            "snapshot loaded"
        );
        Ok(HnswIndex::from_state(dimension, metric, config, state))
    }
}

/// Bounds-checked little-endian reader over a snapshot body. Any read
/// past the end reports the snapshot as corrupt.
struct SnapReader<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> SnapReader<'a> {
    fn new(buf: &'a [u8], path: &'a Path) -> Self {
        Self { buf, pos: 0, path }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::corrupt(self.path, "unexpected end of file"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::corrupt(self.path, "invalid utf-8 string"))
    }

    fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded_index(dimension: usize, metric: DistanceMetric) -> HnswIndex {
        let mut config = HnswConfig::default();
        config.seed = 42;
        HnswIndex::new(dimension, metric, config).unwrap()
    }

    fn fill(index: &HnswIndex, count: usize) {
        for i in 0..count {
            let v: Vec<f32> = (0..index.dimension())
                .map(|d| ((i * 31 + d * 7) % 97) as f32 / 97.0)
                .collect();
            let mut metadata = HashMap::new();
            metadata.insert("ordinal".to_string(), i.to_string());
            index
                .insert(v, Some(format!("n{i}")), metadata)
                .unwrap();
        }
    }

    #[test]
    fn test_round_trip_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.hnsw");

        let index = seeded_index(3, DistanceMetric::Cosine);
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.metric(), DistanceMetric::Cosine);
        assert_eq!(loaded.len(), 0);
    }

    #[test]
    fn test_round_trip_preserves_payloads_and_results() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.hnsw");

        let index = seeded_index(8, DistanceMetric::Euclidean);
        fill(&index, 60);

        let query = vec![0.5; 8];
        let before = index.search(&query, 10, Some(40)).unwrap();

        index.save(&path).unwrap();
        let loaded = HnswIndex::load(&path).unwrap();

        assert_eq!(loaded.len(), 60);
        for i in 0..60 {
            let original = index.get(&format!("n{i}")).unwrap().unwrap();
            let restored = loaded.get(&format!("n{i}")).unwrap().unwrap();
            assert_eq!(original.values, restored.values);
            assert_eq!(original.metadata, restored.metadata);
        }

        let after = loaded.search(&query, 10, Some(40)).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.id, a.id);
            assert!((b.distance - a.distance).abs() < 1e-5);
        }
    }

    #[test]
    fn test_save_compacts_tombstones() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("compact.hnsw");

        let index = seeded_index(4, DistanceMetric::Cosine);
        fill(&index, 40);
        for i in (0..40).step_by(2) {
            assert!(index.remove(&format!("n{i}")).unwrap());
        }
        assert_eq!(index.len(), 20);

        index.save(&path).unwrap();
        let loaded = HnswIndex::load(&path).unwrap();

        assert_eq!(loaded.len(), 20);
        // Compaction rewrote the arena densely: no tombstones remain.
        let state = loaded.lock_read().unwrap();
        assert_eq!(state.nodes.len(), 20);
        assert!(state.tombstones.is_empty());
        drop(state);

        assert!(loaded.get("n0").unwrap().is_none());
        assert!(loaded.get("n1").unwrap().is_some());

        let results = loaded.search(&vec![0.3; 4], 20, Some(64)).unwrap();
        assert!(results.iter().all(|r| {
            let n: usize = r.id[1..].parse().unwrap();
            n % 2 == 1
        }));
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.hnsw");
        fs::write(&path, b"WRONG\0\0\0\0\0\0\0\0\0").unwrap();

        match HnswIndex::load(&path) {
            Err(Error::CorruptSnapshot { reason, .. }) => {
                assert!(reason.contains("magic") || reason.contains("checksum"));
            }
            other => panic!("expected CorruptSnapshot, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_rejects_unsupported_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("version.hnsw");

        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        put_u32(&mut buf, 99);
        let crc = crc32fast::hash(&buf);
        put_u32(&mut buf, crc);
        fs::write(&path, &buf).unwrap();

        match HnswIndex::load(&path) {
            Err(Error::CorruptSnapshot { reason, .. }) => {
                assert!(reason.contains("version"));
            }
            other => panic!("expected CorruptSnapshot, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_rejects_flipped_byte() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flip.hnsw");

        let index = seeded_index(4, DistanceMetric::Cosine);
        fill(&index, 10);
        index.save(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        match HnswIndex::load(&path) {
            Err(Error::CorruptSnapshot { reason, .. }) => {
                assert!(reason.contains("checksum"));
            }
            other => panic!("expected CorruptSnapshot, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trunc.hnsw");

        let index = seeded_index(4, DistanceMetric::Cosine);
        fill(&index, 10);
        index.save(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            HnswIndex::load(&path),
            Err(Error::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replace.hnsw");

        let first = seeded_index(4, DistanceMetric::Cosine);
        fill(&first, 5);
        first.save(&path).unwrap();

        let second = seeded_index(4, DistanceMetric::Cosine);
        fill(&second, 25);
        second.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 25);
    }

    #[test]
    fn test_loaded_index_accepts_new_inserts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grow.hnsw");

        let index = seeded_index(4, DistanceMetric::Cosine);
        fill(&index, 15);
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        let minted = loaded.insert(vec![0.1; 4], None, HashMap::new()).unwrap();
        assert_eq!(loaded.len(), 16);
        assert!(loaded.get(&minted).unwrap().is_some());
    }
}
