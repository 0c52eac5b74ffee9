//! HNSW index
//!
//! Hierarchical graph index for approximate nearest neighbor search.
//!
//! Architecture:
//! - Arena of nodes addressed by dense u32 internal indices
//! - Caller-visible string ids mapped both ways
//! - Soft deletion via a tombstone set, filtered out during traversal;
//!   compaction happens when a snapshot is written
//! - One reader-writer lock per index; searches share it, mutations and
//!   snapshot I/O hold it exclusively

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use super::query_buffers;
use super::types::{
    Candidate, DistanceMetric, HnswConfig, Node, SearchResult, VectorData, VectorRecord, MAX_LEVEL,
};
use crate::error::{Error, Result};

/// Mutable index state guarded by the per-index lock.
pub(crate) struct IndexState {
    pub nodes: Vec<Node>,
    /// Payload slab; `None` marks a logically freed (tombstoned) slot.
    pub payloads: Vec<Option<VectorData>>,
    pub id_to_internal: HashMap<String, u32>,
    pub tombstones: HashSet<u32>,
    pub entry_point: Option<u32>,
    pub max_level: u8,
    /// LCG state for level assignment
    pub rng_state: u64,
    /// Counter behind minted ids
    pub next_seq: u64,
}

impl IndexState {
    pub(crate) fn empty(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            payloads: Vec::new(),
            id_to_internal: HashMap::new(),
            tombstones: HashSet::new(),
            entry_point: None,
            max_level: 0,
            rng_state: seed,
            next_seq: 0,
        }
    }
}

/// HNSW index over one collection's vectors.
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    config: HnswConfig,
    inner: RwLock<IndexState>,
}

impl HnswIndex {
    /// Create a new empty index.
    pub fn new(dimension: usize, metric: DistanceMetric, config: HnswConfig) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidConfig(
                "dimension must be at least 1".to_string(),
            ));
        }
        config.validate().map_err(Error::InvalidConfig)?;

        Ok(Self {
            dimension,
            metric,
            config,
            inner: RwLock::new(IndexState::empty(config.seed)),
        })
    }

    pub(crate) fn from_state(
        dimension: usize,
        metric: DistanceMetric,
        config: HnswConfig,
        state: IndexState,
    ) -> Self {
        Self {
            dimension,
            metric,
            config,
            inner: RwLock::new(state),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Live vector count (tombstones excluded).
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|s| s.id_to_internal.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lock_read(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.inner
            .read()
            .map_err(|_| Error::internal("index lock poisoned"))
    }

    pub(crate) fn lock_write(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.inner
            .write()
            .map_err(|_| Error::internal("index lock poisoned"))
    }

    /// Insert a vector. Replaces the existing entry when `id` is already
    /// present. When `id` is omitted a fresh one is minted. Returns the
    /// effective id.
    #[instrument(skip(self, values, id, metadata), fields(dim = values.len()))]
    pub fn insert(
        &self,
        values: Vec<f32>,
        id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let mut state = self.lock_write()?;
        let id = self.insert_locked(&mut state, values, id, metadata)?;
        debug!(id = %id, size = state.id_to_internal.len(), "inserted vector");
        Ok(id)
    }

    /// Insert many vectors under one writer-lock acquisition. Entries
    /// with a wrong dimension or non-finite values are skipped; the
    /// return value counts successes.
    #[instrument(skip(self, records), fields(batch = records.len()))]
    pub fn batch_insert(&self, records: Vec<VectorRecord>) -> Result<usize> {
        let mut state = self.lock_write()?;
        let mut inserted = 0;
        for record in records {
            match self.insert_locked(&mut state, record.values, record.id, record.metadata) {
                Ok(_) => inserted += 1,
                Err(Error::DimensionMismatch { expected, actual }) => {
                    warn!(expected, actual, "skipping batch entry: dimension mismatch");
                }
                Err(Error::InvalidVector) => {
                    warn!("skipping batch entry: non-finite values");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    /// Fetch a stored vector by id.
    pub fn get(&self, id: &str) -> Result<Option<VectorData>> {
        let state = self.lock_read()?;
        match state.id_to_internal.get(id) {
            Some(&internal) => Ok(state.payloads[internal as usize].clone()),
            None => Ok(None),
        }
    }

    /// Soft-delete a vector. The graph keeps the node's edges until the
    /// next snapshot compaction; searches filter it immediately.
    /// Returns `true` iff the id existed.
    #[instrument(skip(self))]
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.lock_write()?;
        let removed = Self::remove_locked(&mut state, id);
        if removed {
            debug!(id, size = state.id_to_internal.len(), "removed vector");
        }
        Ok(removed)
    }

    /// Search for the `k` nearest live vectors, ordered by ascending
    /// distance. `ef_override` replaces the configured `ef_search` for
    /// this call; the beam is always at least `k` wide.
    #[instrument(skip(self, query), fields(k, dim = query.len()))]
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidVector);
        }

        let state = self.lock_read()?;
        if k == 0 || state.id_to_internal.is_empty() {
            return Ok(Vec::new());
        }
        let entry = state
            .entry_point
            .ok_or_else(|| Error::internal("entry point missing on non-empty index"))?;

        let ef = ef_override.unwrap_or(self.config.ef_search).max(k);

        let entry_dist = self.metric.raw_distance(query, Self::vector_of(&state, entry)?);
        let mut best = Candidate::new(entry, entry_dist);
        if state.max_level > 0 {
            best = self.descend(&state, query, best, state.max_level, 1)?;
        }

        let found = self.search_layer(&state, query, &[best], ef, 0)?;
        found
            .into_iter()
            .take(k)
            .map(|c| {
                let payload = state.payloads[c.internal as usize]
                    .as_ref()
                    .ok_or_else(|| Error::internal("search returned tombstoned node"))?;
                Ok(SearchResult {
                    id: payload.id.clone(),
                    distance: self.metric.finalize(c.distance.0),
                })
            })
            .collect()
    }

    /// Run independent searches for every query. Results are identical
    /// to calling [`search`](Self::search) in a loop; queries fan out
    /// over the rayon pool and each worker re-enters the reader lock.
    pub fn batch_search(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        ef_override: Option<usize>,
    ) -> Result<Vec<Vec<SearchResult>>> {
        queries
            .par_iter()
            .map(|query| self.search(query, k, ef_override))
            .collect()
    }

    /// Approximate resident bytes: arena, adjacency, payload slab,
    /// mapping tables.
    pub fn memory_usage(&self) -> usize {
        let Ok(state) = self.inner.read() else {
            return 0;
        };
        let mut total = state.nodes.capacity() * std::mem::size_of::<Node>()
            + state.payloads.capacity() * std::mem::size_of::<Option<VectorData>>();
        total += Self::adjacency_bytes(&state);
        for payload in state.payloads.iter().flatten() {
            total += payload.values.capacity() * std::mem::size_of::<f32>();
            total += payload.id.capacity();
            for (k, v) in &payload.metadata {
                total += k.capacity() + v.capacity();
            }
        }
        for id in state.id_to_internal.keys() {
            total += id.capacity() + std::mem::size_of::<String>() + std::mem::size_of::<u32>();
        }
        total += state.tombstones.len() * std::mem::size_of::<u32>();
        total
    }

    /// Bytes held by neighbor lists alone (the graph, minus payloads).
    pub fn graph_bytes(&self) -> usize {
        self.inner
            .read()
            .map(|s| Self::adjacency_bytes(&s))
            .unwrap_or(0)
    }

    fn adjacency_bytes(state: &IndexState) -> usize {
        let mut total = 0;
        for node in &state.nodes {
            total += node.neighbors.capacity() * std::mem::size_of::<Vec<u32>>();
            for list in &node.neighbors {
                total += list.capacity() * std::mem::size_of::<u32>();
            }
        }
        total
    }

    // ------------------------------------------------------------------
    // Build internals (all under the writer lock)
    // ------------------------------------------------------------------

    fn insert_locked(
        &self,
        state: &mut IndexState,
        values: Vec<f32>,
        id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        if values.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: values.len(),
            });
        }
        if values.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidVector);
        }

        let id = match id {
            Some(id) => {
                if state.id_to_internal.contains_key(&id) {
                    Self::remove_locked(state, &id);
                }
                id
            }
            None => Self::mint_id(state),
        };

        let internal = state.nodes.len() as u32;
        let level = self.random_level(state);
        state.nodes.push(Node::new(level));
        state.payloads.push(Some(VectorData {
            id: id.clone(),
            values: values.clone(),
            metadata,
        }));
        state.id_to_internal.insert(id.clone(), internal);

        match state.entry_point {
            None => {
                state.entry_point = Some(internal);
                state.max_level = level;
            }
            Some(_) => {
                self.link_new_node(state, internal, level, &values)?;
                if level > state.max_level {
                    state.entry_point = Some(internal);
                    state.max_level = level;
                }
            }
        }
        Ok(id)
    }

    /// Wire a freshly allocated node into layers `0..=level`.
    fn link_new_node(
        &self,
        state: &mut IndexState,
        internal: u32,
        level: u8,
        vector: &[f32],
    ) -> Result<()> {
        let entry = state
            .entry_point
            .ok_or_else(|| Error::internal("linking into an empty graph"))?;
        let entry_dist = self.metric.raw_distance(vector, Self::vector_of(state, entry)?);
        let mut best = Candidate::new(entry, entry_dist);

        // Greedy descent through the layers above the new node's top.
        if state.max_level > level {
            best = self.descend(state, vector, best, state.max_level, level + 1)?;
        }

        let mut nearest = vec![best];
        for layer in (0..=level.min(state.max_level)).rev() {
            let candidates =
                self.search_layer(state, vector, &nearest, self.config.ef_construction, layer)?;
            let cap = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };

            let selected = self.select_neighbors(state, &candidates, cap)?;
            for c in &selected {
                Self::add_link(state, internal, c.internal, layer);
                Self::add_link(state, c.internal, internal, layer);
            }

            // Re-prune any neighbor whose list now exceeds the cap.
            for c in &selected {
                let len = state.nodes[c.internal as usize].neighbors[layer as usize].len();
                if len <= cap {
                    continue;
                }
                let owner = Self::vector_of(state, c.internal)?.to_vec();
                let current = state.nodes[c.internal as usize].neighbors[layer as usize].clone();
                let ranked = current
                    .iter()
                    .map(|&n| {
                        let dist = self.metric.raw_distance(&owner, Self::vector_of(state, n)?);
                        Ok(Candidate::new(n, dist))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let pruned = self.select_neighbors(state, &ranked, cap)?;
                state.nodes[c.internal as usize].neighbors[layer as usize] =
                    pruned.iter().map(|c| c.internal).collect();
            }

            nearest = candidates;
        }
        Ok(())
    }

    /// Neighbor selection heuristic: walk candidates closest-first and
    /// keep those not closer to an already-selected neighbor than to the
    /// anchor the candidate distances were measured from; unused slots
    /// are back-filled with the closest rejects.
    fn select_neighbors(
        &self,
        state: &IndexState,
        candidates: &[Candidate],
        m: usize,
    ) -> Result<Vec<Candidate>> {
        if candidates.len() <= m {
            return Ok(candidates.to_vec());
        }

        let mut sorted = candidates.to_vec();
        sorted.sort();

        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        let mut rejected = Vec::new();
        for &cand in &sorted {
            if selected.len() >= m {
                break;
            }
            let cand_vec = Self::vector_of(state, cand.internal)?;
            let mut diverse = true;
            for sel in &selected {
                let to_selected =
                    self.metric.raw_distance(cand_vec, Self::vector_of(state, sel.internal)?);
                if to_selected < cand.distance.0 {
                    diverse = false;
                    break;
                }
            }
            if diverse {
                selected.push(cand);
            } else {
                rejected.push(cand);
            }
        }

        for cand in rejected {
            if selected.len() >= m {
                break;
            }
            selected.push(cand);
        }
        Ok(selected)
    }

    fn add_link(state: &mut IndexState, from: u32, to: u32, layer: u8) {
        if from == to {
            return;
        }
        let node = &mut state.nodes[from as usize];
        if (layer as usize) >= node.neighbors.len() {
            return;
        }
        let list = &mut node.neighbors[layer as usize];
        if !list.contains(&to) {
            list.push(to);
        }
    }

    fn remove_locked(state: &mut IndexState, id: &str) -> bool {
        let Some(internal) = state.id_to_internal.remove(id) else {
            return false;
        };
        state.tombstones.insert(internal);
        state.payloads[internal as usize] = None;

        // The entry point must stay live; re-elect from the remaining
        // nodes at the highest level.
        if state.entry_point == Some(internal) {
            let mut best: Option<(u32, u8)> = None;
            for (idx, payload) in state.payloads.iter().enumerate() {
                if payload.is_some() {
                    let level = state.nodes[idx].level;
                    if best.map_or(true, |(_, top)| level > top) {
                        best = Some((idx as u32, level));
                    }
                }
            }
            match best {
                Some((idx, level)) => {
                    state.entry_point = Some(idx);
                    state.max_level = level;
                }
                None => {
                    state.entry_point = None;
                    state.max_level = 0;
                }
            }
        }
        true
    }

    fn mint_id(state: &mut IndexState) -> String {
        loop {
            state.next_seq += 1;
            let id = format!("v{:012}", state.next_seq);
            if !state.id_to_internal.contains_key(&id) {
                return id;
            }
        }
    }

    /// Exponential level assignment via the per-index LCG:
    /// `floor(-ln(u) * ml)`, clamped to [`MAX_LEVEL`].
    fn random_level(&self, state: &mut IndexState) -> u8 {
        state.rng_state = state
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        // Top 32 bits, mapped into the open interval (0, 1).
        let unit = ((state.rng_state >> 32) as u32 as f32 + 0.5) / (1u64 << 32) as f32;
        let level = (-unit.ln() * self.config.ml) as usize;
        level.min(MAX_LEVEL as usize) as u8
    }

    // ------------------------------------------------------------------
    // Traversal (shared by build and search)
    // ------------------------------------------------------------------

    fn vector_of<'a>(state: &'a IndexState, internal: u32) -> Result<&'a [f32]> {
        state
            .payloads
            .get(internal as usize)
            .and_then(|p| p.as_ref())
            .map(|p| p.values.as_slice())
            .ok_or_else(|| Error::internal(format!("missing payload for node {internal}")))
    }

    /// Greedy single-best descent from `from_layer` down to `to_layer`.
    fn descend(
        &self,
        state: &IndexState,
        query: &[f32],
        mut best: Candidate,
        from_layer: u8,
        to_layer: u8,
    ) -> Result<Candidate> {
        for layer in (to_layer..=from_layer).rev() {
            let found = self.search_layer(state, query, &[best], 1, layer)?;
            if let Some(&top) = found.first() {
                best = top;
            }
        }
        Ok(best)
    }

    /// Beam search within one layer. Entry candidates must be live.
    /// Returns up to `ef` live nodes sorted by ascending
    /// (distance, internal index).
    fn search_layer(
        &self,
        state: &IndexState,
        query: &[f32],
        entry_points: &[Candidate],
        ef: usize,
        layer: u8,
    ) -> Result<Vec<Candidate>> {
        query_buffers::with_buffers(|buffers| {
            for &ep in entry_points {
                buffers.visited.insert(ep.internal);
                buffers.candidates.push(Reverse(ep));
                buffers.results.push(ep);
            }

            while let Some(Reverse(current)) = buffers.candidates.pop() {
                if let Some(&worst) = buffers.results.peek() {
                    if current.distance > worst.distance {
                        break;
                    }
                }

                let node = &state.nodes[current.internal as usize];
                if (layer as usize) >= node.neighbors.len() {
                    continue;
                }
                for &neighbor in &node.neighbors[layer as usize] {
                    if !buffers.visited.insert(neighbor) {
                        continue;
                    }
                    if state.tombstones.contains(&neighbor) {
                        continue;
                    }

                    let dist = self
                        .metric
                        .raw_distance(query, Self::vector_of(state, neighbor)?);
                    let candidate = Candidate::new(neighbor, dist);

                    let admit = match buffers.results.peek() {
                        Some(&worst) => buffers.results.len() < ef || candidate < worst,
                        None => true,
                    };
                    if admit {
                        buffers.candidates.push(Reverse(candidate));
                        buffers.results.push(candidate);
                        if buffers.results.len() > ef {
                            buffers.results.pop();
                        }
                    }
                }
            }

            let mut out: Vec<Candidate> = buffers.results.drain().collect();
            out.sort();
            Ok(out)
        })
    }
}
