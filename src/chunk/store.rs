//! Chunk store
//!
//! Append-only ingestion, chunk boundary assignment, compression, and
//! retention-driven deletion for one logical table.
//!
//! The chunk index is the one piece of mutable shared state; it is read
//! far more often than written, so it lives in a lock-striped map and
//! each chunk carries its own lock. Compressing a chunk excludes only
//! writers of that chunk; appends into other chunks proceed unaffected.

use super::{ChunkRecord, ChunkRef, ChunkState, Segment, SegmentKey};
use crate::error::{Result, WattlineError};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

enum ChunkData<R> {
    Open(Vec<R>),
    Compressed {
        segments: Vec<Segment>,
        /// Rows accepted after compression when the late-write policy
        /// allows them; merged into reads, never re-encoded.
        late: Vec<R>,
    },
}

struct Chunk<R> {
    start: i64,
    end: i64,
    data: RwLock<ChunkData<R>>,
}

impl<R: ChunkRecord> Chunk<R> {
    fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            data: RwLock::new(ChunkData::Open(Vec::new())),
        }
    }

    fn state(&self) -> ChunkState {
        match &*self.data.read() {
            ChunkData::Open(_) => ChunkState::Open,
            ChunkData::Compressed { .. } => ChunkState::Compressed,
        }
    }

    fn row_count(&self) -> usize {
        match &*self.data.read() {
            ChunkData::Open(rows) => rows.len(),
            ChunkData::Compressed { segments, late } => {
                segments.iter().map(|s| s.row_count as usize).sum::<usize>() + late.len()
            }
        }
    }
}

/// Atomic store counters
#[derive(Default)]
struct StoreCounters {
    rows_appended: AtomicU64,
    rows_read: AtomicU64,
    appends_rejected: AtomicU64,
    chunks_compressed: AtomicU64,
    chunks_expired: AtomicU64,
}

/// Chunk store statistics snapshot
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ChunkStoreStats {
    /// Total chunks currently held
    pub total_chunks: usize,
    /// Chunks still accepting writes
    pub open_chunks: usize,
    /// Columnar-encoded chunks
    pub compressed_chunks: usize,
    /// Total rows across all chunks
    pub total_rows: usize,
    /// Rows appended since creation
    pub rows_appended: u64,
    /// Rows returned by queries since creation
    pub rows_read: u64,
    /// Appends rejected by the late-write policy
    pub appends_rejected: u64,
    /// Chunks compressed since creation
    pub chunks_compressed: u64,
    /// Chunks expired since creation
    pub chunks_expired: u64,
    /// Exclusive upper bound of expired data, if any chunk was expired
    pub expired_horizon: Option<i64>,
}

/// Chunk store for one logical table
pub struct ChunkStore<R: ChunkRecord> {
    /// Table name, for logs
    name: &'static str,
    width_ms: i64,
    allow_late_writes: bool,
    chunks: DashMap<i64, Arc<Chunk<R>>>,
    /// Exclusive upper bound of expired data; appends below it are
    /// rejected regardless of the late-write policy.
    expired_horizon: AtomicI64,
    counters: StoreCounters,
}

impl<R: ChunkRecord> ChunkStore<R> {
    /// Create a new chunk store
    pub fn new(name: &'static str, width_ms: i64, allow_late_writes: bool) -> Self {
        Self {
            name,
            width_ms,
            allow_late_writes,
            chunks: DashMap::new(),
            expired_horizon: AtomicI64::new(i64::MIN),
            counters: StoreCounters::default(),
        }
    }

    /// Chunk interval start containing a timestamp
    pub fn chunk_start_for(&self, time: i64) -> i64 {
        time.div_euclid(self.width_ms) * self.width_ms
    }

    /// Route a row to the chunk whose interval contains its timestamp,
    /// creating the chunk if absent
    pub fn append(&self, row: R) -> Result<ChunkRef> {
        let time = row.time();
        let start = self.chunk_start_for(time);

        let horizon = self.expired_horizon.load(Ordering::Acquire);
        if time < horizon {
            self.counters.appends_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(WattlineError::OutOfOrderWrite {
                time,
                chunk_start: start,
                state: ChunkState::Expired.as_str(),
            });
        }

        let chunk = self
            .chunks
            .entry(start)
            .or_insert_with(|| Arc::new(Chunk::new(start, start + self.width_ms)))
            .clone();

        let mut data = chunk.data.write();

        // Re-check under the chunk lock: a concurrent expiry between the
        // first check and the map insert must not resurrect dead ranges.
        let horizon = self.expired_horizon.load(Ordering::Acquire);
        if chunk.end <= horizon {
            drop(data);
            self.chunks.remove(&start);
            self.counters.appends_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(WattlineError::OutOfOrderWrite {
                time,
                chunk_start: start,
                state: ChunkState::Expired.as_str(),
            });
        }

        match &mut *data {
            ChunkData::Open(rows) => rows.push(row),
            ChunkData::Compressed { late, .. } => {
                if self.allow_late_writes {
                    late.push(row);
                } else {
                    self.counters.appends_rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(WattlineError::OutOfOrderWrite {
                        time,
                        chunk_start: start,
                        state: ChunkState::Compressed.as_str(),
                    });
                }
            }
        }

        self.counters.rows_appended.fetch_add(1, Ordering::Relaxed);
        Ok(ChunkRef {
            start,
            end: start + self.width_ms,
        })
    }

    /// Insert a row after removing any existing rows the predicate
    /// matches in the target chunk. Used for deterministic upserts.
    pub fn replace_where<F>(&self, row: R, matches: F) -> Result<ChunkRef>
    where
        F: Fn(&R) -> bool,
    {
        let time = row.time();
        let start = self.chunk_start_for(time);

        let horizon = self.expired_horizon.load(Ordering::Acquire);
        if time < horizon {
            return Err(WattlineError::OutOfOrderWrite {
                time,
                chunk_start: start,
                state: ChunkState::Expired.as_str(),
            });
        }

        let chunk = self
            .chunks
            .entry(start)
            .or_insert_with(|| Arc::new(Chunk::new(start, start + self.width_ms)))
            .clone();

        let mut data = chunk.data.write();
        match &mut *data {
            ChunkData::Open(rows) => {
                rows.retain(|r| !matches(r));
                rows.push(row);
            }
            // Upserting into compressed history would mean re-opening the
            // chunk; reject instead and let the caller decide.
            ChunkData::Compressed { .. } => {
                return Err(WattlineError::OutOfOrderWrite {
                    time,
                    chunk_start: start,
                    state: ChunkState::Compressed.as_str(),
                });
            }
        }

        self.counters.rows_appended.fetch_add(1, Ordering::Relaxed);
        Ok(ChunkRef {
            start,
            end: start + self.width_ms,
        })
    }

    /// Query rows in `[start, end)`, optionally filtered by device and
    /// metric type. Results are time-ascending and identical whether the
    /// underlying chunks are open or compressed.
    pub fn query(
        &self,
        device_id: Option<&str>,
        metric_type: Option<&str>,
        start: i64,
        end: i64,
    ) -> Result<Vec<R>> {
        let mut out = Vec::new();

        for entry in self.chunks.iter() {
            let chunk = entry.value();
            if chunk.end <= start || chunk.start >= end {
                continue;
            }

            let data = chunk.data.read();
            match &*data {
                ChunkData::Open(rows) => {
                    out.extend(
                        rows.iter()
                            .filter(|r| Self::row_matches(r, device_id, metric_type, start, end))
                            .cloned(),
                    );
                }
                ChunkData::Compressed { segments, late } => {
                    for segment in segments {
                        if let Some(device) = device_id {
                            if segment.key.device_id != device {
                                continue;
                            }
                        }
                        if let Some(metric) = metric_type {
                            if segment.key.metric_type != metric {
                                continue;
                            }
                        }
                        let rows = R::decode_segment(&segment.key, &segment.data)?;
                        out.extend(
                            rows.into_iter()
                                .filter(|r| r.time() >= start && r.time() < end),
                        );
                    }
                    out.extend(
                        late.iter()
                            .filter(|r| Self::row_matches(r, device_id, metric_type, start, end))
                            .cloned(),
                    );
                }
            }
        }

        out.sort_by(|a, b| {
            (a.time(), a.device_id(), a.metric_type())
                .cmp(&(b.time(), b.device_id(), b.metric_type()))
        });
        self.counters
            .rows_read
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        Ok(out)
    }

    fn row_matches(
        row: &R,
        device_id: Option<&str>,
        metric_type: Option<&str>,
        start: i64,
        end: i64,
    ) -> bool {
        if row.time() < start || row.time() >= end {
            return false;
        }
        if let Some(device) = device_id {
            if row.device_id() != device {
                return false;
            }
        }
        if let Some(metric) = metric_type {
            if row.metric_type() != metric {
                return false;
            }
        }
        true
    }

    /// Compress every open chunk whose upper bound is older than
    /// `now - older_than_ms`. Returns the number of chunks compressed.
    /// Failure is per-chunk all-or-nothing: a chunk that fails to encode
    /// stays open and the error surfaces after the pass.
    pub fn compress(&self, older_than_ms: i64, now: i64) -> Result<usize> {
        let cutoff = now - older_than_ms;
        let candidates: Vec<Arc<Chunk<R>>> = self
            .chunks
            .iter()
            .filter(|e| e.value().end <= cutoff)
            .map(|e| e.value().clone())
            .collect();

        let mut compressed = 0;
        for chunk in candidates {
            if self.compress_chunk(&chunk)? {
                compressed += 1;
            }
        }

        if compressed > 0 {
            info!(
                table = self.name,
                chunks = compressed,
                "Compressed aged chunks"
            );
        }
        Ok(compressed)
    }

    fn compress_chunk(&self, chunk: &Chunk<R>) -> Result<bool> {
        let mut data = chunk.data.write();

        let rows = match &*data {
            // Already columnar: idempotent no-op
            ChunkData::Compressed { .. } => return Ok(false),
            ChunkData::Open(rows) => rows.clone(),
        };

        // Group by segment key, newest rows first within each segment.
        let mut grouped: BTreeMap<SegmentKey, Vec<R>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.segment_key()).or_default().push(row);
        }

        // Encode everything before touching the chunk so a failure
        // leaves it in its prior state.
        let mut segments = Vec::with_capacity(grouped.len());
        for (key, mut seg_rows) in grouped {
            seg_rows.sort_by(|a, b| b.time().cmp(&a.time()));
            let row_count = seg_rows.len() as u32;
            let encoded =
                R::encode_segment(&seg_rows).map_err(|e| WattlineError::ChunkCompression {
                    chunk_start: chunk.start,
                    reason: e.to_string(),
                })?;
            segments.push(Segment {
                key,
                row_count,
                data: encoded,
            });
        }

        *data = ChunkData::Compressed {
            segments,
            late: Vec::new(),
        };
        self.counters.chunks_compressed.fetch_add(1, Ordering::Relaxed);
        debug!(table = self.name, chunk_start = chunk.start, "Chunk compressed");
        Ok(true)
    }

    /// Delete chunks entirely past the retention horizon, oldest first.
    /// A chunk whose upper bound exceeds `safe_before` (the rollup
    /// watermark floor) is refused, not forced; earlier chunks already
    /// removed stay removed.
    pub fn expire(&self, retain_ms: i64, now: i64, safe_before: i64) -> Result<usize> {
        let cutoff = now - retain_ms;
        let mut candidates: Vec<(i64, i64)> = self
            .chunks
            .iter()
            .filter(|e| e.value().end <= cutoff)
            .map(|e| (e.value().start, e.value().end))
            .collect();
        candidates.sort_unstable();

        let mut removed = 0;
        for (start, end) in candidates {
            if end > safe_before {
                if removed > 0 {
                    info!(table = self.name, chunks = removed, "Expired chunks");
                }
                return Err(WattlineError::RetentionOrdering {
                    chunk_end: end,
                    watermark: safe_before,
                });
            }
            // Advance the horizon before dropping the chunk so appends
            // racing this removal cannot land in the dead range.
            self.expired_horizon.fetch_max(end, Ordering::AcqRel);
            self.chunks.remove(&start);
            self.counters.chunks_expired.fetch_add(1, Ordering::Relaxed);
            removed += 1;
        }

        if removed > 0 {
            info!(table = self.name, chunks = removed, "Expired chunks");
        }
        Ok(removed)
    }

    /// Remove every row belonging to a device, across all chunks and
    /// states. Returns the number of rows removed.
    pub fn delete_device(&self, device_id: &str) -> Result<usize> {
        let mut deleted = 0;

        for entry in self.chunks.iter() {
            let chunk = entry.value();
            let mut data = chunk.data.write();
            match &mut *data {
                ChunkData::Open(rows) => {
                    let before = rows.len();
                    rows.retain(|r| r.device_id() != device_id);
                    deleted += before - rows.len();
                }
                ChunkData::Compressed { segments, late } => {
                    let dropped: usize = segments
                        .iter()
                        .filter(|s| s.key.device_id == device_id)
                        .map(|s| s.row_count as usize)
                        .sum();
                    segments.retain(|s| s.key.device_id != device_id);
                    deleted += dropped;

                    let before = late.len();
                    late.retain(|r| r.device_id() != device_id);
                    deleted += before - late.len();
                }
            }
        }

        if deleted > 0 {
            info!(table = self.name, device_id, rows = deleted, "Cascade delete");
        }
        Ok(deleted)
    }

    /// State of the chunk covering a timestamp, if it exists.
    /// Expired ranges report [`ChunkState::Expired`].
    pub fn chunk_state(&self, time: i64) -> Option<ChunkState> {
        if time < self.expired_horizon.load(Ordering::Acquire) {
            return Some(ChunkState::Expired);
        }
        let start = self.chunk_start_for(time);
        self.chunks.get(&start).map(|c| c.state())
    }

    /// Start of the earliest chunk currently held
    pub fn earliest_chunk_start(&self) -> Option<i64> {
        self.chunks.iter().map(|e| e.value().start).min()
    }

    /// End of the latest chunk currently held
    pub fn latest_chunk_end(&self) -> Option<i64> {
        self.chunks.iter().map(|e| e.value().end).max()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> ChunkStoreStats {
        let mut stats = ChunkStoreStats {
            rows_appended: self.counters.rows_appended.load(Ordering::Relaxed),
            rows_read: self.counters.rows_read.load(Ordering::Relaxed),
            appends_rejected: self.counters.appends_rejected.load(Ordering::Relaxed),
            chunks_compressed: self.counters.chunks_compressed.load(Ordering::Relaxed),
            chunks_expired: self.counters.chunks_expired.load(Ordering::Relaxed),
            ..Default::default()
        };

        for entry in self.chunks.iter() {
            let chunk = entry.value();
            stats.total_chunks += 1;
            stats.total_rows += chunk.row_count();
            match chunk.state() {
                ChunkState::Open => stats.open_chunks += 1,
                ChunkState::Compressed => stats.compressed_chunks += 1,
                ChunkState::Expired => {}
            }
        }

        let horizon = self.expired_horizon.load(Ordering::Acquire);
        if horizon != i64::MIN {
            stats.expired_horizon = Some(horizon);
        }
        stats
    }
}
