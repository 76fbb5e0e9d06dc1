//! Bounded in-memory caches for the latest device state.
//!
//! Both caches enforce two limits at once: an entry count (enforced by LRU
//! eviction) and a byte budget tracked by a counter that must always equal
//! the sum of the held entries' sizes. Readers get deep snapshots, never
//! references into live state.
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use log::debug;
use parking_lot::Mutex;

use crate::buffers::ChunkBuffer;
use crate::types::{AudioFormat, DeviceId, PixelFormat, Value};

pub const DEFAULT_STATIC_ENTRIES: usize = 50;
pub const DEFAULT_STATIC_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_STREAM_ENTRIES: usize = 8;
pub const DEFAULT_STREAM_BYTES: usize = 16 * 1024 * 1024;

/// Latest scalar reading for one sensor; replaced wholesale on each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticEntry {
    pub id: DeviceId,
    pub uid: u32,
    pub name: Option<String>,
    pub addr: SocketAddr,
    pub timestamp: u64,
    pub data: Value,
    pub route: String,
}

impl StaticEntry {
    fn size_bytes(&self) -> usize {
        self.data.size_bytes()
    }
}

/// Stream-type metadata captured from the init frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamKind {
    Text {
        stream_length: u32,
    },
    Audio {
        format: AudioFormat,
        sample_rate: u32,
        bit_depth: u8,
        channels: u8,
    },
    Image {
        format: PixelFormat,
        width: u16,
        height: u16,
    },
}

impl StreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Text { .. } => "flt",
            StreamKind::Audio { .. } => "aud",
            StreamKind::Image { .. } => "img",
        }
    }
}

/// Per-stream descriptor: immutable metadata from the init frame plus the
/// reassembler the chunk frames feed.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: DeviceId,
    pub uid: u32,
    pub name: Option<String>,
    pub addr: SocketAddr,
    pub timestamp: u64,
    pub route: String,
    pub kind: StreamKind,
    pub buffer: ChunkBuffer,
}

impl StreamEntry {
    fn size_bytes(&self) -> usize {
        self.buffer.size_bytes()
    }
}

/// Outcome of a stream chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkWrite {
    Accepted { done: bool },
    /// Not the next expected chunk id; dropped without logging.
    OutOfOrder,
    /// No init preceded this chunk's uid.
    UnknownUid,
    /// The chunk does not fit even after evicting every other descriptor.
    Overflow,
}

/// Access-ordered map used by both caches. Entry counts are small enough
/// that linear order maintenance is fine.
struct LruMap<V> {
    map: HashMap<u32, V>,
    // front = least recently used
    order: VecDeque<u32>,
}

impl<V> LruMap<V> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn get(&self, uid: u32) -> Option<&V> {
        self.map.get(&uid)
    }

    fn get_mut(&mut self, uid: u32) -> Option<&mut V> {
        self.map.get_mut(&uid)
    }

    fn touch(&mut self, uid: u32) {
        if let Some(pos) = self.order.iter().position(|&u| u == uid) {
            self.order.remove(pos);
            self.order.push_back(uid);
        }
    }

    fn insert(&mut self, uid: u32, value: V) -> Option<V> {
        let prev = self.map.insert(uid, value);
        if prev.is_some() {
            if let Some(pos) = self.order.iter().position(|&u| u == uid) {
                self.order.remove(pos);
            }
        }
        self.order.push_back(uid);
        prev
    }

    fn remove(&mut self, uid: u32) -> Option<V> {
        let value = self.map.remove(&uid)?;
        if let Some(pos) = self.order.iter().position(|&u| u == uid) {
            self.order.remove(pos);
        }
        Some(value)
    }

    fn pop_lru(&mut self) -> Option<(u32, V)> {
        let uid = self.order.pop_front()?;
        let value = self.map.remove(&uid)?;
        Some((uid, value))
    }

    fn pop_lru_excluding(&mut self, keep: u32) -> Option<(u32, V)> {
        let pos = self.order.iter().position(|&u| u != keep)?;
        let uid = self.order.remove(pos)?;
        let value = self.map.remove(&uid)?;
        Some((uid, value))
    }

    fn iter(&self) -> impl Iterator<Item = (&u32, &V)> {
        self.map.iter()
    }
}

struct StaticInner {
    entries: LruMap<StaticEntry>,
    bytes: usize,
}

/// Bounded `uid -> latest scalar` cache. All operations serialize on one
/// cache-wide mutex.
pub struct StaticCache {
    max_entries: usize,
    max_bytes: usize,
    inner: Mutex<StaticInner>,
}

impl StaticCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
            inner: Mutex::new(StaticInner {
                entries: LruMap::new(),
                bytes: 0,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_STATIC_ENTRIES, DEFAULT_STATIC_BYTES)
    }

    /// Insert or replace the entry for its uid. Evicts LRU entries until the
    /// new size fits; if it still does not fit the entry is not installed and
    /// the frame is effectively dropped.
    pub fn put(&self, entry: StaticEntry) -> bool {
        let uid = entry.uid;
        let size = entry.size_bytes();
        let mut inner = self.inner.lock();
        // retire any previous value first so eviction below cannot
        // double-count it
        if let Some(prev) = inner.entries.remove(uid) {
            inner.bytes -= prev.size_bytes();
        }
        while inner.bytes + size > self.max_bytes && !inner.entries.is_empty() {
            if let Some((evicted, e)) = inner.entries.pop_lru() {
                inner.bytes -= e.size_bytes();
                debug!("static cache evicted uid {evicted}");
            }
        }
        if inner.bytes + size > self.max_bytes {
            debug!("static entry for uid {uid} ({size} bytes) exceeds cache budget; dropped");
            return false;
        }
        while inner.entries.len() >= self.max_entries && !inner.entries.is_empty() {
            if let Some((evicted, e)) = inner.entries.pop_lru() {
                inner.bytes -= e.size_bytes();
                debug!("static cache evicted uid {evicted}");
            }
        }
        inner.bytes += size;
        inner.entries.insert(uid, entry);
        true
    }

    /// Copy of the current value; refreshes the entry's LRU position.
    pub fn get(&self, uid: u32) -> Option<StaticEntry> {
        let mut inner = self.inner.lock();
        inner.entries.touch(uid);
        inner.entries.get(uid).cloned()
    }

    pub fn remove(&self, uid: u32) -> Option<StaticEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(uid)?;
        inner.bytes -= entry.size_bytes();
        Some(entry)
    }

    /// Point-in-time deep copy of every entry.
    pub fn snapshot(&self) -> HashMap<u32, StaticEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .map(|(&uid, e)| (uid, e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_bytes(&self) -> usize {
        self.inner.lock().bytes
    }
}

struct StreamInner {
    entries: LruMap<StreamEntry>,
    bytes: usize,
}

/// Bounded `uid -> stream descriptor` cache. Chunk writes go through the
/// cache so the byte counter always matches the reassemblers' sizes.
pub struct StreamCache {
    max_entries: usize,
    max_bytes: usize,
    inner: Mutex<StreamInner>,
}

impl StreamCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
            inner: Mutex::new(StreamInner {
                entries: LruMap::new(),
                bytes: 0,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_STREAM_ENTRIES, DEFAULT_STREAM_BYTES)
    }

    /// Install a descriptor under its uid. A descriptor already present for
    /// the same uid is discarded, buffer and all, and the counters adjusted.
    pub fn init_stream(&self, entry: StreamEntry) -> bool {
        let uid = entry.uid;
        let size = entry.size_bytes();
        let mut inner = self.inner.lock();
        if let Some(prev) = inner.entries.remove(uid) {
            inner.bytes -= prev.size_bytes();
            debug!("stream {uid} re-initialized; previous buffer discarded");
        }
        while inner.bytes + size > self.max_bytes && !inner.entries.is_empty() {
            if let Some((evicted, e)) = inner.entries.pop_lru() {
                inner.bytes -= e.size_bytes();
                debug!("stream cache evicted uid {evicted}");
            }
        }
        if inner.bytes + size > self.max_bytes {
            debug!("stream descriptor for uid {uid} exceeds cache budget; dropped");
            return false;
        }
        while inner.entries.len() >= self.max_entries && !inner.entries.is_empty() {
            if let Some((evicted, e)) = inner.entries.pop_lru() {
                inner.bytes -= e.size_bytes();
                debug!("stream cache evicted uid {evicted}");
            }
        }
        inner.bytes += size;
        inner.entries.insert(uid, entry);
        true
    }

    /// Feed one chunk to the descriptor's reassembler. Growth that does not
    /// fit evicts older descriptors first; the descriptor being written is
    /// never evicted to make room for its own chunk.
    pub fn add_chunk(&self, uid: u32, chunk_id: u32, data: Vec<u8>) -> ChunkWrite {
        let mut inner = self.inner.lock();
        let expected = match inner.entries.get(uid) {
            Some(entry) => entry.buffer.expected_next(),
            None => return ChunkWrite::UnknownUid,
        };
        if chunk_id != expected {
            return ChunkWrite::OutOfOrder;
        }
        let grow = data.len();
        while inner.bytes + grow > self.max_bytes {
            match inner.entries.pop_lru_excluding(uid) {
                Some((evicted, e)) => {
                    inner.bytes -= e.size_bytes();
                    debug!("stream cache evicted uid {evicted} to fit a chunk for {uid}");
                }
                None => return ChunkWrite::Overflow,
            }
        }
        let done = match inner.entries.get_mut(uid) {
            Some(entry) => {
                if !entry.buffer.add_chunk(chunk_id, data) {
                    return ChunkWrite::OutOfOrder;
                }
                entry.buffer.is_done()
            }
            None => return ChunkWrite::UnknownUid,
        };
        inner.bytes += grow;
        inner.entries.touch(uid);
        ChunkWrite::Accepted { done }
    }

    /// Deep copy of the descriptor; refreshes its LRU position.
    pub fn get(&self, uid: u32) -> Option<StreamEntry> {
        let mut inner = self.inner.lock();
        inner.entries.touch(uid);
        inner.entries.get(uid).cloned()
    }

    /// Advance the descriptor's read cursor by one chunk.
    pub fn next_chunk(&self, uid: u32) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.entries.touch(uid);
        inner.entries.get_mut(uid)?.buffer.next_chunk()
    }

    /// Concatenated chunk bytes. Provisional unless the stream is done.
    pub fn full_bytes(&self, uid: u32) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.entries.touch(uid);
        inner.entries.get(uid).map(|e| e.buffer.full_bytes())
    }

    pub fn remove(&self, uid: u32) -> Option<StreamEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(uid)?;
        inner.bytes -= entry.size_bytes();
        Some(entry)
    }

    /// Point-in-time deep copy of every descriptor.
    pub fn snapshot(&self) -> HashMap<u32, StreamEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .map(|(&uid, e)| (uid, e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_bytes(&self) -> usize {
        self.inner.lock().bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn static_entry(uid: u32, data: &str) -> StaticEntry {
        StaticEntry {
            id: DeviceId::new([1, 2, 3, 4]),
            uid,
            name: None,
            addr: addr(),
            timestamp: 1000,
            data: Value::Text(data.to_string()),
            route: format!("nar/device/01020304/{uid}/static"),
        }
    }

    fn stream_entry(uid: u32, last: u32) -> StreamEntry {
        StreamEntry {
            id: DeviceId::new([1, 2, 3, 4]),
            uid,
            name: None,
            addr: addr(),
            timestamp: 1000,
            route: format!("nar/device/01020304/{uid}/streamstr"),
            kind: StreamKind::Text { stream_length: last },
            buffer: ChunkBuffer::new(last),
        }
    }

    fn assert_static_accounting(cache: &StaticCache) {
        let expected: usize = cache.snapshot().values().map(|e| e.data.size_bytes()).sum();
        assert_eq!(cache.current_bytes(), expected);
    }

    fn assert_stream_accounting(cache: &StreamCache) {
        let expected: usize = cache.snapshot().values().map(|e| e.buffer.size_bytes()).sum();
        assert_eq!(cache.current_bytes(), expected);
    }

    #[test]
    fn byte_budget_triggers_lru_eviction() {
        let cache = StaticCache::new(2, 16);
        assert!(cache.put(static_entry(1, "aaaa")));
        assert!(cache.put(static_entry(2, "bbbb")));
        assert!(cache.put(static_entry(3, "cccccccccc")));
        let snap = cache.snapshot();
        assert!(!snap.contains_key(&1));
        assert!(snap.contains_key(&3));
        assert!(cache.current_bytes() <= 16);
        assert_static_accounting(&cache);
    }

    #[test]
    fn replace_accounts_for_the_delta() {
        let cache = StaticCache::new(4, 64);
        cache.put(static_entry(1, "aaaa"));
        cache.put(static_entry(2, "bb"));
        assert_eq!(cache.current_bytes(), 6);
        cache.put(static_entry(1, "a"));
        assert_eq!(cache.current_bytes(), 3);
        assert_static_accounting(&cache);
    }

    #[test]
    fn entry_cap_evicts_least_recently_used() {
        let cache = StaticCache::new(2, 1024);
        cache.put(static_entry(1, "aa"));
        cache.put(static_entry(2, "bb"));
        // touch uid 1 so uid 2 becomes the LRU victim
        assert!(cache.get(1).is_some());
        cache.put(static_entry(3, "cc"));
        let snap = cache.snapshot();
        assert!(snap.contains_key(&1));
        assert!(!snap.contains_key(&2));
        assert!(snap.contains_key(&3));
        assert_static_accounting(&cache);
    }

    #[test]
    fn oversize_entry_is_not_installed() {
        let cache = StaticCache::new(4, 8);
        cache.put(static_entry(1, "aaaa"));
        assert!(!cache.put(static_entry(2, "bbbbbbbbbbbb")));
        // the oversize put still evicted, but nothing replaced the victims
        assert!(cache.snapshot().is_empty());
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn accounting_survives_random_put_sequences() {
        let cache = StaticCache::new(5, 40);
        let payloads = ["a", "bbbb", "cc", "ddddddddd", "e", "ffffffff", "gg"];
        for round in 0u32..3 {
            for (i, payload) in payloads.iter().enumerate() {
                cache.put(static_entry((i as u32) % 4 + round, payload));
                assert_static_accounting(&cache);
            }
        }
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let cache = StaticCache::new(4, 64);
        cache.put(static_entry(1, "old"));
        let snap = cache.snapshot();
        cache.put(static_entry(1, "new!"));
        assert_eq!(snap[&1].data, Value::Text("old".into()));
        assert_eq!(
            cache.get(1).unwrap().data,
            Value::Text("new!".into())
        );
    }

    #[test]
    fn stream_chunks_flow_through_cache_accounting() {
        let cache = StreamCache::new(4, 1024);
        assert!(cache.init_stream(stream_entry(7, 3)));
        assert_eq!(
            cache.add_chunk(7, 0, b"a".to_vec()),
            ChunkWrite::Accepted { done: false }
        );
        assert_eq!(cache.add_chunk(7, 2, b"c".to_vec()), ChunkWrite::OutOfOrder);
        assert_eq!(
            cache.add_chunk(7, 1, b"b".to_vec()),
            ChunkWrite::Accepted { done: false }
        );
        assert_eq!(
            cache.add_chunk(7, 2, b"c".to_vec()),
            ChunkWrite::Accepted { done: true }
        );
        assert_eq!(cache.full_bytes(7), Some(b"abc".to_vec()));
        assert_eq!(cache.current_bytes(), 3);
        assert_stream_accounting(&cache);
    }

    #[test]
    fn orphan_chunk_leaves_the_cache_untouched() {
        let cache = StreamCache::new(4, 1024);
        assert_eq!(cache.add_chunk(9, 0, b"x".to_vec()), ChunkWrite::UnknownUid);
        assert!(cache.is_empty());
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn reinit_replaces_the_buffer_exactly() {
        let cache = StreamCache::new(4, 1024);
        cache.init_stream(stream_entry(5, 10));
        cache.add_chunk(5, 0, vec![0u8; 100]);
        assert_eq!(cache.current_bytes(), 100);
        cache.init_stream(stream_entry(5, 10));
        assert_eq!(cache.current_bytes(), 0);
        assert_eq!(cache.get(5).unwrap().buffer.expected_next(), 0);
        assert_stream_accounting(&cache);
    }

    #[test]
    fn growth_evicts_older_descriptors_first() {
        let cache = StreamCache::new(4, 10);
        cache.init_stream(stream_entry(1, 100));
        cache.init_stream(stream_entry(2, 100));
        cache.add_chunk(1, 0, vec![0u8; 6]);
        // 6 + 8 > 10: descriptor 2 survives by evicting descriptor 1
        assert_eq!(
            cache.add_chunk(2, 0, vec![0u8; 8]),
            ChunkWrite::Accepted { done: false }
        );
        assert!(cache.get(1).is_none());
        assert_eq!(cache.current_bytes(), 8);
        assert_stream_accounting(&cache);
    }

    #[test]
    fn lone_descriptor_overflow_drops_the_chunk() {
        let cache = StreamCache::new(4, 4);
        cache.init_stream(stream_entry(1, 100));
        assert_eq!(
            cache.add_chunk(1, 0, vec![0u8; 3]),
            ChunkWrite::Accepted { done: false }
        );
        assert_eq!(cache.add_chunk(1, 1, vec![0u8; 3]), ChunkWrite::Overflow);
        // rejected chunk left the buffer untouched
        assert_eq!(cache.get(1).unwrap().buffer.expected_next(), 1);
        assert_eq!(cache.current_bytes(), 3);
    }

    #[test]
    fn stream_entry_cap_is_enforced() {
        let cache = StreamCache::new(2, 1024);
        cache.init_stream(stream_entry(1, 10));
        cache.init_stream(stream_entry(2, 10));
        cache.init_stream(stream_entry(3, 10));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert_stream_accounting(&cache);
    }

    #[test]
    fn cursor_reads_via_cache() {
        let cache = StreamCache::new(4, 1024);
        cache.init_stream(stream_entry(7, 2));
        cache.add_chunk(7, 0, b"ab".to_vec());
        cache.add_chunk(7, 1, b"cd".to_vec());
        assert_eq!(cache.next_chunk(7), Some(b"ab".to_vec()));
        assert_eq!(cache.next_chunk(7), Some(b"cd".to_vec()));
        assert_eq!(cache.next_chunk(7), None);
        // stream is done, so the cursor wrapped
        assert_eq!(cache.next_chunk(7), Some(b"ab".to_vec()));
    }

    #[test]
    fn remove_updates_the_counter() {
        let cache = StaticCache::new(4, 64);
        cache.put(static_entry(1, "aaaa"));
        cache.put(static_entry(2, "bb"));
        assert!(cache.remove(1).is_some());
        assert_eq!(cache.current_bytes(), 2);
        assert!(cache.remove(1).is_none());
    }
}
