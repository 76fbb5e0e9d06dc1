//! Ordered chunk reassembly for streamed payloads.
//!
//! A buffer accepts only the next expected chunk id; anything else is dropped
//! and the sender is expected to resend. Future chunks are never held back
//! for gap filling.

/// Terminator used when the init frame carries no expected length.
pub const END_SENTINEL: u32 = 0xFFFF;

/// Append-only, in-order chunk buffer with a lazy read cursor.
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    expected_next: u32,
    last: u32,
    done: bool,
    chunks: Vec<(u32, Vec<u8>)>,
    cursor: usize,
}

impl ChunkBuffer {
    /// `last` is the terminating chunk id: the init-supplied stream length
    /// where the protocol provides one, otherwise [`END_SENTINEL`].
    pub fn new(last: u32) -> Self {
        Self {
            expected_next: 0,
            last,
            done: last == 0,
            chunks: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_sentinel() -> Self {
        Self::new(END_SENTINEL)
    }

    /// Accept a chunk only if it is the next expected one. Returns whether the
    /// chunk was appended.
    pub fn add_chunk(&mut self, chunk_id: u32, data: Vec<u8>) -> bool {
        if chunk_id != self.expected_next {
            return false;
        }
        self.chunks.push((chunk_id, data));
        self.expected_next += 1;
        self.done = self.expected_next >= self.last;
        true
    }

    /// Random access to an already accepted chunk.
    pub fn get(&self, chunk_id: u32) -> Option<&[u8]> {
        self.chunks
            .iter()
            .find(|(id, _)| *id == chunk_id)
            .map(|(_, data)| data.as_slice())
    }

    /// Concatenation of all accepted chunks in arrival order. Provisional
    /// until [`is_done`](Self::is_done) is true.
    pub fn full_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        for (_, data) in &self.chunks {
            out.extend_from_slice(data);
        }
        out
    }

    /// Advance the read cursor by one chunk. After exhaustion the cursor
    /// yields `None`, and once the stream is done it wraps back to the start
    /// so the full sequence can be read again.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if let Some((_, data)) = self.chunks.get(self.cursor) {
            self.cursor += 1;
            return Some(data.clone());
        }
        if self.done {
            self.cursor = 0;
        }
        None
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn expected_next(&self) -> u32 {
        self.expected_next
    }

    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total payload bytes held, as seen by cache accounting.
    pub fn size_bytes(&self) -> usize {
        self.chunks.iter().map(|(_, data)| data.len()).sum()
    }
}
