//! Process-wide UDP port pool.
//!
//! Ranges are registered once at startup; drivers allocate on start and
//! release on stop. Freed ports are preferred over advancing a range cursor
//! so port numbers stay low and predictable.
use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

struct PortRange {
    start: u16,
    end: u16,
    // u32 so the cursor can rest one past `end` without wrapping
    next: u32,
    // sorted ascending
    freed: Vec<u16>,
}

#[derive(Default)]
struct PoolInner {
    ranges: Vec<PortRange>,
    allocated: HashSet<u16>,
}

/// Mutually exclusive allocator over disjoint port ranges. Constructed once
/// at process init and shared by handle.
#[derive(Default)]
pub struct PortPool {
    inner: Mutex<PoolInner>,
}

impl PortPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an inclusive range. Re-registering the same range is a no-op.
    pub fn register_range(&self, start: u16, end: u16) {
        let mut inner = self.inner.lock();
        if inner
            .ranges
            .iter()
            .any(|r| r.start == start && r.end == end)
        {
            return;
        }
        inner.ranges.push(PortRange {
            start,
            end,
            next: start as u32,
            freed: Vec::new(),
        });
        debug!("registered port range {start}-{end}");
    }

    /// Hand out one port, preferring the lowest freed port of any range,
    /// then advancing range cursors in registration order. `None` when every
    /// range is exhausted.
    pub fn allocate(&self) -> Option<u16> {
        let mut inner = self.inner.lock();

        let mut best: Option<(usize, u16)> = None;
        for (i, range) in inner.ranges.iter().enumerate() {
            if let Some(&port) = range.freed.first() {
                if best.map_or(true, |(_, p)| port < p) {
                    best = Some((i, port));
                }
            }
        }
        if let Some((i, port)) = best {
            inner.ranges[i].freed.retain(|&p| p != port);
            inner.allocated.insert(port);
            info!("allocated port {port} (recycled)");
            return Some(port);
        }

        for i in 0..inner.ranges.len() {
            loop {
                let (next, end) = {
                    let r = &inner.ranges[i];
                    (r.next, r.end as u32)
                };
                if next > end {
                    break;
                }
                inner.ranges[i].next = next + 1;
                let port = next as u16;
                if !inner.allocated.contains(&port) {
                    inner.allocated.insert(port);
                    info!("allocated port {port}");
                    return Some(port);
                }
            }
        }
        warn!("port pool exhausted");
        None
    }

    /// Return a port to its range. Releasing a port that was never allocated
    /// is a warning, not an error.
    pub fn release(&self, port: u16) {
        let mut inner = self.inner.lock();
        if !inner.allocated.remove(&port) {
            warn!("releasing a port that was never allocated: {port}");
            return;
        }
        for range in &mut inner.ranges {
            if range.start <= port && port <= range.end {
                match range.freed.binary_search(&port) {
                    Ok(_) => {}
                    Err(pos) => range.freed.insert(pos, port),
                }
                break;
            }
        }
        info!("released port {port}");
    }

    pub fn is_allocated(&self, port: u16) -> bool {
        self.inner.lock().allocated.contains(&port)
    }

    pub fn allocated_count(&self) -> usize {
        self.inner.lock().allocated.len()
    }

    /// Forget every allocation and rewind range cursors. Registered ranges
    /// are kept; meant for tests that reuse one pool.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.allocated.clear();
        for range in &mut inner.ranges {
            range.next = range.start as u32;
            range.freed.clear();
        }
        debug!("port pool reset");
    }
}
