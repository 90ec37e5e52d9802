//! Bounded pool of open container handles.
//!
//! The cache stores opened file handles up to a configured maximum and
//! evicts the least frequently used one when that limit is reached. The
//! cap is enforced on OS file descriptors, not objects: eviction closes
//! the departing handle before the incoming one is opened, so the open
//! count never exceeds the cap. Rarely-touched genomes get evicted first;
//! popular ones stay warm.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::zseek::{SeekableZstd, ZseekError};

struct Slot {
    handle: Arc<SeekableZstd>,
    hits: u64,
}

pub struct FhCache {
    max_open: usize,
    slots: Mutex<FxHashMap<PathBuf, Slot>>,
}

impl FhCache {
    pub fn new(max_open: usize) -> Self {
        FhCache {
            max_open: max_open.max(1),
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    /// Return the cached handle for `path`, opening it on a miss. The map
    /// lock is held across the open, so two concurrent misses on one path
    /// cannot each open a descriptor and leak one.
    pub fn acquire(&self, path: &Path) -> Result<Arc<SeekableZstd>, ZseekError> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(path) {
            slot.hits += 1;
            return Ok(slot.handle.clone());
        }

        if slots.len() >= self.max_open {
            Self::evict_lfu(&mut slots);
        }

        let handle = Arc::new(SeekableZstd::open(path)?);
        slots.insert(
            path.to_owned(),
            Slot {
                handle: handle.clone(),
                hits: 1,
            },
        );
        Ok(handle)
    }

    // Close and drop the least frequently used handle. In-flight readers
    // still holding the Arc observe read errors from the closed handle.
    fn evict_lfu(slots: &mut FxHashMap<PathBuf, Slot>) {
        let victim = slots
            .iter()
            .min_by_key(|(_, slot)| slot.hits)
            .map(|(path, _)| path.clone());
        if let Some(path) = victim {
            if let Some(slot) = slots.remove(&path) {
                debug!("Evicting filehandle for {}", path.display());
                slot.handle.close();
            }
        }
    }

    /// Number of handles currently held open.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every handle. Called at shutdown.
    pub fn close_all(&self) {
        let mut slots = self.slots.lock();
        for (_, slot) in slots.drain() {
            slot.handle.close();
        }
    }
}
