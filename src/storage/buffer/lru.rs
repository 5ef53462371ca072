use super::replacer::{FrameId, Replacer};
use std::collections::{BTreeMap, HashMap};

/// Evicts the frame whose last unpin is oldest.
#[derive(Debug)]
pub struct LruReplacer {
    /// Unpin tick -> frame, oldest first
    by_age: BTreeMap<u64, FrameId>,
    /// Frame -> its unpin tick
    ticks: HashMap<FrameId, u64>,
    clock: u64,
    max_size: usize,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            by_age: BTreeMap::new(),
            ticks: HashMap::with_capacity(max_size),
            clock: 0,
            max_size,
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.by_age.pop_first()?;
        self.ticks.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(tick) = self.ticks.remove(&frame_id) {
            self.by_age.remove(&tick);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.ticks.contains_key(&frame_id) || self.ticks.len() >= self.max_size {
            return;
        }
        self.clock += 1;
        self.ticks.insert(frame_id, self.clock);
        self.by_age.insert(self.clock, frame_id);
    }

    fn size(&self) -> usize {
        self.ticks.len()
    }
}
