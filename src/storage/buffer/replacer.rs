use std::fmt::Debug;

pub type FrameId = u32;

/// Eviction policy over unpinned frames.
pub trait Replacer: Send + Sync + Debug {
    /// Picks an unpinned frame to evict, or None when every frame is pinned.
    fn evict(&mut self) -> Option<FrameId>;

    /// The frame gained its first pin and must not be evicted.
    fn pin(&mut self, frame_id: FrameId);

    /// The frame lost its last pin and may be evicted.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
