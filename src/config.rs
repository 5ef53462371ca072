//! Store configuration.

use crate::catalog::validate_fill_factor;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Enough frames for a create that pins the catalog page, its target page
/// and two neighbours while relinking lists.
pub const MIN_BUFFER_POOL_FRAMES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Number of page frames in the buffer pool.
    pub buffer_pool_frames: usize,
    /// Volume number stamped on pages and object ids of a new volume.
    pub volume: u16,
    /// Extent fill factor, in percent, recorded for new files.
    pub extent_fill_factor: u16,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            buffer_pool_frames: 64,
            volume: 1,
            extent_fill_factor: 100,
        }
    }
}

impl StoreOptions {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_pool_frames < MIN_BUFFER_POOL_FRAMES {
            bail!(
                "buffer_pool_frames must be at least {}, got {}",
                MIN_BUFFER_POOL_FRAMES,
                self.buffer_pool_frames
            );
        }
        validate_fill_factor(self.extent_fill_factor)?;
        Ok(())
    }
}
