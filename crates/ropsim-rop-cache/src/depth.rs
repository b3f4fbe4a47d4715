use crate::block::BlockIndex;
use crate::codec::BlockCodec;
use crate::config::{ConfigError, RopCacheConfig};
use crate::engine::RopCache;
use crate::storage::LineStorage;
use ropsim_hilo::{block_max_z, block_min_max_z, CompressionLevel, HiloCodec};

/// Depth reset clear value: max 24-bit depth, stencil zero.
pub const DEFAULT_CLEAR_DEPTH: u32 = 0x00FF_FFFF;

/// HILO codec over packed stencil/depth samples. Extremes are still taken
/// over the full 32-bit values (stencil rides in the top byte); the spill
/// summary is the block's 24-bit depth maximum for hierarchical-Z.
#[derive(Debug, Clone)]
pub struct DepthBlockCodec {
    hilo: HiloCodec,
}

impl DepthBlockCodec {
    pub fn new(words_per_block: usize) -> Result<Self, ropsim_hilo::HiloError> {
        Ok(Self {
            hilo: HiloCodec::reference(words_per_block)?,
        })
    }
}

impl BlockCodec for DepthBlockCodec {
    fn compress(&self, words: &[u32], out: &mut [u8]) -> Option<CompressionLevel> {
        let (_, (min, max)) = block_min_max_z(words);
        self.hilo.compress(words, min, max, out)
    }

    fn decompress(&self, input: &[u8], level: CompressionLevel, out: &mut [u32]) {
        self.hilo.decompress(input, level, out);
    }

    fn encoded_size(&self, level: Option<CompressionLevel>) -> usize {
        self.hilo.encoded_size(level)
    }

    fn spill_summary(&self, words: &[u32]) -> Option<u32> {
        Some(block_max_z(words))
    }
}

/// The depth/stencil buffer cache used by the Z/stencil test stage.
///
/// Samples pack as `(stencil << 24) | depth24`. Besides the generic engine
/// protocol this instance surfaces the per-spill maximum depth so the owning
/// stage can keep its hierarchical-Z buffer current.
pub struct DepthStencilCache<S: LineStorage> {
    engine: RopCache<DepthBlockCodec, S>,
}

impl<S: LineStorage> DepthStencilCache<S> {
    pub fn new(cfg: RopCacheConfig, storage: S, cache_id: u32) -> Result<Self, ConfigError> {
        let codec = DepthBlockCodec::new(cfg.words_per_block())?;
        let reset = DEFAULT_CLEAR_DEPTH.to_le_bytes();
        let engine = RopCache::new(cfg, codec, storage, cache_id, "z-cache", &reset)?;
        Ok(Self { engine })
    }

    /// Paced clear of the depth/stencil buffer. Poll every cycle; `true`
    /// once complete.
    pub fn clear(&mut self, depth: u32, stencil: u8) -> bool {
        let word = ((stencil as u32) << 24) | (depth & 0x00FF_FFFF);
        self.engine.clear_blocks(&word.to_le_bytes())
    }

    /// The hierarchical-Z update produced by the most recent spill: the
    /// block written back and its new 24-bit depth maximum. Cleared by the
    /// call.
    pub fn take_hz_update(&mut self) -> Option<(BlockIndex, u32)> {
        let written = self.engine.take_written_block()?;
        written.summary.map(|max_z| (written.block, max_z))
    }

    pub fn inner(&self) -> &RopCache<DepthBlockCodec, S> {
        &self.engine
    }

    pub fn inner_mut(&mut self) -> &mut RopCache<DepthBlockCodec, S> {
        &mut self.engine
    }
}
