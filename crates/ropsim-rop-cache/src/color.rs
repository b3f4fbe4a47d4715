use crate::codec::BlockCodec;
use crate::config::{ConfigError, RopCacheConfig};
use crate::engine::RopCache;
use crate::storage::LineStorage;
use ropsim_hilo::{block_min_max, CompressionLevel, HiloCodec};

/// HILO codec over packed color samples: block extremes are taken over the
/// full 32-bit values.
#[derive(Debug, Clone)]
pub struct ColorBlockCodec {
    hilo: HiloCodec,
}

impl ColorBlockCodec {
    pub fn new(words_per_block: usize) -> Result<Self, ropsim_hilo::HiloError> {
        Ok(Self {
            hilo: HiloCodec::reference(words_per_block)?,
        })
    }
}

impl BlockCodec for ColorBlockCodec {
    fn compress(&self, words: &[u32], out: &mut [u8]) -> Option<CompressionLevel> {
        let (min, max) = block_min_max(words);
        self.hilo.compress(words, min, max, out)
    }

    fn decompress(&self, input: &[u8], level: CompressionLevel, out: &mut [u32]) {
        self.hilo.decompress(input, level, out);
    }

    fn encoded_size(&self, level: Option<CompressionLevel>) -> usize {
        self.hilo.encoded_size(level)
    }
}

/// The color buffer cache used by the blend/color-write stage.
///
/// A thin parameterization of [`RopCache`]: byte-pattern clear values (up to
/// 16 bytes for wide formats) and the color codec. On reset the clear value
/// is all zeroes.
pub struct ColorCache<S: LineStorage> {
    engine: RopCache<ColorBlockCodec, S>,
}

impl<S: LineStorage> ColorCache<S> {
    /// `cache_id` distinguishes this instance on its memory transactions
    /// when several color caches share a memory controller.
    pub fn new(cfg: RopCacheConfig, storage: S, cache_id: u32) -> Result<Self, ConfigError> {
        let codec = ColorBlockCodec::new(cfg.words_per_block())?;
        let engine = RopCache::new(cfg, codec, storage, cache_id, "color-cache", &[0u8; 4])?;
        Ok(Self { engine })
    }

    /// Paced clear of the color buffer to `color` (the raw byte pattern of
    /// one pixel). Poll every cycle; `true` once complete.
    pub fn clear(&mut self, color: &[u8]) -> bool {
        self.engine.clear_blocks(color)
    }

    pub fn inner(&self) -> &RopCache<ColorBlockCodec, S> {
        &self.engine
    }

    pub fn inner_mut(&mut self) -> &mut RopCache<ColorBlockCodec, S> {
        &mut self.engine
    }
}
