use ropsim_hilo::CompressionLevel;

/// Compression capability a cache instance injects into the engine.
///
/// The engine is generic over this trait instead of subclassing: the concrete
/// codec (color vs. depth extents, masks, shifts) is known when the cache is
/// built, so no dynamic dispatch is involved.
pub trait BlockCodec {
    /// Compresses a block of 32-bit words into `out`, returning the achieved
    /// level or `None` when the block must stay uncompressed (in which case
    /// `out` is untouched). Implementations must try tighter levels first.
    fn compress(&self, words: &[u32], out: &mut [u8]) -> Option<CompressionLevel>;

    /// Reconstructs a block recorded at `level` from `input`.
    fn decompress(&self, input: &[u8], level: CompressionLevel, out: &mut [u32]);

    /// Encoded byte size per level (`None` = uncompressed).
    fn encoded_size(&self, level: Option<CompressionLevel>) -> usize;

    /// Per-spill summary value surfaced to the owning stage (the depth codec
    /// reports the block's 24-bit maximum for hierarchical-Z; color reports
    /// nothing).
    fn spill_summary(&self, _words: &[u32]) -> Option<u32> {
        None
    }
}
