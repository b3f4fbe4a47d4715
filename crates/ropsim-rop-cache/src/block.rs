use crate::error::ProtocolError;
use ropsim_hilo::CompressionLevel;

/// Index of a block in the ROP data buffer, obtained by right-shifting a
/// buffer-relative byte address by `log2(block size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockIndex(pub u32);

impl std::fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Recorded storage state of one block. Exactly one state holds at a time;
/// it changes only as the side effect of a write-back (the compressor output
/// decides) or of an explicit clear/reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    /// Logical content is the registered clear value; no storage backs the
    /// block and a fill never touches memory.
    #[default]
    Clear,
    Uncompressed,
    Compressed(CompressionLevel),
}

impl BlockState {
    pub fn is_compressed(self) -> bool {
        matches!(self, BlockState::Compressed(_))
    }
}

// Persisted one-byte encoding: low two bits are the state tag, bit 2 selects
// the compression level for the compressed tag.
const TAG_CLEAR: u8 = 0x00;
const TAG_UNCOMPRESSED: u8 = 0x01;
const TAG_COMPRESSED_BEST: u8 = 0x02;
const TAG_COMPRESSED_NORMAL: u8 = 0x06;

pub(crate) fn encode_state(state: BlockState) -> u8 {
    match state {
        BlockState::Clear => TAG_CLEAR,
        BlockState::Uncompressed => TAG_UNCOMPRESSED,
        BlockState::Compressed(CompressionLevel::Best) => TAG_COMPRESSED_BEST,
        BlockState::Compressed(CompressionLevel::Normal) => TAG_COMPRESSED_NORMAL,
    }
}

pub(crate) fn decode_state(tag: u8) -> Result<BlockState, ProtocolError> {
    match tag {
        TAG_CLEAR => Ok(BlockState::Clear),
        TAG_UNCOMPRESSED => Ok(BlockState::Uncompressed),
        TAG_COMPRESSED_BEST => Ok(BlockState::Compressed(CompressionLevel::Best)),
        TAG_COMPRESSED_NORMAL => Ok(BlockState::Compressed(CompressionLevel::Normal)),
        other => Err(ProtocolError::UnknownBlockTag(other)),
    }
}

/// The per-block compression state of a whole ROP data buffer.
///
/// Sized at construction for the maximum addressable blocks of the largest
/// supported resolution and owned exclusively by the cache engine; external
/// stages see it only through explicit copy/persistence calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStateTable {
    states: Vec<BlockState>,
}

impl BlockStateTable {
    /// All blocks start in `Clear` state.
    pub fn new(max_blocks: u32) -> Self {
        Self {
            states: vec![BlockState::Clear; max_blocks as usize],
        }
    }

    pub fn len(&self) -> u32 {
        self.states.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, block: BlockIndex) -> BlockState {
        self.states[block.0 as usize]
    }

    pub fn set(&mut self, block: BlockIndex, state: BlockState) {
        self.states[block.0 as usize] = state;
    }

    /// Bulk-resets every block, e.g. to `Clear` after a buffer clear or to
    /// `Uncompressed` after restoring a buffer of unknown content.
    pub fn fill(&mut self, state: BlockState) {
        self.states.fill(state);
    }

    /// Copies the first `out.len()` entries into `out` (a consistent
    /// snapshot for external readers).
    pub fn copy_to(&self, out: &mut [BlockState]) -> Result<(), ProtocolError> {
        let requested = out.len() as u32;
        if requested > self.len() {
            return Err(ProtocolError::BlockCountOutOfRange {
                requested,
                max_blocks: self.len(),
            });
        }
        out.copy_from_slice(&self.states[..out.len()]);
        Ok(())
    }

    /// Serializes the first `blocks` entries into their one-byte-per-block
    /// persisted encoding.
    pub fn encode_blocks(&self, blocks: u32) -> Result<Vec<u8>, ProtocolError> {
        if blocks > self.len() {
            return Err(ProtocolError::BlockCountOutOfRange {
                requested: blocks,
                max_blocks: self.len(),
            });
        }
        Ok(self.states[..blocks as usize]
            .iter()
            .map(|&s| encode_state(s))
            .collect())
    }

    /// Decodes `blocks` persisted entries from `data` into the table.
    ///
    /// An unrecognized tag means the persisted image is corrupt; the table is
    /// left untouched and the error is fatal to the run.
    pub fn decode_and_fill_blocks(
        &mut self,
        data: &[u8],
        blocks: u32,
    ) -> Result<(), ProtocolError> {
        if blocks > self.len() || data.len() < blocks as usize {
            return Err(ProtocolError::BlockCountOutOfRange {
                requested: blocks,
                max_blocks: self.len().min(data.len() as u32),
            });
        }
        let mut decoded = Vec::with_capacity(blocks as usize);
        for &tag in &data[..blocks as usize] {
            decoded.push(decode_state(tag)?);
        }
        self.states[..blocks as usize].copy_from_slice(&decoded);
        Ok(())
    }
}
