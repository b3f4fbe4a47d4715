use thiserror::Error;

/// Hard protocol violations.
///
/// Unlike resource backpressure (which is reported through `false`/`None`
/// returns and retried the next cycle), these indicate a caller bug or
/// corrupted persisted state. The simulation cannot continue consistently
/// past one of them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("address {address:#010x} maps to block {block} outside the state table ({max_blocks} blocks)")]
    BlockOutOfRange {
        address: u32,
        block: u32,
        max_blocks: u32,
    },

    #[error("unknown persisted block state tag {0:#04x}")]
    UnknownBlockTag(u8),

    #[error("block state request for {requested} blocks exceeds the {max_blocks}-entry table")]
    BlockCountOutOfRange { requested: u32, max_blocks: u32 },

    #[error("read data arrived for ticket {0} with no outstanding request")]
    UnknownTicket(u32),

    #[error("read data arrived while the memory data bus is busy")]
    BusBusy,

    #[error("read data overruns request: {received} + {incoming} bytes of {size}")]
    ReadDataOverrun {
        received: u32,
        incoming: u32,
        size: u32,
    },

    #[error("reset requested while a memory transaction is in flight")]
    ResetWhileBusy,

    #[error("spill admitted for address {address:#010x} while a fill for the same line is outstanding")]
    SpillOverlapsPendingFill { address: u32 },
}
