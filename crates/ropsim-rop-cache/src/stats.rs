/// Cycle and event counters of one cache engine.
///
/// Purely observational: nothing in the engine reads them back. Cycle
/// counters increment at most once per cycle when the named condition held.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RopCacheStats {
    /// Cycles with no new line-store request to admit.
    pub no_request_cycles: u64,
    /// Cycles a request could not be admitted because the write queue was
    /// full.
    pub write_queue_full_cycles: u64,
    /// Cycles a request could not be admitted because the read queue was
    /// full.
    pub read_queue_full_cycles: u64,
    /// Cycles a fill was held back by a pending spill of the same block
    /// (read-after-write hazard).
    pub hazard_stall_cycles: u64,
    /// Cycles an allocate was refused because the block sat in the write
    /// queue.
    pub allocate_hazard_cycles: u64,
    /// Cycles a ready block waited for the decompressor.
    pub decompressor_busy_cycles: u64,
    /// Cycles the oldest fill sat waiting for its memory data.
    pub fill_data_wait_cycles: u64,
    /// Cycles a drained block waited for the compressor.
    pub compressor_busy_cycles: u64,
    /// Cycles a transaction was ready but the bus/controller refused it.
    pub memory_stall_cycles: u64,
    /// Cycles a line drain waited for a read port.
    pub read_port_stall_cycles: u64,
    /// Cycles a line fill waited for a write port.
    pub write_port_stall_cycles: u64,

    pub read_transactions: u64,
    pub write_transactions: u64,
    /// Fills synthesized from the clear value without touching memory.
    pub clear_fills: u64,

    /// Spill outcomes by encoded size.
    pub blocks_compressed_best: u64,
    pub blocks_compressed_normal: u64,
    pub blocks_uncompressed: u64,
}
