use crate::block::{decode_state, encode_state, BlockIndex, BlockState, BlockStateTable};
use crate::codec::BlockCodec;
use crate::config::{ConfigError, RopCacheConfig};
use crate::error::ProtocolError;
use crate::memory::{MemState, MemoryTransaction, ReadData, Ticket, TicketPool, TicketTarget};
use crate::queue::{RequestQueue, SlotId};
use crate::stats::RopCacheStats;
use crate::storage::{CacheRequest, LineHandle, LineStorage, RequestId};
use ropsim_hilo::CompressionLevel;
use std::fmt::Write as _;
use tracing::{debug, trace};

/// Widest supported clear-value byte pattern (four 32-bit components).
pub(crate) const MAX_CLEAR_VALUE_BYTES: usize = 16;

/// Pipeline position of a fill (memory -> line) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStage {
    /// Waiting to issue its memory read (or to be synthesized, for `Clear`).
    AwaitIssue,
    /// Fully requested to memory; data still arriving.
    Requested,
    /// All bytes received; waiting for the decompressor slot.
    Received,
    /// Occupying the decompressor.
    Decompressing,
    /// Decompressed; waiting for a write port into the line store.
    Ready,
    /// Being written into its reserved line.
    Filling,
}

/// Pipeline position of a spill (line -> memory) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteStage {
    /// Waiting for a read port to drain the evicted line.
    AwaitDrain,
    /// Line read in progress through a read port.
    Draining,
    /// Drained; waiting for the compressor slot.
    Drained,
    /// Occupying the compressor.
    Compressing,
    /// Compressed; streaming write transactions to memory.
    WritingBack,
}

#[derive(Debug)]
struct ReadEntry {
    /// Framebuffer address of the block to fill.
    address: u32,
    block: BlockIndex,
    /// Bytes to fetch from memory; 0 until sized from the block state.
    size: u32,
    requested: u32,
    received: u32,
    handle: LineHandle,
    request_id: RequestId,
    source: Option<u64>,
    /// Paired with a spill of the same line: the line must be drained
    /// before this fill may overwrite it.
    write_wait: bool,
    stage: ReadStage,
    buf: Vec<u8>,
}

#[derive(Debug)]
struct WriteEntry {
    /// Framebuffer address of the block to spill.
    address: u32,
    /// Block index into the (per-stamp-unit) state table.
    block: BlockIndex,
    /// Framebuffer-global block number, kept for diagnostics.
    block_fb: u32,
    /// Bytes to write to memory; set by the compressor.
    size: u32,
    written: u32,
    handle: LineHandle,
    request_id: RequestId,
    source: Option<u64>,
    masked: bool,
    /// Fill entry blocked until this spill drains its line, with the request
    /// id to revalidate the (recyclable) slot.
    read_waiting: Option<(SlotId, RequestId)>,
    stage: WriteStage,
    buf: Vec<u8>,
    mask: Vec<u32>,
}

/// A block whose spill just went through the compressor, with the codec's
/// summary value (24-bit max depth for the Z codec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenBlock {
    pub block: BlockIndex,
    pub summary: Option<u32>,
}

/// Tracks which target the single in-flight write transaction serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteTarget {
    Queue(SlotId),
    StateSave,
}

/// The generic ROP block cache engine.
///
/// Owns the per-block compression state table and the fill/spill request
/// queues, and drives an external [`LineStorage`] plus the memory-controller
/// boundary one cycle at a time. The concrete codec decides the compression
/// format; [`crate::ColorCache`] and [`crate::DepthStencilCache`] are the two
/// shipped parameterizations.
///
/// Every public operation either succeeds, reports retryable backpressure
/// (`false`/`None`: call again next cycle, no request is ever dropped), or
/// fails hard with a [`ProtocolError`] that ends the simulation run.
pub struct RopCache<C: BlockCodec, S: LineStorage> {
    name: &'static str,
    cache_id: u32,
    cfg: RopCacheConfig,
    codec: C,
    storage: S,

    // Registers.
    buffer_addr: u32,
    state_addr: u32,
    compression: bool,
    bytes_pixel: u32,
    msaa_samples: u32,
    clear_value: [u8; MAX_CLEAR_VALUE_BYTES],
    clear_value_len: usize,
    clear_reset_value: [u8; MAX_CLEAR_VALUE_BYTES],
    clear_reset_len: usize,

    blocks: BlockStateTable,
    read_queue: RequestQueue<ReadEntry>,
    write_queue: RequestQueue<WriteEntry>,
    pending_request: Option<(RequestId, CacheRequest)>,

    // Memory boundary.
    memory_state: MemState,
    tickets: TicketPool,
    memory_cycles: u32,
    memory_read: bool,
    memory_write: bool,
    active_read: Option<Ticket>,
    active_write: Option<(Ticket, WriteTarget)>,
    last_size: u32,
    next_transaction: Option<MemoryTransaction>,

    // Port timing.
    read_port_cycles: Vec<u32>,
    write_port_cycles: Vec<u32>,
    draining_line: Option<(usize, SlotId)>,
    filling_line: Option<(usize, SlotId)>,
    fetch_performed: bool,

    // Compressor / decompressor slots (one block each, fixed latency).
    compress_cycles: u32,
    uncompress_cycles: u32,
    compressing_slot: Option<SlotId>,
    decompressing_slot: Option<SlotId>,

    // Flush handshake.
    flush_request: bool,
    flush_mode: bool,

    // Paced bulk operations over the block-state table.
    clear_request: bool,
    clear_mode: bool,
    clear_cycles: u32,
    pending_clear: [u8; MAX_CLEAR_VALUE_BYTES],
    pending_clear_len: usize,

    save_request: bool,
    save_mode: bool,
    save_encoded: u32,
    save_written: u32,
    save_buf: Vec<u8>,

    restore_request: bool,
    restore_mode: bool,
    restore_requested: u32,
    restore_received: u32,
    restore_decoded: u32,
    restore_buf: Vec<u8>,

    reset_state_request: bool,
    reset_state_mode: bool,
    reset_state_cycles: u32,

    written_block: Option<WrittenBlock>,
    stats: RopCacheStats,
}

fn free_port(cycles: &[u32]) -> Option<usize> {
    cycles.iter().position(|&c| c == 0)
}

/// Pads/truncates a clear pattern into the fixed register, returning the
/// pattern length (a multiple of four, at least one 32-bit component).
fn load_clear_pattern(register: &mut [u8; MAX_CLEAR_VALUE_BYTES], value: &[u8]) -> usize {
    register.fill(0);
    let copy = value.len().min(MAX_CLEAR_VALUE_BYTES);
    register[..copy].copy_from_slice(&value[..copy]);
    (copy & !3).max(4)
}

fn word_at(buf: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
}

fn set_word(buf: &mut [u8], i: usize, word: u32) {
    buf[i..i + 4].copy_from_slice(&word.to_le_bytes());
}

impl<C: BlockCodec, S: LineStorage> RopCache<C, S> {
    /// Builds an engine over `storage` with the given codec.
    ///
    /// `cache_id` identifies this instance on its memory transactions (the
    /// caller assigns it; the engine keeps no global counters).
    /// `clear_reset_value` is the clear pattern installed on a buffer clear
    /// before any explicit value is registered.
    pub fn new(
        cfg: RopCacheConfig,
        codec: C,
        storage: S,
        cache_id: u32,
        name: &'static str,
        clear_reset_value: &[u8],
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let mut clear_reset = [0u8; MAX_CLEAR_VALUE_BYTES];
        let reset_len = load_clear_pattern(&mut clear_reset, clear_reset_value);

        let read_ports = cfg.read_ports as usize;
        let write_ports = cfg.write_ports as usize;
        Ok(Self {
            name,
            cache_id,
            codec,
            storage,
            buffer_addr: 0,
            state_addr: 0,
            compression: true,
            bytes_pixel: 4,
            msaa_samples: 1,
            clear_value: clear_reset,
            clear_value_len: reset_len,
            clear_reset_value: clear_reset,
            clear_reset_len: reset_len,
            blocks: BlockStateTable::new(cfg.max_blocks),
            read_queue: RequestQueue::new(cfg.input_queue),
            write_queue: RequestQueue::new(cfg.output_queue),
            pending_request: None,
            memory_state: MemState::empty(),
            tickets: TicketPool::new(cfg.tickets),
            memory_cycles: 0,
            memory_read: false,
            memory_write: false,
            active_read: None,
            active_write: None,
            last_size: 0,
            next_transaction: None,
            read_port_cycles: vec![0; read_ports],
            write_port_cycles: vec![0; write_ports],
            draining_line: None,
            filling_line: None,
            fetch_performed: false,
            compress_cycles: 0,
            uncompress_cycles: 0,
            compressing_slot: None,
            decompressing_slot: None,
            flush_request: false,
            flush_mode: false,
            clear_request: false,
            clear_mode: false,
            clear_cycles: 0,
            pending_clear: clear_reset,
            pending_clear_len: reset_len,
            save_request: false,
            save_mode: false,
            save_encoded: 0,
            save_written: 0,
            save_buf: Vec::new(),
            restore_request: false,
            restore_mode: false,
            restore_requested: 0,
            restore_received: 0,
            restore_decoded: 0,
            restore_buf: Vec::new(),
            reset_state_request: false,
            reset_state_mode: false,
            reset_state_cycles: 0,
            written_block: None,
            stats: RopCacheStats::default(),
            cfg,
        })
    }

    pub fn config(&self) -> &RopCacheConfig {
        &self.cfg
    }

    pub fn cache_id(&self) -> u32 {
        self.cache_id
    }

    pub fn stats(&self) -> &RopCacheStats {
        &self.stats
    }

    /// Whether the memory data bus is mid-transfer. The controller must not
    /// deliver read data while this holds.
    pub fn data_bus_busy(&self) -> bool {
        self.memory_cycles > 0
    }

    /// Fill requests currently queued or in flight.
    pub fn queued_fills(&self) -> usize {
        self.read_queue.len()
    }

    /// Spill requests currently queued or in flight.
    pub fn queued_spills(&self) -> usize {
        self.write_queue.len()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Signals a buffer swap: subsequent addresses are relative to
    /// `address`.
    pub fn swap(&mut self, address: u32) {
        self.buffer_addr = address;
    }

    /// Memory location of the persisted block-state buffer used by
    /// [`RopCache::save_state`] / [`RopCache::restore_state`].
    pub fn set_state_address(&mut self, address: u32) {
        self.state_addr = address;
    }

    pub fn set_bytes_per_pixel(&mut self, bytes: u32) {
        self.bytes_pixel = bytes;
    }

    pub fn set_msaa_samples(&mut self, samples: u32) {
        self.msaa_samples = samples;
    }

    /// Enables or disables compression of spilled blocks. While disabled
    /// every spill is recorded `Uncompressed`.
    pub fn set_compression(&mut self, enable: bool) {
        self.compression = enable;
    }

    pub fn block_state(&self, block: BlockIndex) -> BlockState {
        self.blocks.get(block)
    }

    /// Snapshot of the first `out.len()` block states; the only sanctioned
    /// way for other stages to observe the table.
    pub fn copy_block_state(&self, out: &mut [BlockState]) -> Result<(), ProtocolError> {
        self.blocks.copy_to(out)
    }

    /// Serializes `blocks` table entries into the persisted encoding.
    pub fn encode_blocks(&self, blocks: u32) -> Result<Vec<u8>, ProtocolError> {
        self.blocks.encode_blocks(blocks)
    }

    /// Decodes `blocks` persisted entries into the table. Corrupt tags are
    /// fatal.
    pub fn decode_and_fill_blocks(
        &mut self,
        data: &[u8],
        blocks: u32,
    ) -> Result<(), ProtocolError> {
        self.blocks.decode_and_fill_blocks(data, blocks)
    }

    /// The block whose spill most recently went through the compressor,
    /// with the codec's summary value. Cleared by the call.
    pub fn take_written_block(&mut self) -> Option<WrittenBlock> {
        self.written_block.take()
    }

    /// Translates a framebuffer address to its per-stamp-unit block index,
    /// validating it against the state table bounds.
    fn block_index(&self, address: u32) -> Result<BlockIndex, ProtocolError> {
        let (local, _) = self.block_indices(address)?;
        Ok(local)
    }

    fn block_indices(&self, address: u32) -> Result<(BlockIndex, u32), ProtocolError> {
        let out_of_range = |block| ProtocolError::BlockOutOfRange {
            address,
            block,
            max_blocks: self.cfg.max_blocks,
        };
        let offset = address
            .checked_sub(self.buffer_addr)
            .ok_or_else(|| out_of_range(0))?;
        let fb = offset >> self.cfg.block_shift();

        // Blocks are dealt to stamp units in runs of `stride`; each unit
        // indexes its own compacted run sequence.
        let run = self.cfg.stamp_unit_stride * self.cfg.num_stamp_units;
        let local = (fb / run) * self.cfg.stamp_unit_stride + (fb % self.cfg.stamp_unit_stride);
        if local >= self.cfg.max_blocks {
            return Err(out_of_range(local));
        }
        Ok((BlockIndex(local), fb))
    }

    fn size_for_state(&self, state: BlockState) -> u32 {
        match state {
            BlockState::Clear => 0,
            BlockState::Uncompressed => self.cfg.block_size,
            BlockState::Compressed(level) => self.codec.encoded_size(Some(level)) as u32,
        }
    }

    fn port_cost(&self, size: u32) -> u32 {
        size.div_ceil(self.cfg.port_width)
    }

    fn bus_cost(&self, size: u32) -> u32 {
        size.div_ceil(self.cfg.bus_bytes_per_cycle).max(1)
    }

    fn clear_word_at(&self, byte_offset: usize) -> u32 {
        let len = self.clear_value_len;
        let base = byte_offset % len;
        u32::from_le_bytes([
            self.clear_value[base % len],
            self.clear_value[(base + 1) % len],
            self.clear_value[(base + 2) % len],
            self.clear_value[(base + 3) % len],
        ])
    }

    fn fill_clear(&self, buf: &mut [u8]) {
        for i in (0..buf.len()).step_by(4) {
            let word = self.clear_word_at(i);
            set_word(buf, i, word);
        }
    }

    fn bulk_busy(&self) -> bool {
        self.clear_mode || self.save_mode || self.restore_mode || self.reset_state_mode
    }

    // ------------------------------------------------------------------
    // Pipeline-facing operations (one cycle each).
    // ------------------------------------------------------------------

    /// Reserves (and on a miss begins fetching) the line for the stamp at
    /// `address`. Single-issue: at most one fetch/allocate per cycle.
    pub fn fetch(
        &mut self,
        address: u32,
        source: Option<u64>,
    ) -> Result<Option<LineHandle>, ProtocolError> {
        self.block_index(address)?;
        if self.fetch_performed {
            return Ok(None);
        }
        self.fetch_performed = true;
        Ok(self.storage.fetch(address, source))
    }

    /// Like [`RopCache::fetch`], but skips the memory read when the block is
    /// recorded `Clear` (its content is synthesized). Any other state must
    /// load the previous data so the eventual spill can recompress against
    /// it. Refused while a spill of the same block is still queued.
    pub fn allocate(
        &mut self,
        address: u32,
        source: Option<u64>,
    ) -> Result<Option<LineHandle>, ProtocolError> {
        let block = self.block_index(address)?;
        if self.fetch_performed {
            return Ok(None);
        }
        self.fetch_performed = true;

        if self.write_queue.iter().any(|(_, w)| w.block == block) {
            trace!(
                cache = self.name,
                block = block.0,
                "allocate deferred: block has a pending spill"
            );
            self.stats.allocate_hazard_cycles += 1;
            return Ok(None);
        }

        match self.blocks.get(block) {
            BlockState::Clear => Ok(self.storage.allocate(address, source)),
            _ => Ok(self.storage.fetch(address, source)),
        }
    }

    /// Transfers `size` bytes out of an already fetched line through the
    /// next free read port.
    pub fn read(&mut self, address: u32, handle: LineHandle, size: u32, out: &mut [u8]) -> bool {
        let Some(port) = free_port(&self.read_port_cycles) else {
            self.stats.read_port_stall_cycles += 1;
            return false;
        };
        if !self.storage.read(address, handle, size, out) {
            return false;
        }
        self.read_port_cycles[port] += self.port_cost(size);
        true
    }

    /// Transfers `size` bytes into the line through the next free write port
    /// and releases the reservation.
    pub fn write(&mut self, address: u32, handle: LineHandle, size: u32, data: &[u8]) -> bool {
        let Some(port) = free_port(&self.write_port_cycles) else {
            self.stats.write_port_stall_cycles += 1;
            return false;
        };
        if !self.storage.write(address, handle, size, data) {
            return false;
        }
        self.write_port_cycles[port] += self.port_cost(size);
        true
    }

    /// Byte-masked variant of [`RopCache::write`].
    pub fn write_masked(
        &mut self,
        address: u32,
        handle: LineHandle,
        size: u32,
        data: &[u8],
        mask: &[bool],
    ) -> bool {
        let Some(port) = free_port(&self.write_port_cycles) else {
            self.stats.write_port_stall_cycles += 1;
            return false;
        };
        if !self.storage.write_masked(address, handle, size, data, mask) {
            return false;
        }
        self.write_port_cycles[port] += self.port_cost(size);
        true
    }

    /// Releases a reservation taken by fetch/allocate without transferring
    /// data.
    pub fn unreserve(&mut self, handle: LineHandle) {
        self.storage.unreserve(handle);
    }

    /// Starts or continues writing back every valid line; `true` once the
    /// whole cache is clean. Idempotent while in progress; poll every cycle.
    pub fn flush(&mut self) -> bool {
        if !self.flush_request {
            self.flush_request = true;
            self.flush_mode = true;
            debug!(cache = self.name, "flush started");
            return false;
        }
        if self.flush_mode {
            return false;
        }
        self.flush_request = false;
        debug!(cache = self.name, "flush complete");
        true
    }

    /// Instantaneously clears all reservations, queues, ports and tickets.
    /// Does not touch the block-state table (that is paced bulk work, see
    /// [`RopCache::clear_blocks`] and [`RopCache::reset_state`]).
    ///
    /// Only legal while no memory transaction is on the bus; the boundary
    /// collaborator's open transaction must complete first.
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        if self.memory_cycles > 0 {
            return Err(ProtocolError::ResetWhileBusy);
        }
        self.reset_machinery();
        // The clear register reverts to the instance default until a new
        // clear installs an explicit value.
        self.clear_value = self.clear_reset_value;
        self.clear_value_len = self.clear_reset_len;
        self.storage.reset();
        Ok(())
    }

    fn reset_machinery(&mut self) {
        self.read_queue.clear();
        self.write_queue.clear();
        self.pending_request = None;
        self.read_port_cycles.fill(0);
        self.write_port_cycles.fill(0);
        self.draining_line = None;
        self.filling_line = None;
        self.memory_cycles = 0;
        self.memory_read = false;
        self.memory_write = false;
        self.active_read = None;
        self.active_write = None;
        self.last_size = 0;
        self.next_transaction = None;
        self.tickets.reset();
        self.compress_cycles = 0;
        self.uncompress_cycles = 0;
        self.compressing_slot = None;
        self.decompressing_slot = None;
        self.fetch_performed = false;
        self.flush_request = false;
        self.flush_mode = false;
        self.written_block = None;
    }

    /// Paced buffer clear: resets the cache machinery, then marks every
    /// block `Clear` and registers `value` as the clear pattern, at the
    /// configured blocks-per-cycle rate. `true` once complete.
    pub fn clear_blocks(&mut self, value: &[u8]) -> bool {
        if self.clear_request {
            if self.clear_mode {
                return false;
            }
            self.clear_request = false;
            return true;
        }
        if self.bulk_busy() || self.memory_cycles > 0 {
            return false;
        }
        let mut pending = [0u8; MAX_CLEAR_VALUE_BYTES];
        self.pending_clear_len = load_clear_pattern(&mut pending, value);
        self.pending_clear = pending;
        self.clear_cycles = self.cfg.max_blocks.div_ceil(self.cfg.blocks_per_cycle);
        self.clear_request = true;
        self.clear_mode = true;
        self.reset_machinery();
        self.storage.reset();
        debug!(cache = self.name, cycles = self.clear_cycles, "clear started");
        false
    }

    /// Paced save of the block-state table: encodes `max_blocks` entries at
    /// the blocks-per-cycle rate and streams the bytes to the registered
    /// state address through ordinary bounded write transactions. `true`
    /// once complete.
    pub fn save_state(&mut self) -> bool {
        if self.save_request {
            if self.save_mode {
                return false;
            }
            self.save_request = false;
            return true;
        }
        if self.bulk_busy() {
            return false;
        }
        self.save_request = true;
        self.save_mode = true;
        self.save_encoded = 0;
        self.save_written = 0;
        self.save_buf = vec![0; self.cfg.max_blocks as usize];
        debug!(cache = self.name, blocks = self.cfg.max_blocks, "state save started");
        false
    }

    /// Paced restore of the block-state table from the registered state
    /// address. `true` once complete; a corrupt persisted tag aborts the run
    /// via [`RopCache::update`].
    pub fn restore_state(&mut self) -> bool {
        if self.restore_request {
            if self.restore_mode {
                return false;
            }
            self.restore_request = false;
            return true;
        }
        if self.bulk_busy() {
            return false;
        }
        self.restore_request = true;
        self.restore_mode = true;
        self.restore_requested = 0;
        self.restore_received = 0;
        self.restore_decoded = 0;
        self.restore_buf = vec![0; self.cfg.max_blocks as usize];
        debug!(cache = self.name, blocks = self.cfg.max_blocks, "state restore started");
        false
    }

    /// Paced reset of every block state to `Uncompressed` (the safe
    /// assumption after restoring buffer data of unknown provenance).
    /// `true` once complete.
    pub fn reset_state(&mut self) -> bool {
        if self.reset_state_request {
            if self.reset_state_mode {
                return false;
            }
            self.reset_state_request = false;
            return true;
        }
        if self.bulk_busy() {
            return false;
        }
        self.reset_state_request = true;
        self.reset_state_mode = true;
        self.reset_state_cycles = self.cfg.max_blocks.div_ceil(self.cfg.blocks_per_cycle);
        false
    }

    // ------------------------------------------------------------------
    // Memory-controller boundary.
    // ------------------------------------------------------------------

    /// Accepts read data from the memory controller for an outstanding
    /// ticket. The data bus is then busy for `bus_cycles`.
    pub fn process_read_data(&mut self, data: ReadData) -> Result<(), ProtocolError> {
        if self.memory_cycles > 0 {
            return Err(ProtocolError::BusBusy);
        }
        let len = data.data.len() as u32;
        match self.tickets.target(data.ticket) {
            Some(TicketTarget::ReadSlot { slot, offset }) => {
                let entry = self
                    .read_queue
                    .get_mut(slot)
                    .ok_or(ProtocolError::UnknownTicket(data.ticket.0))?;
                if offset + len > entry.size {
                    return Err(ProtocolError::ReadDataOverrun {
                        received: offset,
                        incoming: len,
                        size: entry.size,
                    });
                }
                entry.buf[offset as usize..(offset + len) as usize].copy_from_slice(&data.data);
            }
            Some(TicketTarget::StateRestore { offset }) => {
                if (offset + len) as usize > self.restore_buf.len() {
                    return Err(ProtocolError::ReadDataOverrun {
                        received: offset,
                        incoming: len,
                        size: self.restore_buf.len() as u32,
                    });
                }
                self.restore_buf[offset as usize..(offset + len) as usize]
                    .copy_from_slice(&data.data);
            }
            Some(TicketTarget::Write) | None => {
                return Err(ProtocolError::UnknownTicket(data.ticket.0));
            }
        }
        trace!(
            cache = self.name,
            ticket = data.ticket.0,
            size = len,
            bus_cycles = data.bus_cycles,
            "read data arrived"
        );
        self.active_read = Some(data.ticket);
        self.last_size = len;
        self.memory_read = true;
        self.memory_cycles = data.bus_cycles.max(1);
        Ok(())
    }

    /// Advances the engine by one cycle with the controller's availability
    /// for this cycle, returning at most one new outbound transaction.
    pub fn update(
        &mut self,
        cycle: u64,
        memory_state: MemState,
    ) -> Result<Option<MemoryTransaction>, ProtocolError> {
        self.memory_state = memory_state;
        self.clock(cycle)?;
        Ok(self.next_transaction.take())
    }

    // ------------------------------------------------------------------
    // Per-cycle state machine.
    // ------------------------------------------------------------------

    fn clock(&mut self, cycle: u64) -> Result<(), ProtocolError> {
        trace!(cache = self.name, cycle, "clock");

        if self.flush_mode {
            self.flush_mode = !self.storage.flush();
        }
        self.update_clear();
        self.update_save_state();
        self.update_restore_state()?;
        self.update_reset_state();

        self.fetch_performed = false;
        self.next_transaction = None;

        self.tick_read_ports();
        self.tick_write_ports();
        self.admit_request()?;
        self.tick_memory_bus();
        self.issue_read();
        self.issue_line_drain();
        self.tick_decompressor();
        self.start_decompression();
        self.tick_compressor();
        self.start_compression();
        self.issue_write_back();
        self.issue_line_fill();
        Ok(())
    }

    fn update_clear(&mut self) {
        if !self.clear_mode {
            return;
        }
        self.clear_cycles -= 1;
        if self.clear_cycles == 0 {
            self.blocks.fill(BlockState::Clear);
            self.clear_value = self.pending_clear;
            self.clear_value_len = self.pending_clear_len;
            self.clear_mode = false;
            debug!(cache = self.name, "clear complete");
        }
    }

    fn update_save_state(&mut self) {
        if !self.save_mode {
            return;
        }
        if self.save_encoded < self.cfg.max_blocks {
            let n = self
                .cfg
                .blocks_per_cycle
                .min(self.cfg.max_blocks - self.save_encoded);
            for i in self.save_encoded..self.save_encoded + n {
                self.save_buf[i as usize] = encode_state(self.blocks.get(BlockIndex(i)));
            }
            self.save_encoded += n;
        }
        if self.save_encoded == self.cfg.max_blocks && self.save_written == self.cfg.max_blocks {
            self.save_mode = false;
            self.save_buf = Vec::new();
            debug!(cache = self.name, "state save complete");
        }
    }

    fn update_restore_state(&mut self) -> Result<(), ProtocolError> {
        if !self.restore_mode {
            return Ok(());
        }
        if self.restore_received > self.restore_decoded {
            let n = self
                .cfg
                .blocks_per_cycle
                .min(self.restore_received - self.restore_decoded);
            for i in self.restore_decoded..self.restore_decoded + n {
                let state = decode_state(self.restore_buf[i as usize])?;
                self.blocks.set(BlockIndex(i), state);
            }
            self.restore_decoded += n;
        }
        if self.restore_decoded == self.cfg.max_blocks {
            self.restore_mode = false;
            self.restore_buf = Vec::new();
            debug!(cache = self.name, "state restore complete");
        }
        Ok(())
    }

    fn update_reset_state(&mut self) {
        if !self.reset_state_mode {
            return;
        }
        self.reset_state_cycles -= 1;
        if self.reset_state_cycles == 0 {
            self.blocks.fill(BlockState::Uncompressed);
            self.reset_state_mode = false;
        }
    }

    fn tick_read_ports(&mut self) {
        for port in 0..self.read_port_cycles.len() {
            if self.read_port_cycles[port] == 0 {
                continue;
            }
            self.read_port_cycles[port] -= 1;
            if self.read_port_cycles[port] != 0 {
                continue;
            }
            if let Some((p, slot)) = self.draining_line {
                if p == port {
                    if let Some(entry) = self.write_queue.get_mut(slot) {
                        entry.stage = WriteStage::Drained;
                        trace!(cache = self.name, block = entry.block.0, "line drained");
                    }
                    self.draining_line = None;
                }
            }
        }
    }

    fn tick_write_ports(&mut self) {
        for port in 0..self.write_port_cycles.len() {
            if self.write_port_cycles[port] == 0 {
                continue;
            }
            self.write_port_cycles[port] -= 1;
            if self.write_port_cycles[port] != 0 {
                continue;
            }
            if let Some((p, slot)) = self.filling_line {
                if p == port {
                    // The fill is complete: retire the read entry and release
                    // the line-store request.
                    if let Some(entry) = self.read_queue.remove(slot) {
                        trace!(cache = self.name, block = entry.block.0, "fill retired");
                        self.storage.free_request(entry.request_id, false, true);
                    }
                    self.filling_line = None;
                }
            }
        }
    }

    fn admit_request(&mut self) -> Result<(), ProtocolError> {
        if self.pending_request.is_none() {
            self.pending_request = self.storage.next_request();
            if self.pending_request.is_none() {
                self.stats.no_request_cycles += 1;
                return Ok(());
            }
        }
        let Some((id, req)) = self.pending_request else {
            return Ok(());
        };

        // Admission needs room in both queues before it will take the
        // request apart.
        let mut full = false;
        if self.write_queue.is_full() {
            self.stats.write_queue_full_cycles += 1;
            full = true;
        }
        if self.read_queue.is_full() {
            self.stats.read_queue_full_cycles += 1;
            full = true;
        }
        if full {
            return Ok(());
        }

        if req.fill {
            // Read-after-write hazard: a fill must not read memory ahead of
            // a still-queued spill of the same block. Hold the request back
            // until the spill retires.
            let hazard = self
                .write_queue
                .iter()
                .any(|(_, w)| w.address == req.fill_address);
            if hazard {
                trace!(
                    cache = self.name,
                    address = format_args!("{:#010x}", req.fill_address),
                    "fill held: pending spill of the same block"
                );
                self.stats.hazard_stall_cycles += 1;
                return Ok(());
            }
        }

        if req.spill
            && self
                .read_queue
                .iter()
                .any(|(_, r)| r.address == req.spill_address)
        {
            // A line with an outstanding fill must never be drained.
            return Err(ProtocolError::SpillOverlapsPendingFill {
                address: req.spill_address,
            });
        }

        let read_slot = if req.fill {
            let block = self.block_index(req.fill_address)?;
            let entry = ReadEntry {
                address: req.fill_address,
                block,
                size: 0,
                requested: 0,
                received: 0,
                handle: req.handle,
                request_id: id,
                source: req.source,
                write_wait: req.spill,
                stage: ReadStage::AwaitIssue,
                buf: vec![0; self.cfg.block_size as usize],
            };
            debug!(
                cache = self.name,
                block = block.0,
                address = format_args!("{:#010x}", req.fill_address),
                paired_spill = req.spill,
                "fill admitted"
            );
            self.read_queue.push(entry)
        } else {
            None
        };

        if req.spill {
            let (block, block_fb) = self.block_indices(req.spill_address)?;
            let entry = WriteEntry {
                address: req.spill_address,
                block,
                block_fb,
                size: 0,
                written: 0,
                handle: req.handle,
                request_id: id,
                source: req.source,
                masked: req.masked,
                read_waiting: read_slot.map(|slot| (slot, id)),
                stage: WriteStage::AwaitDrain,
                buf: vec![0; self.cfg.block_size as usize],
                mask: vec![0; self.cfg.words_per_block()],
            };
            debug!(
                cache = self.name,
                block = block.0,
                address = format_args!("{:#010x}", req.spill_address),
                masked = req.masked,
                "spill admitted"
            );
            self.write_queue.push(entry);
        }

        self.pending_request = None;
        Ok(())
    }

    fn tick_memory_bus(&mut self) {
        if self.memory_cycles == 0 {
            return;
        }
        self.memory_cycles -= 1;
        if self.memory_cycles != 0 {
            return;
        }

        if self.memory_read {
            if let Some(ticket) = self.active_read.take() {
                match self.tickets.target(ticket) {
                    Some(TicketTarget::ReadSlot { slot, .. }) => {
                        if let Some(entry) = self.read_queue.get_mut(slot) {
                            entry.received += self.last_size;
                            if entry.received == entry.size
                                && entry.stage == ReadStage::Requested
                            {
                                entry.stage = ReadStage::Received;
                                trace!(
                                    cache = self.name,
                                    block = entry.block.0,
                                    "fill data complete"
                                );
                            }
                        }
                    }
                    Some(TicketTarget::StateRestore { .. }) => {
                        self.restore_received += self.last_size;
                    }
                    _ => {}
                }
                self.tickets.release(ticket);
            }
            self.memory_read = false;
        }

        if self.memory_write {
            if let Some((ticket, target)) = self.active_write.take() {
                if let WriteTarget::Queue(slot) = target {
                    let done = self
                        .write_queue
                        .get(slot)
                        .is_some_and(|e| e.written == e.size);
                    if done {
                        if let Some(entry) = self.write_queue.remove(slot) {
                            trace!(
                                cache = self.name,
                                block = entry.block.0,
                                "spill retired"
                            );
                            self.storage.free_request(entry.request_id, true, false);
                        }
                    }
                }
                self.tickets.release(ticket);
            }
            self.memory_write = false;
        }
    }

    fn bus_free(&self) -> bool {
        !self.memory_read && !self.memory_write && self.memory_cycles == 0
    }

    /// Issues the next memory read: restore-state traffic first, otherwise
    /// the oldest fill still requesting its block.
    fn issue_read(&mut self) {
        if self.next_transaction.is_some() {
            return;
        }

        if self.restore_mode && self.restore_requested < self.cfg.max_blocks {
            if !(self.bus_free()
                && self.tickets.available()
                && self.memory_state.contains(MemState::READ_ACCEPT))
            {
                self.stats.memory_stall_cycles += 1;
                return;
            }
            let size = self
                .cfg
                .max_transaction
                .min(self.cfg.max_blocks - self.restore_requested);
            let Some(ticket) = self.tickets.take(TicketTarget::StateRestore {
                offset: self.restore_requested,
            }) else {
                return;
            };
            self.next_transaction = Some(MemoryTransaction::ReadRequest {
                address: self.state_addr + self.restore_requested,
                size,
                ticket,
                cache_id: self.cache_id,
                source: None,
            });
            self.restore_requested += size;
            self.stats.read_transactions += 1;
            return;
        }

        let Some(slot) = self
            .read_queue
            .find_front(|r| r.stage == ReadStage::AwaitIssue)
        else {
            return;
        };
        // Resolve the block size lazily from the recorded state.
        let (block, state) = {
            let entry = self.read_queue.get(slot).map(|e| e.block);
            let Some(block) = entry else { return };
            (block, self.blocks.get(block))
        };

        if state == BlockState::Clear {
            // Clear blocks never touch memory: synthesize on the spot.
            if let Some(entry) = self.read_queue.get_mut(slot) {
                entry.size = self.cfg.block_size;
                entry.received = self.cfg.block_size;
                entry.stage = ReadStage::Received;
            }
            self.stats.clear_fills += 1;
            trace!(cache = self.name, block = block.0, "clear fill synthesized");
            return;
        }

        let size_for_state = self.size_for_state(state);
        let (address, offset, remaining, source) = {
            let Some(entry) = self.read_queue.get_mut(slot) else {
                return;
            };
            if entry.size == 0 {
                entry.size = size_for_state;
            }
            (
                entry.address,
                entry.requested,
                entry.size - entry.requested,
                entry.source,
            )
        };

        if !(self.bus_free()
            && self.tickets.available()
            && self.memory_state.contains(MemState::READ_ACCEPT))
        {
            self.stats.memory_stall_cycles += 1;
            return;
        }
        let size = self.cfg.max_transaction.min(remaining);
        let Some(ticket) = self.tickets.take(TicketTarget::ReadSlot { slot, offset }) else {
            return;
        };
        self.next_transaction = Some(MemoryTransaction::ReadRequest {
            address: address + offset,
            size,
            ticket,
            cache_id: self.cache_id,
            source,
        });
        self.stats.read_transactions += 1;
        if let Some(entry) = self.read_queue.get_mut(slot) {
            entry.requested += size;
            if entry.requested == entry.size {
                entry.stage = ReadStage::Requested;
            }
        }
    }

    /// Drains the oldest pending spill's line out of the line store through
    /// a read port.
    fn issue_line_drain(&mut self) {
        if self.draining_line.is_some() {
            return;
        }
        let Some(slot) = self
            .write_queue
            .find_front(|w| w.stage == WriteStage::AwaitDrain)
        else {
            return;
        };
        let Some(port) = free_port(&self.read_port_cycles) else {
            self.stats.read_port_stall_cycles += 1;
            return;
        };

        let (handle, masked) = {
            let Some(entry) = self.write_queue.get(slot) else {
                return;
            };
            (entry.handle, entry.masked)
        };
        let ok = {
            let Some(entry) = self.write_queue.get_mut(slot) else {
                return;
            };
            self.storage.read_line(handle, &mut entry.buf)
        };
        if !ok {
            return;
        }
        if masked {
            if let Some(entry) = self.write_queue.get_mut(slot) {
                self.storage.read_mask(handle, &mut entry.mask);
            }
        }

        let read_waiting = {
            let Some(entry) = self.write_queue.get_mut(slot) else {
                return;
            };
            entry.stage = WriteStage::Draining;
            entry.read_waiting.take()
        };
        self.read_port_cycles[port] += self.port_cost(self.cfg.block_size);
        self.draining_line = Some((port, slot));

        // The paired fill may replace the line now that its old content is
        // latched into the drain buffer.
        if let Some((read_slot, request_id)) = read_waiting {
            if let Some(read) = self.read_queue.get_mut(read_slot) {
                if read.request_id == request_id {
                    read.write_wait = false;
                }
            }
        }
    }

    fn tick_decompressor(&mut self) {
        if self.uncompress_cycles == 0 {
            return;
        }
        self.uncompress_cycles -= 1;
        if self.uncompress_cycles != 0 {
            return;
        }
        if let Some(slot) = self.decompressing_slot.take() {
            if let Some(entry) = self.read_queue.get_mut(slot) {
                entry.stage = ReadStage::Ready;
            }
        }
    }

    /// Feeds the oldest fully received fill into the decompressor. Fills are
    /// decompressed strictly in admission order; a younger complete fill
    /// never bypasses an older one still waiting on memory.
    fn start_decompression(&mut self) {
        if self.uncompress_cycles != 0 || self.decompressing_slot.is_some() {
            if self
                .read_queue
                .find_front(|r| r.stage == ReadStage::Received)
                .is_some()
            {
                self.stats.decompressor_busy_cycles += 1;
            }
            return;
        }
        let Some(slot) = self.read_queue.find_front(|r| {
            matches!(
                r.stage,
                ReadStage::AwaitIssue | ReadStage::Requested | ReadStage::Received
            )
        }) else {
            return;
        };
        let (block, stage) = {
            let Some(entry) = self.read_queue.get(slot) else {
                return;
            };
            (entry.block, entry.stage)
        };
        if stage != ReadStage::Received {
            self.stats.fill_data_wait_cycles += 1;
            return;
        }

        let state = self.blocks.get(block);
        match state {
            BlockState::Clear => {
                let clear_len = self.cfg.block_size as usize;
                let mut filled = vec![0u8; clear_len];
                self.fill_clear(&mut filled);
                if let Some(entry) = self.read_queue.get_mut(slot) {
                    entry.buf.copy_from_slice(&filled);
                }
            }
            BlockState::Uncompressed => {}
            BlockState::Compressed(level) => {
                let encoded = self.codec.encoded_size(Some(level));
                let mut words = vec![0u32; self.cfg.words_per_block()];
                {
                    let Some(entry) = self.read_queue.get(slot) else {
                        return;
                    };
                    self.codec.decompress(&entry.buf[..encoded], level, &mut words);
                }
                if let Some(entry) = self.read_queue.get_mut(slot) {
                    for (i, word) in words.iter().enumerate() {
                        set_word(&mut entry.buf, i * 4, *word);
                    }
                }
            }
        }
        trace!(
            cache = self.name,
            block = block.0,
            state = ?state,
            "decompression started"
        );
        self.uncompress_cycles = self.cfg.decompress_latency;
        self.decompressing_slot = Some(slot);
        if let Some(entry) = self.read_queue.get_mut(slot) {
            entry.stage = ReadStage::Decompressing;
        }
    }

    fn tick_compressor(&mut self) {
        if self.compress_cycles == 0 {
            return;
        }
        self.compress_cycles -= 1;
        if self.compress_cycles != 0 {
            return;
        }
        if let Some(slot) = self.compressing_slot.take() {
            if let Some(entry) = self.write_queue.get_mut(slot) {
                entry.stage = WriteStage::WritingBack;
            }
        }
    }

    /// Runs the oldest drained spill through the compressor, recording the
    /// block's new state and encoded size.
    fn start_compression(&mut self) {
        if self.compress_cycles != 0 || self.compressing_slot.is_some() {
            if self
                .write_queue
                .find_front(|w| w.stage == WriteStage::Drained)
                .is_some()
            {
                self.stats.compressor_busy_cycles += 1;
            }
            return;
        }
        let Some(slot) = self.write_queue.find_front(|w| {
            matches!(
                w.stage,
                WriteStage::AwaitDrain | WriteStage::Draining | WriteStage::Drained
            )
        }) else {
            return;
        };
        let (block, stage, masked) = {
            let Some(entry) = self.write_queue.get(slot) else {
                return;
            };
            (entry.block, entry.stage, entry.masked)
        };
        if stage != WriteStage::Drained {
            return;
        }

        let prior = self.blocks.get(block);

        // A spill of a Clear block carries the line's byte mask: positions
        // the pipeline never wrote still hold the clear value logically, so
        // merge it in and treat the block as fully written from here on.
        if prior == BlockState::Clear && masked {
            let block_size = self.cfg.block_size as usize;
            let clear_words: Vec<u32> =
                (0..block_size).step_by(4).map(|i| self.clear_word_at(i)).collect();
            if let Some(entry) = self.write_queue.get_mut(slot) {
                for (w, clear) in clear_words.iter().enumerate() {
                    let i = w * 4;
                    let mask = entry.mask[w];
                    let word = (word_at(&entry.buf, i) & mask) | (clear & !mask);
                    set_word(&mut entry.buf, i, word);
                    entry.mask[w] = 0xFFFF_FFFF;
                }
            }
        }

        let words: Vec<u32> = {
            let Some(entry) = self.write_queue.get(slot) else {
                return;
            };
            (0..entry.buf.len()).step_by(4).map(|i| word_at(&entry.buf, i)).collect()
        };

        self.written_block = Some(WrittenBlock {
            block,
            summary: self.codec.spill_summary(&words),
        });

        // Masked data of a non-clear block cannot be compressed: the mask
        // must survive to memory, and compressed encodings carry none.
        let try_compress = self.compression && !self.cfg.disable_compression && !(masked
            && prior != BlockState::Clear);
        let outcome = if try_compress {
            let scratch_len = self
                .codec
                .encoded_size(Some(CompressionLevel::Best))
                .max(self.codec.encoded_size(Some(CompressionLevel::Normal)));
            let mut scratch = vec![0u8; scratch_len];
            self.codec.compress(&words, &mut scratch).map(|level| (level, scratch))
        } else {
            None
        };

        match outcome {
            Some((level, scratch)) => {
                let size = self.codec.encoded_size(Some(level));
                self.blocks.set(block, BlockState::Compressed(level));
                if let Some(entry) = self.write_queue.get_mut(slot) {
                    entry.size = size as u32;
                    entry.buf[..size].copy_from_slice(&scratch[..size]);
                    entry.masked = false;
                }
                match level {
                    CompressionLevel::Best => self.stats.blocks_compressed_best += 1,
                    CompressionLevel::Normal => {
                        self.stats.blocks_compressed_normal += 1
                    }
                }
                debug!(cache = self.name, block = block.0, ?level, size, "block compressed");
            }
            None => {
                self.blocks.set(block, BlockState::Uncompressed);
                if let Some(entry) = self.write_queue.get_mut(slot) {
                    entry.size = self.cfg.block_size;
                }
                self.stats.blocks_uncompressed += 1;
                debug!(cache = self.name, block = block.0, "block stored uncompressed");
            }
        }

        self.compress_cycles = self.cfg.compress_latency;
        self.compressing_slot = Some(slot);
        if let Some(entry) = self.write_queue.get_mut(slot) {
            entry.stage = WriteStage::Compressing;
        }
    }

    /// Issues the next memory write: save-state traffic first, otherwise the
    /// oldest compressed spill. Writes occupy the data bus immediately.
    fn issue_write_back(&mut self) {
        if self.next_transaction.is_some() {
            return;
        }

        if self.save_mode && self.save_written < self.save_encoded {
            if !(self.bus_free()
                && self.tickets.available()
                && self.memory_state.contains(MemState::WRITE_ACCEPT))
            {
                self.stats.memory_stall_cycles += 1;
                return;
            }
            let size = self
                .cfg
                .max_transaction
                .min(self.save_encoded - self.save_written);
            let Some(ticket) = self.tickets.take(TicketTarget::Write) else {
                return;
            };
            let start = self.save_written as usize;
            self.next_transaction = Some(MemoryTransaction::Write {
                address: self.state_addr + self.save_written,
                data: self.save_buf[start..start + size as usize].to_vec(),
                ticket,
                cache_id: self.cache_id,
                source: None,
            });
            self.save_written += size;
            self.active_write = Some((ticket, WriteTarget::StateSave));
            self.memory_write = true;
            self.memory_cycles = self.bus_cost(size);
            self.stats.write_transactions += 1;
            return;
        }

        let Some(slot) = self
            .write_queue
            .find_front(|w| w.stage == WriteStage::WritingBack)
        else {
            return;
        };
        if !(self.bus_free()
            && self.tickets.available()
            && self.memory_state.contains(MemState::WRITE_ACCEPT))
        {
            self.stats.memory_stall_cycles += 1;
            return;
        }
        let Some(ticket) = self.tickets.take(TicketTarget::Write) else {
            return;
        };
        let transaction = {
            let Some(entry) = self.write_queue.get_mut(slot) else {
                self.tickets.release(ticket);
                return;
            };
            let size = self.cfg.max_transaction.min(entry.size - entry.written);
            let start = entry.written as usize;
            let data = entry.buf[start..start + size as usize].to_vec();
            let address = entry.address + entry.written;
            entry.written += size;
            if entry.masked {
                MemoryTransaction::MaskedWrite {
                    address,
                    data,
                    mask: entry.mask[start / 4..(start + size as usize) / 4].to_vec(),
                    ticket,
                    cache_id: self.cache_id,
                    source: entry.source,
                }
            } else {
                MemoryTransaction::Write {
                    address,
                    data,
                    ticket,
                    cache_id: self.cache_id,
                    source: entry.source,
                }
            }
        };
        let size = transaction.size();
        self.next_transaction = Some(transaction);
        self.active_write = Some((ticket, WriteTarget::Queue(slot)));
        self.memory_write = true;
        self.memory_cycles = self.bus_cost(size);
        self.stats.write_transactions += 1;
    }

    /// Writes the oldest decompressed fill into its reserved line through a
    /// write port, unless the line still awaits its paired spill drain.
    fn issue_line_fill(&mut self) {
        if self.filling_line.is_some() {
            return;
        }
        let Some(slot) = self.read_queue.find_front(|r| r.stage == ReadStage::Ready) else {
            return;
        };
        let (handle, write_wait) = {
            let Some(entry) = self.read_queue.get(slot) else {
                return;
            };
            (entry.handle, entry.write_wait)
        };
        if write_wait {
            return;
        }
        let Some(port) = free_port(&self.write_port_cycles) else {
            self.stats.write_port_stall_cycles += 1;
            return;
        };
        let ok = {
            let Some(entry) = self.read_queue.get(slot) else {
                return;
            };
            self.storage.write_line(handle, &entry.buf)
        };
        if !ok {
            return;
        }
        self.write_port_cycles[port] += self.port_cost(self.cfg.block_size);
        self.filling_line = Some((port, slot));
        if let Some(entry) = self.read_queue.get_mut(slot) {
            entry.stage = ReadStage::Filling;
        }
    }

    /// One-line-per-item dump of the engine's stall-relevant state, for
    /// diagnosing a wedged pipeline.
    pub fn stall_report(&self, cycle: u64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} stall report @ cycle {cycle}", self.name);
        let _ = writeln!(
            out,
            "  buffer {:#010x} state buffer {:#010x} compression {} bytes/pixel {} msaa {}",
            self.buffer_addr, self.state_addr, self.compression, self.bytes_pixel, self.msaa_samples
        );
        let _ = writeln!(
            out,
            "  read queue {}/{} write queue {}/{} pending request {}",
            self.read_queue.len(),
            self.read_queue.capacity(),
            self.write_queue.len(),
            self.write_queue.capacity(),
            self.pending_request.is_some(),
        );
        for (_, entry) in self.read_queue.iter() {
            let _ = writeln!(
                out,
                "    fill block {} stage {:?} size {} requested {} received {} write_wait {}",
                entry.block, entry.stage, entry.size, entry.requested, entry.received,
                entry.write_wait
            );
        }
        for (_, entry) in self.write_queue.iter() {
            let _ = writeln!(
                out,
                "    spill block {} (fb {}) stage {:?} size {} written {} masked {}",
                entry.block, entry.block_fb, entry.stage, entry.size, entry.written, entry.masked
            );
        }
        let _ = writeln!(
            out,
            "  bus cycles {} read {} write {} ports r{:?} w{:?}",
            self.memory_cycles,
            self.memory_read,
            self.memory_write,
            self.read_port_cycles,
            self.write_port_cycles,
        );
        let _ = writeln!(
            out,
            "  modes flush {} clear {} save {} restore {} reset-state {}",
            self.flush_mode, self.clear_mode, self.save_mode, self.restore_mode,
            self.reset_state_mode,
        );
        out
    }
}
