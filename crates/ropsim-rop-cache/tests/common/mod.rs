//! Functional collaborator doubles for engine tests: a small set-associative
//! line store implementing [`LineStorage`] and a scripted memory controller.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use ropsim_rop_cache::{
    BlockCodec, CacheRequest, LineHandle, LineStorage, MemState, MemoryTransaction, ReadData,
    RequestId, RopCache,
};
use std::collections::VecDeque;

#[derive(Clone)]
struct Line {
    /// Base address of the resident block, if any.
    tag: Option<u32>,
    reserved: u32,
    /// Data valid: filled from memory, written whole, or freshly allocated.
    ready: bool,
    dirty: bool,
    /// Allocated without a read; `mask` tracks which bytes were written.
    masked: bool,
    pending_fill: bool,
    pending_spill: bool,
    /// Becomes a fresh allocation once its old content is drained.
    allocate_after_drain: bool,
    data: Vec<u8>,
    mask: Vec<bool>,
    /// Old byte mask latched at drain time for `read_mask`.
    drained_mask: Option<Vec<bool>>,
}

impl Line {
    fn new(line_size: usize) -> Self {
        Self {
            tag: None,
            reserved: 0,
            ready: false,
            dirty: false,
            masked: false,
            pending_fill: false,
            pending_spill: false,
            allocate_after_drain: false,
            data: vec![0; line_size],
            mask: vec![false; line_size],
            drained_mask: None,
        }
    }

    fn replacing(&self) -> bool {
        self.pending_fill || self.pending_spill
    }
}

struct Pending {
    request: CacheRequest,
    spill_outstanding: bool,
    fill_outstanding: bool,
}

/// Set-associative line store: set index is derived from the block address,
/// ways are searched linearly. Misses surface fill/spill requests through
/// `next_request` exactly like the modeled fetch cache.
pub struct TestLineStore {
    ways: usize,
    sets: usize,
    line_size: usize,
    lines: Vec<Vec<Line>>,
    requests: Vec<Option<Pending>>,
    handed: VecDeque<u32>,
}

impl TestLineStore {
    pub fn new(ways: usize, sets: usize, line_size: usize, request_slots: usize) -> Self {
        Self {
            ways,
            sets,
            line_size,
            lines: vec![vec![Line::new(line_size); sets]; ways],
            requests: (0..request_slots).map(|_| None).collect(),
            handed: VecDeque::new(),
        }
    }

    fn base(&self, address: u32) -> u32 {
        address & !(self.line_size as u32 - 1)
    }

    fn set_of(&self, base: u32) -> usize {
        (base as usize / self.line_size) % self.sets
    }

    fn line(&mut self, handle: LineHandle) -> &mut Line {
        &mut self.lines[handle.way as usize][handle.line as usize]
    }

    fn alloc_request(&mut self, request: CacheRequest) -> Option<RequestId> {
        let slot = self.requests.iter().position(|r| r.is_none())?;
        self.requests[slot] = Some(Pending {
            spill_outstanding: request.spill,
            fill_outstanding: request.fill,
            request,
        });
        self.handed.push_back(slot as u32);
        Some(RequestId(slot as u32))
    }

    /// Miss path shared by fetch and allocate.
    fn replace(&mut self, base: u32, fill: bool, source: Option<u64>) -> Option<LineHandle> {
        let set = self.set_of(base);
        let way = (0..self.ways).find(|&w| {
            let line = &self.lines[w][set];
            line.reserved == 0 && !line.replacing()
        })?;
        let handle = LineHandle {
            way: way as u32,
            line: set as u32,
        };

        let (spill, spill_address, spill_masked) = {
            let line = &self.lines[way][set];
            match line.tag {
                Some(tag) if line.dirty => (true, tag, line.masked),
                _ => (false, 0, false),
            }
        };

        if spill || fill {
            let request = CacheRequest {
                fill_address: base,
                spill_address,
                handle,
                spill,
                fill,
                masked: spill_masked,
                source,
            };
            self.alloc_request(request)?;
        }

        {
            let line = &mut self.lines[way][set];
            line.tag = Some(base);
            line.reserved = 1;
            line.ready = false;
            line.dirty = false;
            line.pending_fill = fill;
            line.pending_spill = spill;
            line.allocate_after_drain = !fill;
            line.drained_mask = None;
        }
        if !fill && !spill {
            // Clean allocate: writable immediately, tracking a byte mask.
            self.finish_allocate(handle);
        }
        Some(handle)
    }

    fn finish_allocate(&mut self, handle: LineHandle) {
        let line = self.line(handle);
        line.ready = true;
        line.masked = true;
        line.allocate_after_drain = false;
        line.data.fill(0);
        line.mask.fill(false);
    }
}

impl LineStorage for TestLineStore {
    fn fetch(&mut self, address: u32, source: Option<u64>) -> Option<LineHandle> {
        let base = self.base(address);
        let set = self.set_of(base);
        for way in 0..self.ways {
            if self.lines[way][set].tag == Some(base) {
                self.lines[way][set].reserved += 1;
                return Some(LineHandle {
                    way: way as u32,
                    line: set as u32,
                });
            }
        }
        self.replace(base, true, source)
    }

    fn allocate(&mut self, address: u32, source: Option<u64>) -> Option<LineHandle> {
        let base = self.base(address);
        let set = self.set_of(base);
        for way in 0..self.ways {
            if self.lines[way][set].tag == Some(base) {
                self.lines[way][set].reserved += 1;
                return Some(LineHandle {
                    way: way as u32,
                    line: set as u32,
                });
            }
        }
        self.replace(base, false, source)
    }

    fn read(&mut self, address: u32, handle: LineHandle, size: u32, out: &mut [u8]) -> bool {
        let base = self.base(address);
        let line = self.line(handle);
        assert_eq!(line.tag, Some(base), "read of a line never fetched");
        if !line.ready {
            return false;
        }
        let offset = (address - base) as usize;
        out[..size as usize].copy_from_slice(&line.data[offset..offset + size as usize]);
        true
    }

    fn write(&mut self, address: u32, handle: LineHandle, size: u32, data: &[u8]) -> bool {
        let base = self.base(address);
        let line = self.line(handle);
        assert_eq!(line.tag, Some(base), "write of a line never fetched");
        if !line.ready {
            return false;
        }
        let offset = (address - base) as usize;
        line.data[offset..offset + size as usize].copy_from_slice(&data[..size as usize]);
        line.mask[offset..offset + size as usize].fill(true);
        line.dirty = true;
        line.reserved = line.reserved.saturating_sub(1);
        true
    }

    fn write_masked(
        &mut self,
        address: u32,
        handle: LineHandle,
        size: u32,
        data: &[u8],
        mask: &[bool],
    ) -> bool {
        let base = self.base(address);
        let line = self.line(handle);
        assert_eq!(line.tag, Some(base), "write of a line never fetched");
        if !line.ready {
            return false;
        }
        let offset = (address - base) as usize;
        for i in 0..size as usize {
            if mask[i] {
                line.data[offset + i] = data[i];
                line.mask[offset + i] = true;
            }
        }
        line.dirty = true;
        line.reserved = line.reserved.saturating_sub(1);
        true
    }

    fn read_line(&mut self, handle: LineHandle, out: &mut [u8]) -> bool {
        let (drained_spill, allocate_after_drain, pending_fill) = {
            let line = self.line(handle);
            out.copy_from_slice(&line.data);
            let drained = line.pending_spill;
            if drained {
                line.drained_mask = Some(line.mask.clone());
                line.pending_spill = false;
            }
            (drained, line.allocate_after_drain, line.pending_fill)
        };
        if drained_spill {
            if allocate_after_drain {
                self.finish_allocate(handle);
            } else if !pending_fill {
                // Flush write-back: the line stays resident and clean.
                self.line(handle).dirty = false;
            }
        }
        true
    }

    fn write_line(&mut self, handle: LineHandle, data: &[u8]) -> bool {
        let line = self.line(handle);
        assert!(
            !line.pending_spill,
            "line filled before its spill was drained"
        );
        line.data.copy_from_slice(data);
        line.ready = true;
        line.masked = false;
        line.mask.fill(false);
        line.pending_fill = false;
        true
    }

    fn read_mask(&mut self, handle: LineHandle, out: &mut [u32]) {
        let line = self.line(handle);
        let mask = line.drained_mask.as_ref().unwrap_or(&line.mask);
        for (w, word) in out.iter_mut().enumerate() {
            *word = 0;
            for byte in 0..4 {
                if mask[w * 4 + byte] {
                    *word |= 0xFF << (8 * byte);
                }
            }
        }
    }

    fn unreserve(&mut self, handle: LineHandle) {
        let line = self.line(handle);
        line.reserved = line.reserved.saturating_sub(1);
    }

    fn flush(&mut self) -> bool {
        for way in 0..self.ways {
            for set in 0..self.sets {
                let line = &self.lines[way][set];
                if !(line.dirty && line.reserved == 0 && !line.replacing()) {
                    continue;
                }
                let Some(tag) = line.tag else { continue };
                let request = CacheRequest {
                    fill_address: 0,
                    spill_address: tag,
                    handle: LineHandle {
                        way: way as u32,
                        line: set as u32,
                    },
                    spill: true,
                    fill: false,
                    masked: line.masked,
                    source: None,
                };
                if self.alloc_request(request).is_some() {
                    self.lines[way][set].pending_spill = true;
                }
            }
        }
        let clean = self
            .lines
            .iter()
            .flatten()
            .all(|l| !l.dirty && !l.replacing());
        clean && self.requests.iter().all(|r| r.is_none()) && self.handed.is_empty()
    }

    fn reset(&mut self) {
        for line in self.lines.iter_mut().flatten() {
            *line = Line::new(self.line_size);
        }
        self.requests.iter_mut().for_each(|r| *r = None);
        self.handed.clear();
    }

    fn next_request(&mut self) -> Option<(RequestId, CacheRequest)> {
        let slot = self.handed.pop_front()?;
        let pending = self.requests[slot as usize]
            .as_ref()
            .expect("handed request must exist");
        Some((RequestId(slot), pending.request))
    }

    fn free_request(&mut self, id: RequestId, spill_done: bool, fill_done: bool) {
        let slot = self.requests[id.0 as usize]
            .as_mut()
            .expect("freeing an unknown request");
        if spill_done {
            slot.spill_outstanding = false;
        }
        if fill_done {
            slot.fill_outstanding = false;
        }
        if !slot.spill_outstanding && !slot.fill_outstanding {
            self.requests[id.0 as usize] = None;
        }
    }
}

/// One applied or issued memory operation, for ordering assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Read { address: u32, size: u32 },
    Write { address: u32, size: u32, masked: bool },
}

/// Scripted memory controller: applies writes immediately, answers reads
/// after a fixed latency, in order, and logs every operation.
pub struct TestMemory {
    pub mem: Vec<u8>,
    pub read_latency: u64,
    pub bus_bytes_per_cycle: u32,
    pub accept_reads: bool,
    pub accept_writes: bool,
    pub log: Vec<MemOp>,
    inflight: VecDeque<(u64, ReadData)>,
}

impl TestMemory {
    pub fn new(size: usize, read_latency: u64, bus_bytes_per_cycle: u32) -> Self {
        Self {
            mem: vec![0; size],
            read_latency,
            bus_bytes_per_cycle,
            accept_reads: true,
            accept_writes: true,
            log: Vec::new(),
            inflight: VecDeque::new(),
        }
    }

    pub fn state(&self) -> MemState {
        let mut state = MemState::empty();
        if self.accept_reads {
            state |= MemState::READ_ACCEPT;
        }
        if self.accept_writes {
            state |= MemState::WRITE_ACCEPT;
        }
        state
    }

    pub fn submit(&mut self, now: u64, transaction: MemoryTransaction) {
        match transaction {
            MemoryTransaction::ReadRequest {
                address,
                size,
                ticket,
                ..
            } => {
                assert!(self.accept_reads, "read submitted while not accepted");
                self.log.push(MemOp::Read { address, size });
                let start = address as usize;
                let data = self.mem[start..start + size as usize].to_vec();
                let bus_cycles = size.div_ceil(self.bus_bytes_per_cycle);
                self.inflight.push_back((
                    now + self.read_latency,
                    ReadData {
                        ticket,
                        data,
                        bus_cycles,
                    },
                ));
            }
            MemoryTransaction::Write { address, data, .. } => {
                assert!(self.accept_writes, "write submitted while not accepted");
                self.log.push(MemOp::Write {
                    address,
                    size: data.len() as u32,
                    masked: false,
                });
                let start = address as usize;
                self.mem[start..start + data.len()].copy_from_slice(&data);
            }
            MemoryTransaction::MaskedWrite {
                address,
                data,
                mask,
                ..
            } => {
                assert!(self.accept_writes, "write submitted while not accepted");
                self.log.push(MemOp::Write {
                    address,
                    size: data.len() as u32,
                    masked: true,
                });
                let start = address as usize;
                for (i, byte) in data.iter().enumerate() {
                    let lane = (mask[i / 4] >> (8 * (i % 4))) & 0xFF;
                    if lane != 0 {
                        self.mem[start + i] = *byte;
                    }
                }
            }
        }
    }

    pub fn pop_ready(&mut self, now: u64) -> Option<ReadData> {
        if self.inflight.front().is_some_and(|(at, _)| *at <= now) {
            self.inflight.pop_front().map(|(_, data)| data)
        } else {
            None
        }
    }

    /// Writes seen for the block at `address`, in log order.
    pub fn ops_touching(&self, address: u32, size: u32) -> Vec<(usize, MemOp)> {
        self.log
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, op)| {
                let (start, len) = match *op {
                    MemOp::Read { address, size } => (address, size),
                    MemOp::Write { address, size, .. } => (address, size),
                };
                start < address + size && address < start + len
            })
            .collect()
    }
}

/// Advances one simulated cycle: deliver at most one pending read reply,
/// clock the engine, forward its transaction to memory.
pub fn step<C: BlockCodec, S: LineStorage>(
    cycle: &mut u64,
    engine: &mut RopCache<C, S>,
    mem: &mut TestMemory,
) {
    if !engine.data_bus_busy() {
        if let Some(reply) = mem.pop_ready(*cycle) {
            engine.process_read_data(reply).expect("read data rejected");
        }
    }
    let transaction = engine
        .update(*cycle, mem.state())
        .expect("protocol violation");
    if let Some(transaction) = transaction {
        mem.submit(*cycle, transaction);
    }
    *cycle += 1;
}

/// Steps until `cond` holds, failing the test after `limit` cycles.
pub fn step_until<C: BlockCodec, S: LineStorage>(
    cycle: &mut u64,
    engine: &mut RopCache<C, S>,
    mem: &mut TestMemory,
    limit: u64,
    mut cond: impl FnMut(&mut RopCache<C, S>) -> bool,
) {
    let deadline = *cycle + limit;
    while !cond(engine) {
        assert!(
            *cycle < deadline,
            "condition not reached in {limit} cycles:\n{}",
            engine.stall_report(*cycle)
        );
        step(cycle, engine, mem);
    }
}
