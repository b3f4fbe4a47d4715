use crate::queue::SlotId;
use bitflags::bitflags;

bitflags! {
    /// Per-cycle memory-controller availability, sampled by the engine at
    /// every [`crate::RopCache::update`] call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemState: u32 {
        /// The controller accepts read requests this cycle.
        const READ_ACCEPT = 1 << 0;
        /// The controller accepts write data this cycle.
        const WRITE_ACCEPT = 1 << 1;
    }
}

/// Identifier correlating an outstanding memory transaction with its
/// originator. Tickets come from a small bounded pool; running out is
/// ordinary backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub u32);

/// Outbound transaction from the cache to the memory controller.
///
/// Transactions never exceed the configured maximum transaction size; larger
/// block transfers are streamed as several transactions under one queue
/// entry. `source` is an optional caller-supplied trace tag propagated from
/// the originating cache access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryTransaction {
    ReadRequest {
        address: u32,
        size: u32,
        ticket: Ticket,
        cache_id: u32,
        source: Option<u64>,
    },
    Write {
        address: u32,
        data: Vec<u8>,
        ticket: Ticket,
        cache_id: u32,
        source: Option<u64>,
    },
    /// Byte-masked write: `mask` holds one word per 32-bit data word, each
    /// byte lane `0xFF` (write) or `0x00` (preserve).
    MaskedWrite {
        address: u32,
        data: Vec<u8>,
        mask: Vec<u32>,
        ticket: Ticket,
        cache_id: u32,
        source: Option<u64>,
    },
}

impl MemoryTransaction {
    pub fn ticket(&self) -> Ticket {
        match self {
            MemoryTransaction::ReadRequest { ticket, .. }
            | MemoryTransaction::Write { ticket, .. }
            | MemoryTransaction::MaskedWrite { ticket, .. } => *ticket,
        }
    }

    pub fn address(&self) -> u32 {
        match self {
            MemoryTransaction::ReadRequest { address, .. }
            | MemoryTransaction::Write { address, .. }
            | MemoryTransaction::MaskedWrite { address, .. } => *address,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            MemoryTransaction::ReadRequest { size, .. } => *size,
            MemoryTransaction::Write { data, .. }
            | MemoryTransaction::MaskedWrite { data, .. } => data.len() as u32,
        }
    }
}

/// Inbound read completion: the data for an earlier
/// [`MemoryTransaction::ReadRequest`] identified by its ticket. The data bus
/// stays busy for `bus_cycles` cycles after arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadData {
    pub ticket: Ticket,
    pub data: Vec<u8>,
    pub bus_cycles: u32,
}

/// What an outstanding ticket is servicing. Read targets carry the byte
/// offset their data lands at, so replies stay correct even if the
/// controller completes transactions out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TicketTarget {
    /// A block read for a read-queue entry.
    ReadSlot { slot: SlotId, offset: u32 },
    /// A block-state buffer read for the restore-state machine.
    StateRestore { offset: u32 },
    /// A write transaction (block spill or state save).
    Write,
}

/// Bounded pool of memory tickets with the target each live ticket serves.
#[derive(Debug)]
pub(crate) struct TicketPool {
    free: Vec<u32>,
    targets: Vec<Option<TicketTarget>>,
}

impl TicketPool {
    pub fn new(count: u32) -> Self {
        Self {
            free: (0..count).rev().collect(),
            targets: vec![None; count as usize],
        }
    }

    pub fn available(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn take(&mut self, target: TicketTarget) -> Option<Ticket> {
        let id = self.free.pop()?;
        self.targets[id as usize] = Some(target);
        Some(Ticket(id))
    }

    pub fn target(&self, ticket: Ticket) -> Option<TicketTarget> {
        self.targets.get(ticket.0 as usize).copied().flatten()
    }

    pub fn release(&mut self, ticket: Ticket) {
        if let Some(slot) = self.targets.get_mut(ticket.0 as usize) {
            if slot.take().is_some() {
                self.free.push(ticket.0);
            }
        }
    }

    pub fn reset(&mut self) {
        let count = self.targets.len() as u32;
        self.free = (0..count).rev().collect();
        self.targets.iter_mut().for_each(|t| *t = None);
    }
}
