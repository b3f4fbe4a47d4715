/// Way/line coordinates of a reserved cache line in the line store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineHandle {
    pub way: u32,
    pub line: u32,
}

/// Identifier of a pending line-store request, echoed back on completion via
/// [`LineStorage::free_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

/// A line-store miss/eviction decision the engine must service: fill the
/// line from memory, write the evicted line back, or both (a replacement of
/// a dirty line).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRequest {
    /// Address the line must be filled from (valid when `fill`).
    pub fill_address: u32,
    /// Address the evicted line must be spilled to (valid when `spill`).
    pub spill_address: u32,
    pub handle: LineHandle,
    pub spill: bool,
    pub fill: bool,
    /// The evicted line was only partially written (allocated without a
    /// read); its byte mask must accompany the spill.
    pub masked: bool,
    /// Trace tag of the access that caused the request.
    pub source: Option<u64>,
}

/// The external associative line-store primitive the ROP cache engine
/// drives.
///
/// The engine never inspects ways, tags or replacement policy; it only
/// reserves lines, moves bytes through them, and services the fill/spill
/// requests the store surfaces through [`LineStorage::next_request`].
///
/// Return-value convention: `Option`/`bool` failures are one-cycle
/// backpressure (no free line, data not arrived yet) and the engine retries;
/// operations on lines that were never reserved are protocol violations and
/// implementations are expected to fail loudly.
pub trait LineStorage {
    /// Reserves the line covering `address`, beginning a fill on a miss.
    /// `None` when no line can be reserved this cycle.
    fn fetch(&mut self, address: u32, source: Option<u64>) -> Option<LineHandle>;

    /// Like [`LineStorage::fetch`] but without reading the previous content
    /// from memory; the line is writable immediately and tracks a byte mask.
    fn allocate(&mut self, address: u32, source: Option<u64>) -> Option<LineHandle>;

    /// Copies `size` bytes at `address` out of a fetched line. `false` until
    /// the line's data has arrived.
    fn read(&mut self, address: u32, handle: LineHandle, size: u32, out: &mut [u8]) -> bool;

    /// Writes `size` bytes into the line and releases one reservation.
    fn write(&mut self, address: u32, handle: LineHandle, size: u32, data: &[u8]) -> bool;

    /// Byte-masked variant of [`LineStorage::write`].
    fn write_masked(
        &mut self,
        address: u32,
        handle: LineHandle,
        size: u32,
        data: &[u8],
        mask: &[bool],
    ) -> bool;

    /// Reads a whole line (spill drain path).
    fn read_line(&mut self, handle: LineHandle, out: &mut [u8]) -> bool;

    /// Fills a whole line (fill completion path).
    fn write_line(&mut self, handle: LineHandle, data: &[u8]) -> bool;

    /// Copies the line's byte-lane write mask, one word per 32-bit data word.
    fn read_mask(&mut self, handle: LineHandle, out: &mut [u32]);

    /// Releases a reservation without transferring data.
    fn unreserve(&mut self, handle: LineHandle);

    /// Advances write-back of all valid lines; `true` once everything is
    /// clean and no requests remain outstanding.
    fn flush(&mut self) -> bool;

    fn reset(&mut self);

    /// Surfaces the next pending fill/spill request, if any.
    fn next_request(&mut self) -> Option<(RequestId, CacheRequest)>;

    /// Reports a request finished: its spill was written to memory and/or
    /// its fill data landed in the line.
    fn free_request(&mut self, id: RequestId, spill_done: bool, fill_done: bool);
}
