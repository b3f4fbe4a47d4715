//! Pipelined ROP (render output) block cache with transparent compression.
//!
//! This crate models the memory-side cache a GPU's blend and depth/stencil
//! stages sit behind: pixel blocks move between the pipeline and simulated
//! video memory through a small associative line store, and every block is
//! transparently compressed on eviction and decompressed on fill to model the
//! bandwidth savings of real hardware.
//!
//! The pieces:
//!
//! - [`RopCache`]: the generic engine. Per-block compression state, bounded
//!   read/write request queues with read-after-write hazard detection, port
//!   and bus timing, fixed-latency compressor/decompressor slots, and the
//!   paced bulk operations (clear, save/restore/reset of the block-state
//!   table). Everything advances one step per [`RopCache::update`] call; all
//!   resource shortages are retryable backpressure, never errors.
//! - [`LineStorage`]: the external associative line-store the engine drives;
//!   implementations own way/line allocation and raw bytes.
//! - [`MemoryTransaction`]/[`ReadData`]/[`MemState`]: the memory-controller
//!   boundary.
//! - [`ColorCache`] / [`DepthStencilCache`]: the two concrete
//!   parameterizations (pixel format, clear-value encoding, codec variant,
//!   hierarchical-Z summary). They add no protocol of their own.

mod block;
mod codec;
mod color;
mod config;
mod depth;
mod engine;
mod error;
mod memory;
mod queue;
mod stats;
mod storage;

pub use block::{BlockIndex, BlockState, BlockStateTable};
pub use codec::BlockCodec;
pub use color::{ColorBlockCodec, ColorCache};
pub use config::{ConfigError, RopCacheConfig};
pub use depth::{DepthBlockCodec, DepthStencilCache};
pub use engine::{RopCache, WrittenBlock};
pub use error::ProtocolError;
pub use memory::{MemState, MemoryTransaction, ReadData, Ticket};
pub use stats::RopCacheStats;
pub use storage::{CacheRequest, LineHandle, LineStorage, RequestId};

pub use ropsim_hilo::CompressionLevel;
