use thiserror::Error;

/// Invalid construction parameters. These indicate a caller bug and are
/// rejected before the engine exists; there is no runtime recovery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("block size {0} must be a power of two")]
    BlockSizeNotPowerOfTwo(u32),

    #[error("block size {0} must cover at least one 32-bit sample")]
    BlockSizeTooSmall(u32),

    #[error("max transaction size {max_transaction} must be a power of two no larger than the block size {block_size}")]
    InvalidTransactionSize {
        max_transaction: u32,
        block_size: u32,
    },

    #[error("codec rejected the block configuration: {0}")]
    Codec(#[from] ropsim_hilo::HiloError),
}

/// Construction-time parameters of a ROP cache engine.
///
/// Set once per cache instance; resolution/format changes go through the
/// engine's register interface, not through reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RopCacheConfig {
    /// Uncompressed block (= cache line) size in bytes.
    pub block_size: u32,
    pub read_ports: u32,
    pub write_ports: u32,
    /// Bytes a port moves per cycle.
    pub port_width: u32,
    /// Read (fill) request queue depth.
    pub input_queue: usize,
    /// Write (spill) request queue depth.
    pub output_queue: usize,
    /// Forces every spill to be stored uncompressed.
    pub disable_compression: bool,
    /// Cycles to compress one block.
    pub compress_latency: u32,
    /// Cycles to decompress one block.
    pub decompress_latency: u32,
    /// Stamp units sharing the framebuffer; blocks are distributed across
    /// them in runs of `stamp_unit_stride`.
    pub num_stamp_units: u32,
    pub stamp_unit_stride: u32,
    /// Block-state table entries (sized for the largest supported
    /// resolution).
    pub max_blocks: u32,
    /// Block-state entries modified per cycle by the paced bulk operations.
    pub blocks_per_cycle: u32,
    /// Memory ticket pool size (bound on in-flight transactions).
    pub tickets: u32,
    /// Largest single memory transaction in bytes.
    pub max_transaction: u32,
    /// Memory data bus throughput used to time write transactions.
    pub bus_bytes_per_cycle: u32,
}

impl Default for RopCacheConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            read_ports: 2,
            write_ports: 2,
            port_width: 64,
            input_queue: 8,
            output_queue: 8,
            disable_compression: false,
            compress_latency: 2,
            decompress_latency: 2,
            num_stamp_units: 1,
            stamp_unit_stride: 1,
            max_blocks: 4096,
            blocks_per_cycle: 256,
            tickets: 16,
            max_transaction: 64,
            bus_bytes_per_cycle: 8,
        }
    }
}

impl RopCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, name) in [
            (self.block_size, "block size"),
            (self.read_ports, "read port count"),
            (self.write_ports, "write port count"),
            (self.port_width, "port width"),
            (self.input_queue as u32, "input queue depth"),
            (self.output_queue as u32, "output queue depth"),
            (self.compress_latency, "compression latency"),
            (self.decompress_latency, "decompression latency"),
            (self.num_stamp_units, "stamp unit count"),
            (self.stamp_unit_stride, "stamp unit stride"),
            (self.max_blocks, "block state table size"),
            (self.blocks_per_cycle, "blocks per cycle"),
            (self.tickets, "ticket pool size"),
            (self.max_transaction, "max transaction size"),
            (self.bus_bytes_per_cycle, "bus width"),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if !self.block_size.is_power_of_two() {
            return Err(ConfigError::BlockSizeNotPowerOfTwo(self.block_size));
        }
        if self.block_size < 4 {
            return Err(ConfigError::BlockSizeTooSmall(self.block_size));
        }
        if !self.max_transaction.is_power_of_two()
            || self.max_transaction < 4
            || self.max_transaction > self.block_size
        {
            return Err(ConfigError::InvalidTransactionSize {
                max_transaction: self.max_transaction,
                block_size: self.block_size,
            });
        }
        Ok(())
    }

    /// Bits to shift a buffer-relative byte address to get its block index.
    pub fn block_shift(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    pub(crate) fn words_per_block(&self) -> usize {
        (self.block_size / 4) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RopCacheConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_configs() {
        let mut cfg = RopCacheConfig::default();
        cfg.read_ports = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("read port count")));

        let mut cfg = RopCacheConfig::default();
        cfg.block_size = 192;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::BlockSizeNotPowerOfTwo(192))
        );

        let mut cfg = RopCacheConfig::default();
        cfg.max_transaction = 512;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidTransactionSize { .. })
        ));
    }
}
