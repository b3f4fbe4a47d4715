mod common;

use common::{step_until, TestLineStore, TestMemory};
use pretty_assertions::assert_eq;
use ropsim_rop_cache::{
    BlockState, ColorBlockCodec, CompressionLevel, RopCache, RopCacheConfig,
};

const STATE_ADDR: u32 = 0x8000;

fn config() -> RopCacheConfig {
    RopCacheConfig {
        max_blocks: 32,
        blocks_per_cycle: 4,
        ..RopCacheConfig::default()
    }
}

fn new_engine(cfg: &RopCacheConfig) -> RopCache<ColorBlockCodec, TestLineStore> {
    let codec = ColorBlockCodec::new(64).unwrap();
    let store = TestLineStore::new(1, 2, 256, 8);
    let mut engine = RopCache::new(cfg.clone(), codec, store, 0, "color-cache", &[0u8; 4]).unwrap();
    engine.set_state_address(STATE_ADDR);
    engine
}

/// Every state tag, mixed across the table, through encode + paced save to
/// memory + paced restore into a fresh engine, bit-for-bit.
#[test]
fn saved_state_restores_bit_exact() {
    let cfg = config();
    let mut mem = TestMemory::new(64 * 1024, 4, 8);
    let mut source = new_engine(&cfg);
    let mut cycle = 0u64;

    // Mixed pattern of all four persisted states.
    let pattern: Vec<u8> = (0..cfg.max_blocks)
        .map(|i| [0x00u8, 0x01, 0x02, 0x06][(i % 4) as usize])
        .collect();
    source
        .decode_and_fill_blocks(&pattern, cfg.max_blocks)
        .unwrap();

    let start = cycle;
    step_until(&mut cycle, &mut source, &mut mem, 1024, |e| e.save_state());
    let elapsed = cycle - start;
    let floor = cfg.max_blocks.div_ceil(cfg.blocks_per_cycle) as u64;
    assert!(
        elapsed >= floor,
        "save took {elapsed} cycles, paced floor is {floor}"
    );

    // The persisted image in memory matches the encoding exactly.
    let persisted = &mem.mem[STATE_ADDR as usize..(STATE_ADDR + cfg.max_blocks) as usize];
    assert_eq!(persisted, pattern.as_slice());

    let mut restored = new_engine(&cfg);
    let start = cycle;
    step_until(&mut cycle, &mut restored, &mut mem, 1024, |e| {
        e.restore_state()
    });
    assert!(cycle - start >= floor);

    let mut want = vec![BlockState::Clear; cfg.max_blocks as usize];
    let mut got = want.clone();
    source.copy_block_state(&mut want).unwrap();
    restored.copy_block_state(&mut got).unwrap();
    assert_eq!(want, got);
    assert_eq!(
        source.encode_blocks(cfg.max_blocks).unwrap(),
        restored.encode_blocks(cfg.max_blocks).unwrap()
    );
}

/// `reset_state` forces the whole table to `Uncompressed`, paced at the
/// configured rate.
#[test]
fn reset_state_is_paced_and_complete() {
    let cfg = config();
    let mut mem = TestMemory::new(64 * 1024, 4, 8);
    let mut engine = new_engine(&cfg);
    let mut cycle = 0u64;

    let pattern: Vec<u8> = (0..cfg.max_blocks)
        .map(|i| if i % 2 == 0 { 0x02 } else { 0x00 })
        .collect();
    engine
        .decode_and_fill_blocks(&pattern, cfg.max_blocks)
        .unwrap();
    assert_eq!(
        engine.block_state(ropsim_rop_cache::BlockIndex(0)),
        BlockState::Compressed(CompressionLevel::Best)
    );

    let start = cycle;
    step_until(&mut cycle, &mut engine, &mut mem, 256, |e| e.reset_state());
    let floor = cfg.max_blocks.div_ceil(cfg.blocks_per_cycle) as u64;
    assert!(cycle - start >= floor);

    let mut got = vec![BlockState::Clear; cfg.max_blocks as usize];
    engine.copy_block_state(&mut got).unwrap();
    assert!(got.iter().all(|&s| s == BlockState::Uncompressed));
}
