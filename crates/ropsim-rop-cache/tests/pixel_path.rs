//! End-to-end pixel path: addresses produced by the tiled pixel mapper are
//! written through the color cache, spilled, and read back intact.

mod common;

use common::{step_until, TestLineStore, TestMemory};
use ropsim_rop_cache::{ColorCache, RopCacheConfig};
use ropsim_tiling::{PixelMapper, TilingConfig};

#[test]
fn mapped_pixels_survive_spill_and_refetch() {
    let tiling = TilingConfig {
        width: 32,
        height: 32,
        samples: 1,
        bytes_per_sample: 4,
        stamp_w: 2,
        stamp_h: 2,
        gen_w: 2,
        gen_h: 2,
        scan_w: 2,
        scan_h: 2,
        over_w: 2,
        over_h: 2,
    };
    let mapper = PixelMapper::new(tiling, 1).unwrap();

    let cfg = RopCacheConfig {
        block_size: 256,
        max_blocks: mapper.frame_buffer_size() / 256,
        blocks_per_cycle: 8,
        ..RopCacheConfig::default()
    };
    let store = TestLineStore::new(2, 2, 256, 8);
    let mut mem = TestMemory::new(mapper.frame_buffer_size() as usize, 4, 8);
    let mut cache = ColorCache::new(cfg, store, 0).unwrap();
    let mut cycle = 0u64;

    // A scatter of pixels across tiles; each gets a distinct color.
    let pixels = [(0u32, 0u32), (3, 1), (7, 6), (8, 0), (15, 15), (16, 17), (31, 31), (20, 5)];
    let color_of = |i: usize| [(i as u8 + 1) * 9, 0x40, i as u8, 0xFF];

    for (i, &(x, y)) in pixels.iter().enumerate() {
        let address = mapper.compute_address(x, y);
        assert!(address + 4 <= mapper.frame_buffer_size());

        let mut handle = None;
        step_until(&mut cycle, cache.inner_mut(), &mut mem, 256, |e| {
            handle = e.allocate(address, None).unwrap();
            handle.is_some()
        });
        let color = color_of(i);
        step_until(&mut cycle, cache.inner_mut(), &mut mem, 256, |e| {
            e.write(address, handle.unwrap(), 4, &color)
        });
    }

    // Push everything to memory, then drop the cached lines.
    step_until(&mut cycle, cache.inner_mut(), &mut mem, 4096, |e| e.flush());
    cache.inner_mut().reset().unwrap();

    for (i, &(x, y)) in pixels.iter().enumerate() {
        let address = mapper.compute_address(x, y);
        let mut handle = None;
        step_until(&mut cycle, cache.inner_mut(), &mut mem, 512, |e| {
            handle = e.fetch(address, None).unwrap();
            handle.is_some()
        });
        let mut readback = [0u8; 4];
        step_until(&mut cycle, cache.inner_mut(), &mut mem, 1024, |e| {
            e.read(address, handle.unwrap(), 4, &mut readback)
        });
        assert_eq!(readback, color_of(i), "pixel ({x}, {y})");
        cache.inner_mut().unreserve(handle.unwrap());
    }
}
