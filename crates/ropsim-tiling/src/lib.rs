//! Pixel-to-address and pixel-to-unit mapping for tiled framebuffers.
//!
//! The render-output path stores pixels in a hierarchy of nested tiles so that
//! spatially close pixels land in close memory addresses:
//!
//! - **over-scan tiles** cover the screen in row-major order,
//! - **scan tiles** inside an over-scan tile follow Morton (Z-order)
//!   interleave,
//! - **generation tiles**, **stamps** and finally **pixels** are row-major
//!   inside their parent level,
//! - samples of a multisampled pixel are stored contiguously.
//!
//! Multisampling (2x/4x/8x) and wide 8-byte sample formats subdivide the
//! over-scan tile into *scan sub-tiles* and shrink the generation tile so the
//! byte footprint of a generation tile stays constant. [`PixelMapper`] owns a
//! [`TilingConfig`] plus the precomputed extents and a 256-entry Morton
//! interleave table, and exposes the pure mapping functions used by the ROP
//! stages: pixel to byte address, pixel/address to owning processing unit,
//! and total framebuffer size.

use thiserror::Error;

/// Errors detecting an invalid tiling configuration.
///
/// All of these indicate a caller bug: tiling parameters are fixed hardware
/// shapes, not runtime inputs, so they are rejected at construction and never
/// at mapping time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TilingError {
    #[error("tile dimension {0} must be at least 1")]
    ZeroTileDimension(&'static str),

    #[error("resolution {0}x{1} must be non-zero")]
    ZeroResolution(u32, u32),

    #[error("bytes per sample must be non-zero")]
    ZeroSampleBytes,

    #[error("unsupported sample count {0} (supported: 1, 2, 4, 8)")]
    UnsupportedSampleCount(u32),

    #[error("generation tile {0}x{1} too small to subdivide for {2} samples")]
    GenTileTooSmall(u32, u32, u32),

    #[error("generation tile too shallow to subdivide for 8-byte samples")]
    GenTileTooShallowForWideSamples,

    #[error("over-scan tile {0}x{1} not mappable in Morton order (square power of two up to 256 required)")]
    MortonUnsupported(u32, u32),

    #[error("at least one processing unit required")]
    ZeroUnits,
}

/// Tiling shape of a framebuffer: resolution, sample layout and the
/// width/height of each nesting level, each expressed in units of the level
/// below it (over-scan tiles in scan tiles, scan tiles in generation tiles,
/// generation tiles in stamps, stamps in pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingConfig {
    pub width: u32,
    pub height: u32,
    /// Samples per pixel: 1, 2, 4 or 8.
    pub samples: u32,
    /// Bytes per sample (4 for RGBA8/D24S8, 8 for FP16 color).
    pub bytes_per_sample: u32,
    pub stamp_w: u32,
    pub stamp_h: u32,
    pub gen_w: u32,
    pub gen_h: u32,
    pub scan_w: u32,
    pub scan_h: u32,
    pub over_w: u32,
    pub over_h: u32,
}

/// Maps pixels to framebuffer byte addresses and owning processing units.
///
/// Built once per resolution/format change; all mapping functions are pure
/// and cheap (a handful of divisions and two table lookups).
#[derive(Debug)]
pub struct PixelMapper {
    cfg: TilingConfig,

    // Derived extents, precomputed at construction.
    over_tile_pixel_w: u32,
    over_tile_pixel_h: u32,
    over_tile_pixel_size: u32,
    over_tile_row_width: u32,
    over_tile_rows: u32,
    over_tile_size: u32,
    scan_tile_pixel_w: u32,
    scan_tile_pixel_h: u32,
    scan_tile_size: u32,

    // Scan sub-tile subdivision for multisampling / wide samples.
    scan_sub_tile_w: u32,
    scan_sub_tile_h: u32,
    scan_sub_tile_size: u32,
    scan_sub_tile_pixel_w: u32,
    scan_sub_tile_pixel_h: u32,
    scan_sub_tile_bytes: u32,

    // Generation tile adjusted for the sub-tile subdivision.
    gen_adj_w: u32,
    gen_adj_h: u32,
    gen_adj_size: u32,
    gen_adj_pixel_w: u32,
    gen_adj_pixel_h: u32,
    stamp_tile_size: u32,

    num_units: u32,

    /// Morton interleave of two 4-bit coordinate nibbles; index is
    /// `(y_nibble << 4) | x_nibble`.
    morton: [u16; 256],
}

impl PixelMapper {
    /// Validates `cfg` and precomputes the derived tile extents and the
    /// Morton table. `num_units` is the number of processing units pixels
    /// are distributed over.
    pub fn new(cfg: TilingConfig, num_units: u32) -> Result<Self, TilingError> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(TilingError::ZeroResolution(cfg.width, cfg.height));
        }
        for (dim, name) in [
            (cfg.stamp_w, "stamp width"),
            (cfg.stamp_h, "stamp height"),
            (cfg.gen_w, "generation tile width"),
            (cfg.gen_h, "generation tile height"),
            (cfg.scan_w, "scan tile width"),
            (cfg.scan_h, "scan tile height"),
            (cfg.over_w, "over-scan tile width"),
            (cfg.over_h, "over-scan tile height"),
        ] {
            if dim == 0 {
                return Err(TilingError::ZeroTileDimension(name));
            }
        }
        if cfg.bytes_per_sample == 0 {
            return Err(TilingError::ZeroSampleBytes);
        }
        if num_units == 0 {
            return Err(TilingError::ZeroUnits);
        }

        // The scan tiles of an over-scan tile are laid out in Morton order;
        // the interleave only stays inside the over-scan tile for a square
        // power-of-two grid, and the nibble table covers 8-bit coordinates.
        let square = cfg.over_w == cfg.over_h;
        if !square || !cfg.over_w.is_power_of_two() || cfg.over_w > 256 {
            return Err(TilingError::MortonUnsupported(cfg.over_w, cfg.over_h));
        }

        // Subdivide the over-scan tile and shrink the generation tile so a
        // generation tile keeps a constant byte footprint across sample
        // counts.
        let mut sub_w = 1;
        let mut sub_h = 1;
        let mut gen_adj_w = cfg.gen_w;
        let mut gen_adj_h = cfg.gen_h;
        match cfg.samples {
            1 => {}
            2 => {
                sub_w = 2;
                if gen_adj_w > 1 {
                    gen_adj_w /= 2;
                } else {
                    return Err(TilingError::GenTileTooSmall(cfg.gen_w, cfg.gen_h, 2));
                }
            }
            4 => {
                sub_w = 2;
                sub_h = 2;
                if gen_adj_w > 1 && gen_adj_h > 1 {
                    gen_adj_w /= 2;
                    gen_adj_h /= 2;
                } else {
                    return Err(TilingError::GenTileTooSmall(cfg.gen_w, cfg.gen_h, 4));
                }
            }
            8 => {
                sub_w = 4;
                sub_h = 2;
                if gen_adj_w > 3 && gen_adj_h > 1 {
                    gen_adj_w /= 4;
                    gen_adj_h /= 2;
                } else {
                    return Err(TilingError::GenTileTooSmall(cfg.gen_w, cfg.gen_h, 8));
                }
            }
            other => return Err(TilingError::UnsupportedSampleCount(other)),
        }
        if cfg.bytes_per_sample == 8 {
            sub_h *= 2;
            if gen_adj_h > 1 {
                gen_adj_h /= 2;
            } else {
                return Err(TilingError::GenTileTooShallowForWideSamples);
            }
        }

        let over_tile_pixel_w = cfg.over_w * cfg.scan_w * cfg.gen_w * cfg.stamp_w;
        let over_tile_pixel_h = cfg.over_h * cfg.scan_h * cfg.gen_h * cfg.stamp_h;
        let scan_sub_tile_pixel_w = cfg.scan_w * gen_adj_w * cfg.stamp_w;
        let scan_sub_tile_pixel_h = cfg.scan_h * gen_adj_h * cfg.stamp_h;

        let mut mapper = Self {
            cfg,
            over_tile_pixel_w,
            over_tile_pixel_h,
            over_tile_pixel_size: over_tile_pixel_w * over_tile_pixel_h,
            // Partial rightmost/bottom over-scan tiles are still fully
            // allocated: round up.
            over_tile_row_width: cfg.width.div_ceil(over_tile_pixel_w),
            over_tile_rows: cfg.height.div_ceil(over_tile_pixel_h),
            over_tile_size: cfg.over_w * cfg.over_h,
            scan_tile_pixel_w: cfg.scan_w * cfg.gen_w * cfg.stamp_w,
            scan_tile_pixel_h: cfg.scan_h * cfg.gen_h * cfg.stamp_h,
            scan_tile_size: cfg.scan_w * cfg.scan_h,
            scan_sub_tile_w: sub_w,
            scan_sub_tile_h: sub_h,
            scan_sub_tile_size: sub_w * sub_h,
            scan_sub_tile_pixel_w,
            scan_sub_tile_pixel_h,
            scan_sub_tile_bytes: scan_sub_tile_pixel_w
                * scan_sub_tile_pixel_h
                * cfg.samples
                * cfg.bytes_per_sample,
            gen_adj_w,
            gen_adj_h,
            gen_adj_size: gen_adj_w * gen_adj_h,
            gen_adj_pixel_w: gen_adj_w * cfg.stamp_w,
            gen_adj_pixel_h: gen_adj_h * cfg.stamp_h,
            stamp_tile_size: cfg.stamp_w * cfg.stamp_h,
            num_units,
            morton: [0; 256],
        };
        mapper.build_morton_table();
        Ok(mapper)
    }

    /// Reapplies a resolution change, keeping the tile shape. Only the
    /// over-scan tile grid extents depend on the resolution.
    pub fn change_resolution(&mut self, width: u32, height: u32) -> Result<(), TilingError> {
        if width == 0 || height == 0 {
            return Err(TilingError::ZeroResolution(width, height));
        }
        self.cfg.width = width;
        self.cfg.height = height;
        self.over_tile_row_width = width.div_ceil(self.over_tile_pixel_w);
        self.over_tile_rows = height.div_ceil(self.over_tile_pixel_h);
        Ok(())
    }

    pub fn config(&self) -> &TilingConfig {
        &self.cfg
    }

    /// Byte address of the first sample of pixel `(x, y)`.
    ///
    /// Injective over the pixel grid: no two in-range pixels share an
    /// address, and every address is below [`PixelMapper::frame_buffer_size`].
    pub fn compute_address(&self, x: u32, y: u32) -> u32 {
        // Over-scan tile, row-major over the (rounded-up) tile grid.
        let x_over = x / self.over_tile_pixel_w;
        let y_over = y / self.over_tile_pixel_h;
        let mut address = y_over * self.over_tile_row_width + x_over;

        // Scan sub-tile of the over-scan tile (identity for 1 sample, 4-byte
        // formats).
        let x_sub = (x / self.scan_sub_tile_pixel_w) % self.scan_sub_tile_w;
        let y_sub = (y / self.scan_sub_tile_pixel_h) % self.scan_sub_tile_h;
        address = address * self.scan_sub_tile_size + y_sub * self.scan_sub_tile_w + x_sub;

        // Scan tile, Morton interleaved inside the over-scan tile.
        let x_scan = (x / self.scan_tile_pixel_w) % self.cfg.over_w;
        let y_scan = (y / self.scan_tile_pixel_h) % self.cfg.over_h;
        address = address * self.over_tile_size + self.fast_morton(x_scan, y_scan);

        // Generation tile, row-major inside the scan tile.
        let x_gen = (x / self.gen_adj_pixel_w) % self.cfg.scan_w;
        let y_gen = (y / self.gen_adj_pixel_h) % self.cfg.scan_h;
        address = address * self.scan_tile_size + y_gen * self.cfg.scan_w + x_gen;

        // Stamp, row-major inside the (adjusted) generation tile.
        let x_stamp = (x / self.cfg.stamp_w) % self.gen_adj_w;
        let y_stamp = (y / self.cfg.stamp_h) % self.gen_adj_h;
        address = address * self.gen_adj_size + y_stamp * self.gen_adj_w + x_stamp;

        // Pixel, row-major inside the stamp; samples contiguous per pixel.
        let x_pix = x % self.cfg.stamp_w;
        let y_pix = y % self.cfg.stamp_h;
        address = address * self.stamp_tile_size + y_pix * self.cfg.stamp_w + x_pix;

        address * self.cfg.samples * self.cfg.bytes_per_sample
    }

    /// Processing unit owning pixel `(x, y)`: the Morton index of its scan
    /// tile modulo the unit count.
    pub fn map_to_unit(&self, x: u32, y: u32) -> u32 {
        let x_scan = (x / self.scan_tile_pixel_w) % self.cfg.over_w;
        let y_scan = (y / self.scan_tile_pixel_h) % self.cfg.over_h;
        self.fast_morton(x_scan, y_scan) % self.num_units
    }

    /// Processing unit owning the pixel stored at byte `address`.
    ///
    /// Agrees with [`PixelMapper::map_to_unit`] for every in-range pixel.
    pub fn map_address_to_unit(&self, address: u32) -> u32 {
        let scan_sub_tile = address / self.scan_sub_tile_bytes;
        let scan_tile = scan_sub_tile % self.over_tile_size;
        scan_tile % self.num_units
    }

    /// Total framebuffer bytes for the configured resolution, counting
    /// partially covered over-scan tiles as fully allocated.
    pub fn frame_buffer_size(&self) -> u32 {
        self.over_tile_row_width
            * self.over_tile_rows
            * self.over_tile_pixel_size
            * self.cfg.samples
            * self.cfg.bytes_per_sample
    }

    fn build_morton_table(&mut self) {
        for i in 0..256u32 {
            self.morton[i as usize] = Self::interleave_nibbles(i & 0x0F, (i >> 4) & 0x0F) as u16;
        }
    }

    /// Bit-interleaves two 4-bit coordinates: `x` into the even bits, `y`
    /// into the odd bits.
    fn interleave_nibbles(x: u32, y: u32) -> u32 {
        let mut m = 0;
        let (mut t1, mut t2) = (x, y);
        for bit in 0..4 {
            m += ((t1 & 1) << (2 * bit)) + ((t2 & 1) << (2 * bit + 1));
            t1 >>= 1;
            t2 >>= 1;
        }
        m
    }

    /// Morton index of `(x, y)` via the nibble table; coordinates up to
    /// 8 bits each. Construction guarantees scan-tile coordinates fit.
    fn fast_morton(&self, x: u32, y: u32) -> u32 {
        debug_assert!(x < 256 && y < 256);
        let low = self.morton[(((y & 0x0F) << 4) | (x & 0x0F)) as usize] as u32;
        let high = self.morton[((((y >> 4) & 0x0F) << 4) | ((x >> 4) & 0x0F)) as usize] as u32;
        low | (high << 8)
    }
}
