//! # Hardware Page-Walker Configuration
//!
//! CSR.PWCL and CSR.PWCH describe the multi-level table shape to the
//! page-walk hardware: for each level, the start bit of its virtual-address
//! index slice and the slice width. This module computes the packed values
//! from the implemented VALEN; programming the CSRs is the kernel's job.
//!
//! For 4 KiB pages the page offset is 12 bits and the remaining
//! `VALEN - 12` bits are split into at most five levels (PT, then Dir1..Dir4)
//! of at most 9 bits each, from lowest to highest.

use crate::addresses::AddressSpaceBits;
use crate::{INDEX_BITS_PER_LEVEL, PAGE_SHIFT};
use bitfield_struct::bitfield;

/// Most index levels expressible in PWCL/PWCH: PT + Dir1..Dir4.
const MAX_WALKER_LEVELS: usize = 5;

/// The requested VALEN cannot be described to the page-walk hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WalkerConfigError {
    #[error("VALEN {0} leaves no index bits above the page offset")]
    NoIndexBits(u8),
    #[error("VALEN {0} requires more than five walker levels")]
    TooManyLevels(u8),
}

/// CSR.PWCL — page-walk control, lower half.
///
/// `pte_width = 0` selects 64-bit entries.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pwcl {
    /// Start bit of the PT index slice.
    #[bits(5)]
    pub ptbase: u8,
    /// Width of the PT index slice.
    #[bits(5)]
    pub ptwidth: u8,
    /// Start bit of the Dir1 index slice.
    #[bits(5)]
    pub dir1_base: u8,
    /// Width of the Dir1 index slice (0 = level absent).
    #[bits(5)]
    pub dir1_width: u8,
    /// Start bit of the Dir2 index slice.
    #[bits(5)]
    pub dir2_base: u8,
    /// Width of the Dir2 index slice (0 = level absent).
    #[bits(5)]
    pub dir2_width: u8,
    /// Entry width selector (0 = 64-bit).
    #[bits(2)]
    pub pte_width: u8,
}

/// CSR.PWCH — page-walk control, upper half.
///
/// Bits 31:24 are reserved and must stay zero.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pwch {
    /// Start bit of the Dir3 index slice.
    #[bits(6)]
    pub dir3_base: u8,
    /// Width of the Dir3 index slice (0 = level absent).
    #[bits(6)]
    pub dir3_width: u8,
    /// Start bit of the Dir4 index slice.
    #[bits(6)]
    pub dir4_base: u8,
    /// Width of the Dir4 index slice (0 = level absent).
    #[bits(6)]
    pub dir4_width: u8,
    #[bits(8)]
    __: u8,
}

/// The packed PWCL/PWCH pair for one table shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WalkerConfig {
    pub pwcl: Pwcl,
    pub pwch: Pwch,
}

impl WalkerConfig {
    /// Compute the walker configuration for 4 KiB pages and `bits.valen`.
    ///
    /// # Errors
    /// [`WalkerConfigError`] when VALEN has no index bits above the page
    /// offset or needs more than five levels.
    pub fn for_4k_pages(bits: AddressSpaceBits) -> Result<Self, WalkerConfigError> {
        if u32::from(bits.valen) <= PAGE_SHIFT {
            return Err(WalkerConfigError::NoIndexBits(bits.valen));
        }

        let mut widths = [0u8; MAX_WALKER_LEVELS];
        let mut level_count = 0usize;
        let mut remaining = u32::from(bits.valen) - PAGE_SHIFT;
        while remaining > 0 {
            if level_count >= MAX_WALKER_LEVELS {
                return Err(WalkerConfigError::TooManyLevels(bits.valen));
            }
            let w = remaining.min(INDEX_BITS_PER_LEVEL) as u8;
            widths[level_count] = w;
            level_count += 1;
            remaining -= u32::from(w);
        }

        let mut bases = [0u8; MAX_WALKER_LEVELS];
        bases[0] = PAGE_SHIFT as u8;
        for i in 1..level_count {
            bases[i] = bases[i - 1] + widths[i - 1];
        }

        let pwcl = Pwcl::new()
            .with_ptbase(bases[0])
            .with_ptwidth(widths[0])
            .with_dir1_base(if level_count >= 2 { bases[1] } else { 0 })
            .with_dir1_width(if level_count >= 2 { widths[1] } else { 0 })
            .with_dir2_base(if level_count >= 3 { bases[2] } else { 0 })
            .with_dir2_width(if level_count >= 3 { widths[2] } else { 0 })
            .with_pte_width(0);

        let pwch = Pwch::new()
            .with_dir3_base(if level_count >= 4 { bases[3] } else { 0 })
            .with_dir3_width(if level_count >= 4 { widths[3] } else { 0 })
            .with_dir4_base(if level_count >= 5 { bases[4] } else { 0 })
            .with_dir4_width(if level_count >= 5 { widths[4] } else { 0 });

        Ok(Self { pwcl, pwch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valen_48_uses_four_nine_bit_levels() {
        let cfg = WalkerConfig::for_4k_pages(AddressSpaceBits::new(48, 48)).unwrap();
        assert_eq!(cfg.pwcl.ptbase(), 12);
        assert_eq!(cfg.pwcl.ptwidth(), 9);
        assert_eq!(cfg.pwcl.dir1_base(), 21);
        assert_eq!(cfg.pwcl.dir1_width(), 9);
        assert_eq!(cfg.pwcl.dir2_base(), 30);
        assert_eq!(cfg.pwcl.dir2_width(), 9);
        assert_eq!(cfg.pwcl.pte_width(), 0);
        assert_eq!(cfg.pwch.dir3_base(), 39);
        assert_eq!(cfg.pwch.dir3_width(), 9);
        assert_eq!(cfg.pwch.dir4_width(), 0);
        // Reserved upper byte of PWCH stays clear.
        assert_eq!(cfg.pwch.into_bits() >> 24, 0);
    }

    #[test]
    fn valen_39_uses_three_levels() {
        let cfg = WalkerConfig::for_4k_pages(AddressSpaceBits::new(39, 48)).unwrap();
        assert_eq!(cfg.pwcl.ptwidth(), 9);
        assert_eq!(cfg.pwcl.dir1_width(), 9);
        assert_eq!(cfg.pwcl.dir2_width(), 9);
        assert_eq!(cfg.pwch.dir3_width(), 0);
        assert_eq!(cfg.pwch.into_bits(), 0);
    }

    #[test]
    fn partial_top_level_keeps_its_true_width() {
        // VALEN=47: 12 + 9*3 = 39, top slice is 8 bits wide at bit 39.
        let cfg = WalkerConfig::for_4k_pages(AddressSpaceBits::new(47, 48)).unwrap();
        assert_eq!(cfg.pwch.dir3_base(), 39);
        assert_eq!(cfg.pwch.dir3_width(), 8);
    }

    #[test]
    fn packed_bit_positions_match_the_csr_layout() {
        let cfg = WalkerConfig::for_4k_pages(AddressSpaceBits::new(48, 48)).unwrap();
        let pwcl = cfg.pwcl.into_bits();
        assert_eq!(pwcl & 0x1f, 12);
        assert_eq!((pwcl >> 5) & 0x1f, 9);
        assert_eq!((pwcl >> 10) & 0x1f, 21);
        assert_eq!((pwcl >> 15) & 0x1f, 9);
        assert_eq!((pwcl >> 20) & 0x1f, 30);
        assert_eq!((pwcl >> 25) & 0x1f, 9);
        assert_eq!(pwcl >> 30, 0);
        let pwch = cfg.pwch.into_bits();
        assert_eq!(pwch & 0x3f, 39);
        assert_eq!((pwch >> 6) & 0x3f, 9);
    }

    #[test]
    fn out_of_range_valen_is_rejected() {
        assert_eq!(
            WalkerConfig::for_4k_pages(AddressSpaceBits::new(12, 48)),
            Err(WalkerConfigError::NoIndexBits(12))
        );
        // 12 + 5*9 = 57; anything above needs a sixth level.
        assert_eq!(
            WalkerConfig::for_4k_pages(AddressSpaceBits::new(58, 48)),
            Err(WalkerConfigError::TooManyLevels(58))
        );
        assert!(WalkerConfig::for_4k_pages(AddressSpaceBits::new(57, 48)).is_ok());
    }
}
