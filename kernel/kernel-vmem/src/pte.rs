//! # LA64 Page-Table Entry Encoding
//!
//! Entry format for common (4 KiB) pages per the LoongArch privileged
//! architecture, section 5.4.5. Only the bits the bring-up kernel actually
//! uses are modeled; the high permission bits (NR/NX/RPLV) matter even when
//! unused because they bound the encodable physical address width.

use crate::PhysAddr;
use bitfield_struct::bitfield;

/// Memory access type (MAT) of a mapping.
///
/// Encoded in PTE bits 5:4 and interpreted per CSR.RVACFG defaults:
/// strongly-ordered uncached for MMIO, coherent cached for normal RAM.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CacheMode {
    StronglyUncached = 0,
    CoherentCached = 1,
    WeaklyUncached = 2,
}

impl CacheMode {
    pub(crate) const fn into_bits(self) -> u8 {
        self as u8
    }

    pub(crate) const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::CoherentCached,
            2 => Self::WeaklyUncached,
            _ => Self::StronglyUncached,
        }
    }
}

/// Read/write permission of a mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Execute permission of a mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Execute {
    Executable,
    NoExecute,
}

/// Permissions applied to a leaf mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PagePermissions {
    pub access: Access,
    pub execute: Execute,
    pub cache: CacheMode,
    pub global: bool,
}

impl PagePermissions {
    /// Kernel text/data identity mapping: RW + X, cached, global.
    pub const KERNEL_RWX: Self = Self {
        access: Access::ReadWrite,
        execute: Execute::Executable,
        cache: CacheMode::CoherentCached,
        global: true,
    };

    /// Kernel data mapping: RW, no execute, cached, global.
    pub const KERNEL_DATA: Self = Self {
        access: Access::ReadWrite,
        execute: Execute::NoExecute,
        cache: CacheMode::CoherentCached,
        global: true,
    };

    /// Device MMIO mapping: RW, no execute, strongly uncached, global.
    pub const MMIO: Self = Self {
        access: Access::ReadWrite,
        execute: Execute::NoExecute,
        cache: CacheMode::StronglyUncached,
        global: true,
    };
}

/// One 64-bit LA64 page-table entry.
///
/// ```text
/// | 63   | 62 | 61 | 60‒12     | 11‒9 | 8 | 7 | 6 | 5‒4 | 3‒2 | 1 | 0 |
/// | RPLV | NX | NR | page base | rsv  | W | P | G | MAT | PLV | D | V |
/// ```
///
/// Leaf entries use the full layout. Non-leaf ("pointer") entries carry only
/// `P | V` plus the base of the next-level table. The physical base shares
/// the word with the high flag bits, so PALEN must not exceed 61.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// V: entry is valid for TLB load.
    pub valid: bool,
    /// D: a write has occurred through this mapping.
    pub dirty: bool,
    /// PLV: privilege level of the mapping (kernel = 0).
    #[bits(2)]
    pub plv: u8,
    /// MAT: memory access type (cache mode).
    #[bits(2, default = CacheMode::StronglyUncached)]
    pub cache: CacheMode,
    /// G: shared across ASIDs.
    pub global: bool,
    /// P: software "present" bit; set on every live entry.
    pub present: bool,
    /// W: writable.
    pub writable: bool,
    #[bits(3)]
    __: u8,
    /// Physical page base, stored as bits 60:12 of the address.
    #[bits(49)]
    page_base: u64,
    /// NR: non-readable.
    pub no_read: bool,
    /// NX: non-executable.
    pub no_execute: bool,
    /// RPLV: restrict the PLV check to exactly `plv`.
    pub restrict_plv: bool,
}

/// Bit index of the lowest high-half flag (NR, bit 61). The highest
/// encodable PALEN: a physical address may use bits below this index only.
pub(crate) const LOWEST_HIGH_FLAG_BIT: u8 = 61;

impl PageTableEntry {
    /// Encode a leaf entry for `page_base_masked` (already PALEN-masked and
    /// page-aligned) with `perms`.
    ///
    /// Present and valid are treated together during bring-up; read-write
    /// mappings are pre-dirtied so the hardware never needs to take a
    /// page-modify exception for kernel data.
    #[must_use]
    pub fn leaf(page_base_masked: u64, perms: PagePermissions) -> Self {
        let mut e = Self::new()
            .with_valid(true)
            .with_present(true)
            .with_plv(0)
            .with_cache(perms.cache)
            .with_global(perms.global)
            .with_page_base(page_base_masked >> 12);
        if matches!(perms.access, Access::ReadWrite) {
            e = e.with_writable(true).with_dirty(true);
        }
        if matches!(perms.execute, Execute::NoExecute) {
            e = e.with_no_execute(true);
        }
        e
    }

    /// Encode a non-leaf entry pointing at the table page at
    /// `table_base_masked` (already PALEN-masked and page-aligned).
    #[must_use]
    pub fn table_pointer(table_base_masked: u64) -> Self {
        Self::new()
            .with_valid(true)
            .with_present(true)
            .with_page_base(table_base_masked >> 12)
    }

    /// The absent entry.
    #[must_use]
    pub const fn absent() -> Self {
        Self::new()
    }

    /// Physical base address carried by this entry (flag bits excluded).
    #[must_use]
    pub fn base_addr(self) -> PhysAddr {
        PhysAddr::from_u64(self.page_base() << 12)
    }
}
