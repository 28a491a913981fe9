//! # Virtual Address Space
//!
//! Helpers for operating on a **single LA64 address space**: a page-table
//! tree rooted at one 4 KiB table, with as many levels as VALEN requires.
//!
//! This module provides:
//!
//! - An [`AddressSpace`] handle that knows the **physical address of the
//!   root table**, the implemented address widths, and a [`PhysMapper`] to
//!   temporarily view/modify table pages.
//! - [`AddressSpace::map_page`] / [`AddressSpace::map_range`] to install
//!   4 KiB mappings, **allocating missing intermediate tables** on the way
//!   down.
//! - [`AddressSpace::unmap_page`] and the software walker
//!   [`AddressSpace::translate`].
//!
//! ## Design notes
//!
//! - All table access happens through the provided [`PhysMapper`]. This keeps
//!   the paging code agnostic of whether table pages are reached directly
//!   (pre-paging, CRMD.DA=1) or through the physmap window (mapped mode), and
//!   makes the walker fully host-testable.
//! - Allocation is delegated to a minimal [`FrameAlloc`] which must return
//!   4 KiB-aligned physical frames.
//! - Unmapping never frees intermediate tables; the bring-up kernel never
//!   tears an address space down.
//! - Modifying live mappings requires a TLB invalidation (`invtlb 0`) before
//!   the next dependent access; that is the caller's responsibility, as is
//!   every CSR write.

use crate::addresses::{AddressSpaceBits, PhysAddr, VirtAddr};
use crate::pte::{LOWEST_HIGH_FLAG_BIT, PagePermissions, PageTableEntry};
use crate::{FrameAlloc, INDEX_BITS_PER_LEVEL, PAGE_SHIFT, PAGE_SIZE, PhysMapper, get_table};

/// Most levels a 4 KiB walk can meaningfully have: ceil((64 - 12) / 9).
const MAX_LEVEL_COUNT: u8 = 6;

/// The implemented address widths cannot be expressed by this walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error("VALEN {0} is outside the supported range")]
    UnsupportedValen(u8),
    #[error("PALEN {0} collides with the PTE flag bits or the page offset")]
    UnsupportedPalen(u8),
}

/// A single 4 KiB mapping could not be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("virtual address {0} is not page-aligned")]
    UnalignedVirt(VirtAddr),
    #[error("physical address {0} is not page-aligned")]
    UnalignedPhys(PhysAddr),
    #[error("virtual address {0} is not canonical for the implemented VALEN")]
    NonCanonical(VirtAddr),
    #[error("physical address {0} exceeds the implemented PALEN")]
    PhysOutOfRange(PhysAddr),
    #[error("size {0:#x} is not a multiple of the page size")]
    UnalignedSize(u64),
    #[error("virtual address {0} is already mapped")]
    AlreadyMapped(VirtAddr),
    #[error("out of physical frames for an intermediate table")]
    OutOfMemory,
}

/// A single 4 KiB mapping could not be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UnmapError {
    #[error("virtual address {0} is not page-aligned")]
    UnalignedVirt(VirtAddr),
    #[error("virtual address {0} is not canonical for the implemented VALEN")]
    NonCanonical(VirtAddr),
    #[error("virtual address {0} is not mapped")]
    NotMapped(VirtAddr),
}

/// Walk geometry derived from [`AddressSpaceBits`].
#[derive(Copy, Clone, Debug)]
struct Layout {
    level_count: u8,
    pa_mask: u64,
    page_base_mask: u64,
}

impl Layout {
    fn new(bits: AddressSpaceBits) -> Result<Self, AddressSpaceError> {
        if bits.valen == 0 || bits.valen > 64 {
            return Err(AddressSpaceError::UnsupportedValen(bits.valen));
        }
        if bits.palen < PAGE_SHIFT as u8 || bits.palen > LOWEST_HIGH_FLAG_BIT {
            return Err(AddressSpaceError::UnsupportedPalen(bits.palen));
        }

        let indexable = u32::from(bits.valen).saturating_sub(PAGE_SHIFT);
        let mut level_count = indexable.div_ceil(INDEX_BITS_PER_LEVEL) as u8;
        if level_count == 0 {
            level_count = 1;
        }
        if level_count > MAX_LEVEL_COUNT {
            return Err(AddressSpaceError::UnsupportedValen(bits.valen));
        }

        let pa_mask = mask_from_bits(bits.palen);
        Ok(Self {
            level_count,
            pa_mask,
            page_base_mask: pa_mask & !(PAGE_SIZE - 1),
        })
    }
}

const fn mask_from_bits(bits: u8) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Allocate and zero one page-table page, returning its physical base.
///
/// Used for the root table; intermediate tables are allocated internally by
/// the map path.
pub fn alloc_table_page<M: PhysMapper, A: FrameAlloc>(
    mapper: &M,
    alloc: &mut A,
) -> Result<PhysAddr, MapError> {
    let pa = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
    debug_assert!(pa.is_page_aligned(), "frame allocator broke its contract");
    unsafe { get_table(mapper, pa).zero() };
    Ok(pa)
}

/// A handle to one **concrete address space** (page-table tree).
///
/// This type does **not** own the table pages; it is a view over an existing
/// tree rooted at `root_phys`.
pub struct AddressSpace<'m, M: PhysMapper> {
    root_phys: PhysAddr,
    layout: Layout,
    bits: AddressSpaceBits,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Bind a view to the tree rooted at `root_phys`, validating that the
    /// implemented address widths are expressible.
    ///
    /// # Errors
    /// [`AddressSpaceError`] when VALEN needs more than six levels or PALEN
    /// collides with the PTE flag layout.
    pub fn new(
        mapper: &'m M,
        root_phys: PhysAddr,
        bits: AddressSpaceBits,
    ) -> Result<Self, AddressSpaceError> {
        Ok(Self {
            root_phys,
            layout: Layout::new(bits)?,
            bits,
            mapper,
        })
    }

    /// Physical base of the root table (the value programmed into PGDL/PGDH).
    #[must_use]
    pub const fn root_phys(&self) -> PhysAddr {
        self.root_phys
    }

    /// The address widths this view was constructed with.
    #[must_use]
    pub const fn bits(&self) -> AddressSpaceBits {
        self.bits
    }

    /// Number of table levels the walk traverses.
    #[must_use]
    pub const fn level_count(&self) -> u8 {
        self.layout.level_count
    }

    /// Map one 4 KiB page `va → pa` with `perms`.
    ///
    /// Missing intermediate tables are allocated from `alloc` and encoded as
    /// `P | V` pointers. Mapping an already-mapped page is an error; the tree
    /// is left unchanged.
    ///
    /// # Errors
    /// [`MapError`] on alignment, canonicality, PALEN-range, double-map, or
    /// allocation failure.
    pub fn map_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtAddr,
        pa: PhysAddr,
        perms: PagePermissions,
    ) -> Result<(), MapError> {
        if !va.is_page_aligned() {
            return Err(MapError::UnalignedVirt(va));
        }
        if !pa.is_page_aligned() {
            return Err(MapError::UnalignedPhys(pa));
        }
        if !va.is_canonical(self.bits.valen) {
            return Err(MapError::NonCanonical(va));
        }
        if pa.as_u64() & !self.layout.pa_mask != 0 {
            return Err(MapError::PhysOutOfRange(pa));
        }

        let mut table = unsafe { get_table(self.mapper, self.root_phys) };
        for level in (1..self.layout.level_count).rev() {
            let index = va.table_index(level);
            let entry = table.entry(index);
            let next_phys = if entry.present() {
                self.masked_base(entry)
            } else {
                let frame = alloc_table_page(self.mapper, alloc)?;
                table.set_entry(
                    index,
                    PageTableEntry::table_pointer(frame.as_u64() & self.layout.page_base_mask),
                );
                frame
            };
            table = unsafe { get_table(self.mapper, next_phys) };
        }

        let leaf_index = va.table_index(0);
        if table.entry(leaf_index).present() {
            return Err(MapError::AlreadyMapped(va));
        }
        table.set_entry(
            leaf_index,
            PageTableEntry::leaf(pa.as_u64() & self.layout.page_base_mask, perms),
        );
        Ok(())
    }

    /// Map the contiguous range `[va, va + size)` to `[pa, pa + size)` with
    /// 4 KiB pages.
    ///
    /// `va`, `pa` and `size` must be page-aligned. On failure, pages mapped
    /// before the failing one stay mapped (tolerated during bring-up; the
    /// caller reports and halts or skips the dependent stage).
    ///
    /// # Errors
    /// Propagates the first [`MapError`] encountered.
    pub fn map_range<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtAddr,
        pa: PhysAddr,
        size: u64,
        perms: PagePermissions,
    ) -> Result<(), MapError> {
        if size % PAGE_SIZE != 0 {
            return Err(MapError::UnalignedSize(size));
        }
        let mut offset = 0;
        while offset < size {
            self.map_page(alloc, va + offset, pa + offset, perms)?;
            offset += PAGE_SIZE;
        }
        Ok(())
    }

    /// Remove the 4 KiB mapping at `va`.
    ///
    /// Every intermediate level must be present. Intermediate tables are not
    /// freed.
    ///
    /// # Errors
    /// [`UnmapError::NotMapped`] when any level (or the leaf) is absent.
    pub fn unmap_page(&self, va: VirtAddr) -> Result<(), UnmapError> {
        if !va.is_page_aligned() {
            return Err(UnmapError::UnalignedVirt(va));
        }
        if !va.is_canonical(self.bits.valen) {
            return Err(UnmapError::NonCanonical(va));
        }

        let mut table = unsafe { get_table(self.mapper, self.root_phys) };
        for level in (1..self.layout.level_count).rev() {
            let entry = table.entry(va.table_index(level));
            if !entry.present() {
                return Err(UnmapError::NotMapped(va));
            }
            table = unsafe { get_table(self.mapper, self.masked_base(entry)) };
        }

        let leaf_index = va.table_index(0);
        if !table.entry(leaf_index).present() {
            return Err(UnmapError::NotMapped(va));
        }
        table.set_entry(leaf_index, PageTableEntry::absent());
        Ok(())
    }

    /// Software walk: translate `va` to its physical address.
    ///
    /// Returns the mapped physical page base OR'd with the page offset, or
    /// `None` when any level is absent or `va` is not canonical.
    #[must_use]
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        if !va.is_canonical(self.bits.valen) {
            return None;
        }

        let mut table = unsafe { get_table(self.mapper, self.root_phys) };
        for level in (1..self.layout.level_count).rev() {
            let entry = table.entry(va.table_index(level));
            if !entry.present() {
                return None;
            }
            table = unsafe { get_table(self.mapper, self.masked_base(entry)) };
        }

        let entry = table.entry(va.table_index(0));
        if !entry.present() {
            return None;
        }
        Some(PhysAddr::from_u64(
            (entry.base_addr().as_u64() & self.layout.page_base_mask) | va.page_offset(),
        ))
    }

    /// Physical base carried by `entry`, masked to the implemented PALEN.
    fn masked_base(&self, entry: PageTableEntry) -> PhysAddr {
        PhysAddr::from_u64(entry.base_addr().as_u64() & self.layout.page_base_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pte::{Access, CacheMode, Execute};
    use crate::test_support::{BumpAlloc, TestPhys};

    const BITS_48_48: AddressSpaceBits = AddressSpaceBits::new(48, 48);

    fn rw_nx() -> PagePermissions {
        PagePermissions {
            access: Access::ReadWrite,
            execute: Execute::NoExecute,
            cache: CacheMode::CoherentCached,
            global: true,
        }
    }

    fn fixture(frames: usize) -> (TestPhys, BumpAlloc) {
        let phys = TestPhys::with_frames(frames);
        let alloc = BumpAlloc::new(0, (frames as u64) << 12);
        (phys, alloc)
    }

    #[test]
    fn map_one_4k_creates_tables_and_leaf() {
        let (phys, mut alloc) = fixture(64);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();
        let aspace = AddressSpace::new(&phys, root, BITS_48_48).unwrap();

        let va = VirtAddr::from_u64(0xffff_8000_0000_0000);
        let pa = PhysAddr::from_u64(0x0030_0000);
        aspace.map_page(&mut alloc, va, pa, rw_nx()).expect("map_page");

        // Walk the tables by hand and verify each level looks sane.
        let mut table_pa = root;
        for level in (1..4).rev() {
            let t = unsafe { get_table(&phys, table_pa) };
            let e = t.entry(va.table_index(level));
            assert!(e.present());
            assert!(!e.writable(), "pointer entries carry no permissions");
            table_pa = e.base_addr();
        }
        let leaf = unsafe { get_table(&phys, table_pa) }.entry(va.table_index(0));
        assert!(leaf.present());
        assert!(leaf.writable());
        assert!(leaf.global());
        assert!(leaf.no_execute());
        assert_eq!(leaf.base_addr(), pa);
    }

    #[test]
    fn map_translate_unmap_round_trip() {
        let (phys, mut alloc) = fixture(64);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();
        let aspace = AddressSpace::new(&phys, root, BITS_48_48).unwrap();

        let va = VirtAddr::from_u64(0x0010_0000);
        let pa = PhysAddr::from_u64(0x0020_0000);
        aspace.map_page(&mut alloc, va, pa, rw_nx()).unwrap();

        assert_eq!(aspace.translate(va), Some(pa));
        assert_eq!(
            aspace.translate(VirtAddr::from_u64(0x0010_0123)),
            Some(PhysAddr::from_u64(0x0020_0123)),
            "page offset is carried through"
        );
        assert_eq!(aspace.translate(VirtAddr::from_u64(0x0010_1000)), None);

        aspace.unmap_page(va).unwrap();
        assert_eq!(aspace.translate(va), None);
        assert_eq!(aspace.unmap_page(va), Err(UnmapError::NotMapped(va)));
    }

    #[test]
    fn double_map_is_rejected() {
        let (phys, mut alloc) = fixture(64);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();
        let aspace = AddressSpace::new(&phys, root, BITS_48_48).unwrap();

        let va = VirtAddr::from_u64(0x0010_0000);
        aspace
            .map_page(&mut alloc, va, PhysAddr::from_u64(0x0020_0000), rw_nx())
            .unwrap();
        assert_eq!(
            aspace.map_page(&mut alloc, va, PhysAddr::from_u64(0x0021_0000), rw_nx()),
            Err(MapError::AlreadyMapped(va))
        );
        // The original mapping is untouched.
        assert_eq!(aspace.translate(va), Some(PhysAddr::from_u64(0x0020_0000)));
    }

    #[test]
    fn valen_and_palen_are_enforced() {
        let bits = AddressSpaceBits::new(39, 44);
        let (phys, mut alloc) = fixture(64);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();
        let aspace = AddressSpace::new(&phys, root, bits).unwrap();
        let pa = PhysAddr::from_u64(0x0020_0000);

        // Lower-half canonical VA maps fine.
        aspace
            .map_page(&mut alloc, VirtAddr::from_u64(0x0010_0000), pa, rw_nx())
            .unwrap();

        // Higher-half canonical VA maps fine.
        let hh = VirtAddr::from_u64((!0u64 << 39) | (1 << 38) | 0x0010_0000);
        aspace
            .map_page(&mut alloc, hh, PhysAddr::from_u64(0x0030_0000), rw_nx())
            .unwrap();
        assert_eq!(aspace.translate(hh), Some(PhysAddr::from_u64(0x0030_0000)));

        // Non-canonical VA (bit 39 set without sign extension) is rejected.
        let bad_va = VirtAddr::from_u64(1u64 << 39);
        assert_eq!(
            aspace.map_page(&mut alloc, bad_va, pa, rw_nx()),
            Err(MapError::NonCanonical(bad_va))
        );

        // Physical address beyond PALEN=44 is rejected.
        let bad_pa = PhysAddr::from_u64(pa.as_u64() | (1 << 44));
        assert_eq!(
            aspace.map_page(&mut alloc, VirtAddr::from_u64(0x0040_0000), bad_pa, rw_nx()),
            Err(MapError::PhysOutOfRange(bad_pa))
        );
    }

    #[test]
    fn unaligned_inputs_are_rejected() {
        let (phys, mut alloc) = fixture(16);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();
        let aspace = AddressSpace::new(&phys, root, BITS_48_48).unwrap();

        let va = VirtAddr::from_u64(0x0010_0800);
        assert_eq!(
            aspace.map_page(&mut alloc, va, PhysAddr::from_u64(0x1000), rw_nx()),
            Err(MapError::UnalignedVirt(va))
        );
        let pa = PhysAddr::from_u64(0x1008);
        assert_eq!(
            aspace.map_page(&mut alloc, VirtAddr::from_u64(0x0010_0000), pa, rw_nx()),
            Err(MapError::UnalignedPhys(pa))
        );
        assert_eq!(
            aspace.map_range(
                &mut alloc,
                VirtAddr::from_u64(0x0010_0000),
                PhysAddr::from_u64(0x1000),
                100,
                rw_nx()
            ),
            Err(MapError::UnalignedSize(100))
        );
    }

    #[test]
    fn map_range_strides_pages() {
        let (phys, mut alloc) = fixture(64);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();
        let aspace = AddressSpace::new(&phys, root, BITS_48_48).unwrap();

        let va = VirtAddr::from_u64(0x0020_0000);
        let pa = PhysAddr::from_u64(0x0008_0000);
        aspace
            .map_range(&mut alloc, va, pa, 4 * PAGE_SIZE, rw_nx())
            .unwrap();
        for i in 0..4 {
            assert_eq!(aspace.translate(va + i * PAGE_SIZE), Some(pa + i * PAGE_SIZE));
        }
        assert_eq!(aspace.translate(va + 4 * PAGE_SIZE), None);
    }

    #[test]
    fn oom_during_table_allocation_is_reported() {
        // Two frames: one root, one intermediate; the next level has nothing.
        let (phys, mut alloc) = fixture(2);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();
        let aspace = AddressSpace::new(&phys, root, BITS_48_48).unwrap();
        assert_eq!(
            aspace.map_page(
                &mut alloc,
                VirtAddr::from_u64(0x0010_0000),
                PhysAddr::from_u64(0x1000),
                rw_nx()
            ),
            Err(MapError::OutOfMemory)
        );
    }

    #[test]
    fn level_count_follows_valen() {
        let (phys, mut alloc) = fixture(4);
        let root = alloc_table_page(&phys, &mut alloc).unwrap();

        let three = AddressSpace::new(&phys, root, AddressSpaceBits::new(39, 48)).unwrap();
        assert_eq!(three.level_count(), 3);
        let four = AddressSpace::new(&phys, root, BITS_48_48).unwrap();
        assert_eq!(four.level_count(), 4);

        assert!(matches!(
            AddressSpace::new(&phys, root, AddressSpaceBits::new(0, 48)),
            Err(AddressSpaceError::UnsupportedValen(0))
        ));
        assert!(matches!(
            AddressSpace::new(&phys, root, AddressSpaceBits::new(48, 62)),
            Err(AddressSpaceError::UnsupportedPalen(62))
        ));
        assert!(matches!(
            AddressSpace::new(&phys, root, AddressSpaceBits::new(48, 11)),
            Err(AddressSpaceError::UnsupportedPalen(11))
        ));
    }
}
