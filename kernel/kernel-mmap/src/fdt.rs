//! # Flattened Device Tree parsing
//!
//! Extracts the boot memory map from a DTB per the Devicetree Specification
//! (flattened form): the memreserve table and, from the structure block, the
//! `reg` properties of `/memory*` nodes (usable RAM) and of the children of
//! `/reserved-memory` (reserved).
//!
//! All multi-byte fields are big-endian. The parser tracks `#address-cells`
//! and `#size-cells` per node (defaults 2 and 1), supports cell widths of one
//! or two, and bounds-checks every access against the blob.

use crate::{BootMemoryMap, BootMemoryRegion, RegionType};

/// FDT header magic (stored big-endian on the wire).
const FDT_MAGIC: u32 = 0xd00d_feed;

/// Structure block tokens.
const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_NOP: u32 = 4;
const FDT_END: u32 = 9;

/// Header size in bytes.
const HEADER_SIZE: usize = 40;

/// Maximum node nesting depth.
const MAX_DEPTH: usize = 32;

/// Why a DTB was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FdtParseError {
    #[error("header magic is not 0xd00dfeed")]
    BadMagic,
    #[error("blob is truncated or a block offset exceeds totalsize")]
    Truncated,
    #[error("unrecognized structure token {0:#x}")]
    BadToken(u32),
    #[error("unterminated or out-of-bounds string")]
    BadString,
    #[error("unsupported #address-cells/#size-cells {address_cells}/{size_cells}")]
    UnsupportedCellWidth { address_cells: u32, size_cells: u32 },
    #[error("reg property length is not a multiple of the tuple size")]
    MalformedReg,
    #[error("node nesting exceeds {MAX_DEPTH} levels")]
    DepthExceeded,
    #[error("more than {} regions", crate::MAX_REGIONS)]
    TooManyRegions,
    #[error("zero-sized region")]
    EmptyRegion,
    #[error("region end wraps the address space")]
    RegionWraps,
}

fn be32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

fn be64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

/// Validated view of the header and block geometry.
struct FdtView {
    total_size: usize,
    struct_offset: usize,
    struct_size: usize,
    strings_offset: usize,
    strings_size: usize,
    rsvmap_offset: usize,
}

impl FdtView {
    /// Validate the header of `blob`. Only the first [`HEADER_SIZE`] bytes
    /// are inspected, so this also backs the structural probe used by the
    /// low-memory scan.
    fn from_header(blob: &[u8]) -> Result<Self, FdtParseError> {
        if blob.len() < HEADER_SIZE {
            return Err(FdtParseError::Truncated);
        }
        if be32(blob, 0) != Some(FDT_MAGIC) {
            return Err(FdtParseError::BadMagic);
        }

        let total_size = be32(blob, 4).ok_or(FdtParseError::Truncated)? as usize;
        let struct_offset = be32(blob, 8).ok_or(FdtParseError::Truncated)? as usize;
        let strings_offset = be32(blob, 12).ok_or(FdtParseError::Truncated)? as usize;
        let rsvmap_offset = be32(blob, 16).ok_or(FdtParseError::Truncated)? as usize;
        let strings_size = be32(blob, 32).ok_or(FdtParseError::Truncated)? as usize;
        let struct_size = be32(blob, 36).ok_or(FdtParseError::Truncated)? as usize;

        if total_size < HEADER_SIZE {
            return Err(FdtParseError::Truncated);
        }
        if struct_offset >= total_size
            || strings_offset >= total_size
            || rsvmap_offset >= total_size
            || struct_offset.saturating_add(struct_size) > total_size
            || strings_offset.saturating_add(strings_size) > total_size
        {
            return Err(FdtParseError::Truncated);
        }

        Ok(Self {
            total_size,
            struct_offset,
            struct_size,
            strings_offset,
            strings_size,
            rsvmap_offset,
        })
    }

    /// NUL-terminated string at `offset` into the strings block.
    fn string<'b>(&self, blob: &'b [u8], offset: usize) -> Result<&'b [u8], FdtParseError> {
        if offset >= self.strings_size {
            return Err(FdtParseError::BadString);
        }
        let start = self.strings_offset + offset;
        let end = self.strings_offset + self.strings_size;
        let region = blob.get(start..end).ok_or(FdtParseError::BadString)?;
        let nul = region
            .iter()
            .position(|&b| b == 0)
            .ok_or(FdtParseError::BadString)?;
        Ok(&region[..nul])
    }
}

/// Structural probe: does `bytes` begin with a coherent FDT header?
///
/// Needs at least the 40 header bytes; the body is not inspected.
#[must_use]
pub fn looks_like_device_tree_blob(bytes: &[u8]) -> bool {
    FdtView::from_header(bytes).is_ok()
}

/// `totalsize` of the blob whose header starts at `bytes`, if coherent.
#[must_use]
pub fn device_tree_total_size(bytes: &[u8]) -> Option<usize> {
    FdtView::from_header(bytes).ok().map(|v| v.total_size)
}

/// Byte cursor over one block of the blob.
struct Cursor<'b> {
    blob: &'b [u8],
    pos: usize,
    end: usize,
}

impl<'b> Cursor<'b> {
    fn new(blob: &'b [u8], pos: usize, end: usize) -> Self {
        Self { blob, pos, end }
    }

    fn read_be32(&mut self) -> Result<u32, FdtParseError> {
        if self.pos + 4 > self.end {
            return Err(FdtParseError::Truncated);
        }
        let v = be32(self.blob, self.pos).ok_or(FdtParseError::Truncated)?;
        self.pos += 4;
        Ok(v)
    }

    fn read_be64(&mut self) -> Result<u64, FdtParseError> {
        if self.pos + 8 > self.end {
            return Err(FdtParseError::Truncated);
        }
        let v = be64(self.blob, self.pos).ok_or(FdtParseError::Truncated)?;
        self.pos += 8;
        Ok(v)
    }

    fn skip(&mut self, n: usize) -> Result<(), FdtParseError> {
        if self.pos.saturating_add(n) > self.end {
            return Err(FdtParseError::Truncated);
        }
        self.pos += n;
        Ok(())
    }

    fn align4(&mut self) -> Result<(), FdtParseError> {
        let aligned = self.pos.div_ceil(4) * 4;
        self.skip(aligned - self.pos)
    }

    /// NUL-terminated node name at the cursor; advances past the terminator
    /// and the 4-byte padding.
    fn read_node_name(&mut self) -> Result<&'b [u8], FdtParseError> {
        let region = self
            .blob
            .get(self.pos..self.end)
            .ok_or(FdtParseError::Truncated)?;
        let nul = region
            .iter()
            .position(|&b| b == 0)
            .ok_or(FdtParseError::BadString)?;
        let name = &region[..nul];
        self.skip(nul + 1)?;
        self.align4()?;
        Ok(name)
    }
}

/// Per-node `#address-cells` / `#size-cells` context.
#[derive(Copy, Clone)]
struct CellWidths {
    address_cells: u32,
    size_cells: u32,
}

impl CellWidths {
    /// Defaults per the devicetree specification when unspecified.
    const DEFAULT: Self = Self {
        address_cells: 2,
        size_cells: 1,
    };
}

/// Decode the `(address, size)` tuples of a `reg` property value.
fn add_reg_regions(
    value: &[u8],
    widths: CellWidths,
    region_type: RegionType,
    map: &mut BootMemoryMap,
) -> Result<(), FdtParseError> {
    let (ac, sc) = (widths.address_cells, widths.size_cells);
    if !(1..=2).contains(&ac) || !(1..=2).contains(&sc) {
        return Err(FdtParseError::UnsupportedCellWidth {
            address_cells: ac,
            size_cells: sc,
        });
    }

    let tuple_bytes = ((ac + sc) * 4) as usize;
    if value.len() % tuple_bytes != 0 {
        return Err(FdtParseError::MalformedReg);
    }

    let read_cells = |offset: usize, cells: u32| -> u64 {
        // Bounds were established by the tuple arithmetic above.
        if cells == 1 {
            u64::from(be32(value, offset).unwrap_or(0))
        } else {
            be64(value, offset).unwrap_or(0)
        }
    };

    let mut offset = 0;
    while offset < value.len() {
        let address = read_cells(offset, ac);
        let size = read_cells(offset + (ac * 4) as usize, sc);
        offset += tuple_bytes;

        if size == 0 {
            continue;
        }
        map.add_region(BootMemoryRegion {
            physical_base: address,
            size_bytes: size,
            region_type,
        })?;
    }
    Ok(())
}

/// Memreserve table: `(u64 addr, u64 size)` big-endian pairs terminated by
/// `(0, 0)`. Non-empty entries become reserved regions.
fn parse_memreserve(
    blob: &[u8],
    view: &FdtView,
    map: &mut BootMemoryMap,
) -> Result<(), FdtParseError> {
    let mut cursor = Cursor::new(blob, view.rsvmap_offset, view.total_size);
    loop {
        let address = cursor.read_be64()?;
        let size = cursor.read_be64()?;
        if address == 0 && size == 0 {
            return Ok(());
        }
        if size == 0 {
            continue;
        }
        map.add_region(BootMemoryRegion {
            physical_base: address,
            size_bytes: size,
            region_type: RegionType::Reserved,
        })?;
    }
}

/// Walk the structure block collecting `/memory*` and `/reserved-memory`
/// regions.
fn parse_structure(
    blob: &[u8],
    view: &FdtView,
    map: &mut BootMemoryMap,
) -> Result<(), FdtParseError> {
    let mut cursor = Cursor::new(
        blob,
        view.struct_offset,
        view.struct_offset + view.struct_size,
    );

    let mut cells_stack = [CellWidths::DEFAULT; MAX_DEPTH];
    let mut name_stack: [&[u8]; MAX_DEPTH] = [b""; MAX_DEPTH];
    let mut depth = 0usize;

    let mut in_reserved_memory = false;
    let mut reserved_cells = CellWidths::DEFAULT;

    loop {
        let token = cursor.read_be32()?;
        match token {
            FDT_BEGIN_NODE => {
                let name = cursor.read_node_name()?;
                if depth + 1 >= MAX_DEPTH {
                    return Err(FdtParseError::DepthExceeded);
                }
                // Children inherit the parent's cell widths.
                cells_stack[depth + 1] = cells_stack[depth];
                name_stack[depth + 1] = name;
                depth += 1;

                if depth == 2 && name.starts_with(b"reserved-memory") {
                    in_reserved_memory = true;
                    reserved_cells = cells_stack[depth];
                }
            }
            FDT_END_NODE => {
                if depth == 0 {
                    return Err(FdtParseError::BadToken(FDT_END_NODE));
                }
                if depth == 2 && in_reserved_memory {
                    in_reserved_memory = false;
                }
                depth -= 1;
            }
            FDT_PROP => {
                let len = cursor.read_be32()? as usize;
                let name_offset = cursor.read_be32()? as usize;
                let prop_name = view.string(blob, name_offset)?;
                let value_start = cursor.pos;
                cursor.skip(len)?;
                cursor.align4()?;
                let value = &blob[value_start..value_start + len];

                if depth == 1 {
                    if prop_name == b"#address-cells"
                        && let Some(v) = prop_u32(value)
                    {
                        cells_stack[depth].address_cells = v;
                    }
                    if prop_name == b"#size-cells"
                        && let Some(v) = prop_u32(value)
                    {
                        cells_stack[depth].size_cells = v;
                    }
                }
                if depth == 2 && in_reserved_memory {
                    if prop_name == b"#address-cells"
                        && let Some(v) = prop_u32(value)
                    {
                        reserved_cells.address_cells = v;
                    }
                    if prop_name == b"#size-cells"
                        && let Some(v) = prop_u32(value)
                    {
                        reserved_cells.size_cells = v;
                    }
                }

                // Usable RAM: the reg of a top-level node named memory[@...].
                if depth == 2 && prop_name == b"reg" && name_stack[depth].starts_with(b"memory") {
                    add_reg_regions(value, cells_stack[depth], RegionType::UsableRam, map)?;
                }

                // Reserved carve-outs: reg of /reserved-memory children.
                if in_reserved_memory && depth >= 3 && prop_name == b"reg" {
                    add_reg_regions(value, reserved_cells, RegionType::Reserved, map)?;
                }
            }
            FDT_NOP => {}
            FDT_END => return Ok(()),
            other => return Err(FdtParseError::BadToken(other)),
        }
    }
}

fn prop_u32(value: &[u8]) -> Option<u32> {
    if value.len() != 4 {
        return None;
    }
    be32(value, 0)
}

/// Parse a complete DTB into a boot memory map.
pub(crate) fn parse(blob: &[u8]) -> Result<BootMemoryMap, FdtParseError> {
    let view = FdtView::from_header(blob)?;
    if blob.len() < view.total_size {
        return Err(FdtParseError::Truncated);
    }

    let mut map = BootMemoryMap::new();
    parse_memreserve(blob, &view, &mut map)?;
    parse_structure(blob, &view, &mut map)?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal DTB builder for tests: assembles header, memreserve table,
    /// structure block, and strings block with correct offsets.
    struct DtbBuilder {
        memreserve: Vec<(u64, u64)>,
        structure: Vec<u8>,
        strings: Vec<u8>,
    }

    impl DtbBuilder {
        fn new() -> Self {
            Self {
                memreserve: Vec::new(),
                structure: Vec::new(),
                strings: Vec::new(),
            }
        }

        fn memreserve(mut self, addr: u64, size: u64) -> Self {
            self.memreserve.push((addr, size));
            self
        }

        fn string_offset(&mut self, name: &str) -> u32 {
            let offset = self.strings.len() as u32;
            self.strings.extend_from_slice(name.as_bytes());
            self.strings.push(0);
            offset
        }

        fn begin_node(mut self, name: &str) -> Self {
            self.structure.extend_from_slice(&1u32.to_be_bytes());
            self.structure.extend_from_slice(name.as_bytes());
            self.structure.push(0);
            while self.structure.len() % 4 != 0 {
                self.structure.push(0);
            }
            self
        }

        fn end_node(mut self) -> Self {
            self.structure.extend_from_slice(&2u32.to_be_bytes());
            self
        }

        fn prop(mut self, name: &str, value: &[u8]) -> Self {
            let name_offset = self.string_offset(name);
            self.structure.extend_from_slice(&3u32.to_be_bytes());
            self.structure
                .extend_from_slice(&(value.len() as u32).to_be_bytes());
            self.structure.extend_from_slice(&name_offset.to_be_bytes());
            self.structure.extend_from_slice(value);
            while self.structure.len() % 4 != 0 {
                self.structure.push(0);
            }
            self
        }

        fn prop_u32(self, name: &str, value: u32) -> Self {
            self.prop(name, &value.to_be_bytes())
        }

        /// `reg` with the given cell widths.
        fn prop_reg(self, pairs: &[(u64, u64)], ac: u32, sc: u32) -> Self {
            let mut value = Vec::new();
            for &(a, s) in pairs {
                match ac {
                    1 => value.extend_from_slice(&(a as u32).to_be_bytes()),
                    _ => value.extend_from_slice(&a.to_be_bytes()),
                }
                match sc {
                    1 => value.extend_from_slice(&(s as u32).to_be_bytes()),
                    _ => value.extend_from_slice(&s.to_be_bytes()),
                }
            }
            self.prop("reg", &value)
        }

        fn raw_token(mut self, token: u32) -> Self {
            self.structure.extend_from_slice(&token.to_be_bytes());
            self
        }

        fn finish(mut self) -> Vec<u8> {
            self.structure.extend_from_slice(&9u32.to_be_bytes());

            let rsvmap_offset = 40usize;
            let rsvmap_size = (self.memreserve.len() + 1) * 16;
            let struct_offset = rsvmap_offset + rsvmap_size;
            let strings_offset = struct_offset + self.structure.len();
            let total_size = strings_offset + self.strings.len();

            let mut blob = Vec::with_capacity(total_size);
            blob.extend_from_slice(&0xd00d_feedu32.to_be_bytes());
            blob.extend_from_slice(&(total_size as u32).to_be_bytes());
            blob.extend_from_slice(&(struct_offset as u32).to_be_bytes());
            blob.extend_from_slice(&(strings_offset as u32).to_be_bytes());
            blob.extend_from_slice(&(rsvmap_offset as u32).to_be_bytes());
            blob.extend_from_slice(&17u32.to_be_bytes()); // version
            blob.extend_from_slice(&16u32.to_be_bytes()); // last_comp_version
            blob.extend_from_slice(&0u32.to_be_bytes()); // boot_cpuid_phys
            blob.extend_from_slice(&(self.strings.len() as u32).to_be_bytes());
            blob.extend_from_slice(&(self.structure.len() as u32).to_be_bytes());
            for (a, s) in &self.memreserve {
                blob.extend_from_slice(&a.to_be_bytes());
                blob.extend_from_slice(&s.to_be_bytes());
            }
            blob.extend_from_slice(&[0u8; 16]); // terminator
            blob.extend_from_slice(&self.structure);
            blob.extend_from_slice(&self.strings);
            blob
        }
    }

    fn qemu_like_tree() -> Vec<u8> {
        DtbBuilder::new()
            .memreserve(0x0090_0000, 0x1_0000)
            .begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("memory@0")
            .prop_reg(&[(0x0000_0000, 0x1000_0000)], 2, 2)
            .end_node()
            .begin_node("reserved-memory")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("firmware@e0000")
            .prop_reg(&[(0x000e_0000, 0x2_0000)], 2, 2)
            .end_node()
            .end_node()
            .end_node()
            .finish()
    }

    #[test]
    fn parses_memory_reserved_and_memreserve() {
        let blob = qemu_like_tree();
        let map = BootMemoryMap::parse_device_tree(&blob).expect("parse");

        let usable: Vec<_> = map.regions_of(RegionType::UsableRam).collect();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].physical_base, 0);
        assert_eq!(usable[0].size_bytes, 0x1000_0000);

        let reserved: Vec<_> = map.regions_of(RegionType::Reserved).collect();
        assert_eq!(reserved.len(), 2);
        assert_eq!(reserved[0].physical_base, 0x0090_0000);
        assert_eq!(reserved[1].physical_base, 0x000e_0000);
        assert_eq!(reserved[1].size_bytes, 0x2_0000);
    }

    #[test]
    fn default_cell_widths_are_2_and_1() {
        // No #address-cells/#size-cells on the root: 64-bit address,
        // 32-bit size.
        let blob = DtbBuilder::new()
            .begin_node("")
            .begin_node("memory")
            .prop_reg(&[(0x8000_0000, 0x0400_0000)], 2, 1)
            .end_node()
            .end_node()
            .finish();
        let map = BootMemoryMap::parse_device_tree(&blob).unwrap();
        let r = map.regions_of(RegionType::UsableRam).next().unwrap();
        assert_eq!(r.physical_base, 0x8000_0000);
        assert_eq!(r.size_bytes, 0x0400_0000);
    }

    #[test]
    fn thirty_two_bit_cells_decode() {
        let blob = DtbBuilder::new()
            .begin_node("")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .begin_node("memory@80000000")
            .prop_reg(&[(0x8000_0000, 0x0100_0000)], 1, 1)
            .end_node()
            .end_node()
            .finish();
        let map = BootMemoryMap::parse_device_tree(&blob).unwrap();
        let r = map.regions_of(RegionType::UsableRam).next().unwrap();
        assert_eq!(r.physical_base, 0x8000_0000);
        assert_eq!(r.size_bytes, 0x0100_0000);
    }

    #[test]
    fn non_memory_nodes_contribute_nothing() {
        let blob = DtbBuilder::new()
            .begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("serial@1fe001e0")
            .prop_reg(&[(0x1fe0_01e0, 0x100)], 2, 2)
            .end_node()
            .end_node()
            .finish();
        let map = BootMemoryMap::parse_device_tree(&blob).unwrap();
        assert_eq!(map.region_count(), 0);
    }

    #[test]
    fn zero_sized_reg_entries_are_skipped() {
        let blob = DtbBuilder::new()
            .begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("memory@0")
            .prop_reg(&[(0x0, 0x0), (0x1000_0000, 0x1000)], 2, 2)
            .end_node()
            .end_node()
            .finish();
        let map = BootMemoryMap::parse_device_tree(&blob).unwrap();
        let usable: Vec<_> = map.regions_of(RegionType::UsableRam).collect();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].physical_base, 0x1000_0000);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut blob = qemu_like_tree();
        blob[0] = 0;
        assert_eq!(
            BootMemoryMap::parse_device_tree(&blob),
            Err(FdtParseError::BadMagic)
        );
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = qemu_like_tree();
        assert_eq!(
            BootMemoryMap::parse_device_tree(&blob[..blob.len() - 8]),
            Err(FdtParseError::Truncated)
        );
        assert_eq!(
            BootMemoryMap::parse_device_tree(&blob[..16]),
            Err(FdtParseError::Truncated)
        );
    }

    #[test]
    fn unsupported_cell_width_is_rejected() {
        let blob = DtbBuilder::new()
            .begin_node("")
            .prop_u32("#address-cells", 3)
            .prop_u32("#size-cells", 2)
            .begin_node("memory@0")
            .prop("reg", &[0u8; 20])
            .end_node()
            .end_node()
            .finish();
        assert_eq!(
            BootMemoryMap::parse_device_tree(&blob),
            Err(FdtParseError::UnsupportedCellWidth {
                address_cells: 3,
                size_cells: 2
            })
        );
    }

    #[test]
    fn unknown_token_is_rejected() {
        let blob = DtbBuilder::new()
            .begin_node("")
            .raw_token(0x7)
            .end_node()
            .finish();
        assert_eq!(
            BootMemoryMap::parse_device_tree(&blob),
            Err(FdtParseError::BadToken(0x7))
        );
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut b = DtbBuilder::new();
        for _ in 0..MAX_DEPTH {
            b = b.begin_node("n");
        }
        for _ in 0..MAX_DEPTH {
            b = b.end_node();
        }
        assert_eq!(
            BootMemoryMap::parse_device_tree(&b.finish()),
            Err(FdtParseError::DepthExceeded)
        );
    }

    #[test]
    fn structural_probe_accepts_header_prefix_only() {
        let blob = qemu_like_tree();
        assert!(looks_like_device_tree_blob(&blob[..40]));
        assert_eq!(device_tree_total_size(&blob[..40]), Some(blob.len()));
        assert!(!looks_like_device_tree_blob(&blob[..39]));
        assert!(!looks_like_device_tree_blob(&[0u8; 64]));
    }

    #[test]
    fn reserved_memory_uses_its_own_cell_widths() {
        let blob = DtbBuilder::new()
            .begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("reserved-memory")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .begin_node("carveout@1000000")
            .prop_reg(&[(0x0100_0000, 0x1_0000)], 1, 1)
            .end_node()
            .end_node()
            .end_node()
            .finish();
        let map = BootMemoryMap::parse_device_tree(&blob).unwrap();
        let r = map.regions_of(RegionType::Reserved).next().unwrap();
        assert_eq!(r.physical_base, 0x0100_0000);
        assert_eq!(r.size_bytes, 0x1_0000);
    }
}
