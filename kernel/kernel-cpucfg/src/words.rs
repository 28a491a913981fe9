//! Bit layouts of the recognized CPUCFG words.
//!
//! Field positions follow the LoongArch64 v1.1 privileged specification,
//! cross-checked against the Linux LoongArch decoder for the fields both use.

use bitfield_struct::bitfield;

/// Architecture level reported in word 0x1 bits 1:0.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Architecture {
    SimplifiedLa32 = 0,
    La32 = 1,
    La64 = 2,
    Reserved = 3,
}

impl Architecture {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::SimplifiedLa32,
            1 => Self::La32,
            2 => Self::La64,
            _ => Self::Reserved,
        }
    }
}

/// CPUCFG word 0x1 — architecture level, address widths, MMU and page
/// attribute support.
#[bitfield(u32)]
pub struct Word1 {
    /// Architecture level (bits 1:0).
    #[bits(2, default = Architecture::Reserved)]
    pub arch: Architecture,
    /// PGMMU: the MMU supports page mapping mode.
    pub page_mapping_mmu: bool,
    /// IOCSR: the IOCSR instruction is implemented.
    pub iocsr: bool,
    /// Supported physical address bits, minus one (bits 11:4).
    #[bits(8)]
    pub palen_minus_1: u8,
    /// Supported virtual address bits, minus one (bits 19:12).
    #[bits(8)]
    pub valen_minus_1: u8,
    /// UAL: non-aligned memory access is supported.
    pub unaligned_access: bool,
    /// RI: the "Read Inhibit" page attribute is supported.
    pub read_inhibit: bool,
    /// EP: the "Execution Protection" page attribute is supported.
    pub execution_protection: bool,
    /// RPLV: the restricted-privilege page attribute is supported.
    pub rplv: bool,
    /// HP: huge pages are supported.
    pub huge_page: bool,
    /// CRC: the CRC instructions are supported.
    pub crc: bool,
    /// MSGINT: external interrupts use message-interrupt mode.
    pub message_interrupt: bool,
    #[bits(5)]
    __: u8,
}

/// CPUCFG word 0x2 — ISA feature flags.
#[bitfield(u32)]
pub struct Word2 {
    /// Basic floating-point instructions.
    pub fp: bool,
    /// Single-precision floating point.
    pub fp_sp: bool,
    /// Double-precision floating point.
    pub fp_dp: bool,
    /// Floating-point standard version (1 = IEEE 754-2008 compatible).
    #[bits(3)]
    pub fp_ver: u8,
    /// LSX: 128-bit vector extension.
    pub lsx: bool,
    /// LASX: 256-bit vector extension.
    pub lasx: bool,
    /// Complex vector operation instructions.
    pub complex: bool,
    /// Encryption/decryption vector instructions.
    pub crypto: bool,
    /// LVZ: virtualization extension.
    pub lvz: bool,
    /// Virtualization hardware acceleration version.
    #[bits(3)]
    pub lvz_ver: u8,
    /// LLFTP: constant-frequency counter and timer.
    pub llftp: bool,
    /// Constant-frequency counter and timer version.
    #[bits(3)]
    pub llftp_ver: u8,
    /// X86 binary translation extension.
    pub lbt_x86: bool,
    /// ARM binary translation extension.
    pub lbt_arm: bool,
    /// MIPS binary translation extension.
    pub lbt_mips: bool,
    /// LSPW: software page-table walking instruction.
    pub lspw: bool,
    /// LAM: AM* atomic memory access instructions.
    pub lam: bool,
    /// Reserved (bit 23).
    _rsv23: bool,
    /// HPTW: hardware page-table walker.
    pub hptw: bool,
    /// FRECIPE.{S/D} and FRSQRTE.{S/D} (plus vector variants).
    pub frecipe: bool,
    /// DIV.W[U]/MOD.W[U] only compute the low 32 bits of their inputs.
    pub div32: bool,
    /// AM{SWAP/ADD}[_DB].{B/H}.
    pub lam_bh: bool,
    /// AMCAS[_DB].{B/H/W/D}.
    pub lamcas: bool,
    /// LLACQ.{W/D} and SCREL.{W/D}.
    pub llacq_screl: bool,
    /// SC.Q.
    pub scq: bool,
    /// Reserved (bit 31).
    _rsv31: bool,
}

/// CPUCFG word 0x6 — performance-monitor configuration.
#[bitfield(u32)]
pub struct Word6 {
    /// PMP: performance counters are implemented.
    pub pmp: bool,
    /// Performance-monitor event version.
    #[bits(3)]
    pub pmver: u8,
    /// Number of performance monitors, minus one.
    #[bits(4)]
    pub pmnum_minus_1: u8,
    /// Width of a performance monitor in bits, minus one.
    #[bits(6)]
    pub pmbits_minus_1: u8,
    /// UPM: counters are readable from user mode.
    pub upm: bool,
    #[bits(17)]
    __: u32,
}

/// CPUCFG word 0x10 — cache presence and relationship flags.
#[bitfield(u32)]
pub struct Word10 {
    /// L1 instruction or unified cache present.
    pub l1_iu_present: bool,
    /// The L1 IU cache is unified.
    pub l1_iu_unified: bool,
    /// L1 data cache present.
    pub l1_d_present: bool,
    /// L2 instruction or unified cache present.
    pub l2_iu_present: bool,
    /// The L2 IU cache is unified.
    pub l2_iu_unified: bool,
    /// The L2 IU cache is private per core.
    pub l2_iu_private: bool,
    /// The L2 IU cache is inclusive of L1.
    pub l2_iu_inclusive: bool,
    /// L2 data cache present.
    pub l2_d_present: bool,
    /// The L2 data cache is private per core.
    pub l2_d_private: bool,
    /// The L2 data cache is inclusive of L1.
    pub l2_d_inclusive: bool,
    /// L3 instruction or system cache present.
    pub l3_iu_present: bool,
    /// The L3 IU cache is unified.
    pub l3_iu_unified: bool,
    /// The L3 IU cache is private per core.
    pub l3_iu_private: bool,
    /// The L3 IU cache is inclusive of L1 and L2.
    pub l3_iu_inclusive: bool,
    /// L3 data cache present.
    pub l3_d_present: bool,
    /// The L3 data cache is private per core.
    pub l3_d_private: bool,
    /// The L3 data cache is inclusive of lower levels.
    pub l3_d_inclusive: bool,
    #[bits(15)]
    __: u32,
}

/// Layout shared by the cache-geometry words 0x11–0x14.
#[bitfield(u32)]
pub struct CacheWord {
    /// Number of ways, minus one.
    #[bits(16)]
    pub ways_minus_1: u16,
    /// log2 of the number of cache rows (sets) per way.
    #[bits(8)]
    pub index_log2: u8,
    /// log2 of the cache line size in bytes.
    #[bits(7)]
    pub line_size_log2: u8,
    __: bool,
}

impl CacheWord {
    #[must_use]
    pub const fn geometry(self) -> CacheGeometry {
        CacheGeometry {
            ways_minus_1: self.ways_minus_1(),
            index_log2: self.index_log2(),
            line_size_log2: self.line_size_log2(),
        }
    }
}

/// Geometry of one cache level.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CacheGeometry {
    pub ways_minus_1: u16,
    pub index_log2: u8,
    pub line_size_log2: u8,
}

impl CacheGeometry {
    #[must_use]
    pub const fn ways(self) -> u32 {
        self.ways_minus_1 as u32 + 1
    }

    #[must_use]
    pub const fn sets_per_way(self) -> u32 {
        1 << self.index_log2
    }

    #[must_use]
    pub const fn line_size_bytes(self) -> u32 {
        1 << self.line_size_log2
    }

    /// Total capacity: ways × sets × line size.
    #[must_use]
    pub const fn size_bytes(self) -> u64 {
        self.ways() as u64 * self.sets_per_way() as u64 * self.line_size_bytes() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word1_field_positions() {
        let w = Word1::from_bits(2 | (1 << 2) | (47 << 4) | (47 << 12) | (1 << 22) | (1 << 24));
        assert_eq!(w.arch(), Architecture::La64);
        assert!(w.page_mapping_mmu());
        assert!(!w.iocsr());
        assert_eq!(w.palen_minus_1(), 47);
        assert_eq!(w.valen_minus_1(), 47);
        assert!(w.execution_protection());
        assert!(w.huge_page());
        assert!(!w.crc());
    }

    #[test]
    fn word2_high_feature_bits() {
        let w = Word2::from_bits((1 << 24) | (1 << 28) | (1 << 30));
        assert!(w.hptw());
        assert!(w.lamcas());
        assert!(w.scq());
        assert!(!w.lam_bh());
    }

    #[test]
    fn cache_word_geometry() {
        // 8 ways, 128 sets, 64-byte lines.
        let w = CacheWord::from_bits(7 | (7 << 16) | (6 << 24));
        let g = w.geometry();
        assert_eq!(g.ways(), 8);
        assert_eq!(g.sets_per_way(), 128);
        assert_eq!(g.line_size_bytes(), 64);
        assert_eq!(g.size_bytes(), 64 * 1024);
    }
}
