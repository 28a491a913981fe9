//! CSR.PRMD — pre-exception mode information.

use bitfield_struct::bitfield;

/// Privilege level and interrupt state saved by hardware on exception entry
/// and restored by `ertn`.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Prmd {
    /// PPLV: privilege level before the exception.
    #[bits(2)]
    pub pplv: u8,
    /// PIE: interrupt-enable state before the exception.
    pub pie: bool,
    /// PWE: watchpoint-enable state before the exception.
    pub pwe: bool,
    #[bits(60)]
    __: u64,
}

crate::impl_csr_access!(Prmd, crate::csr::PRMD);
