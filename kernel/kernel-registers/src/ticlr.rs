//! CSR.TICLR — timer interrupt clear.

use bitfield_struct::bitfield;

/// Write-1-to-clear register for the pending timer interrupt.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Ticlr {
    /// CLR: writing 1 clears the pending timer interrupt.
    pub clr: bool,
    #[bits(63)]
    __: u64,
}

impl Ticlr {
    #[must_use]
    pub const fn clear_timer() -> Self {
        Self::new().with_clr(true)
    }
}

crate::impl_csr_access!(Ticlr, crate::csr::TICLR);
