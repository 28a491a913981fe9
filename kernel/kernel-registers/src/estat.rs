//! CSR.ESTAT — exception status.

use bitfield_struct::bitfield;

/// Pending interrupt lines plus the code of the most recent exception.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Estat {
    /// IS: pending interrupt status lines (bits 14:0).
    #[bits(15)]
    pub is: u16,
    /// Reserved (bit 15).
    _rsv15: bool,
    /// Ecode: exception code (bits 21:16).
    #[bits(6)]
    pub ecode: u8,
    /// EsubCode: exception subcode (bits 30:22).
    #[bits(9)]
    pub esubcode: u16,
    /// Reserved.
    #[bits(33)]
    _rsv31_63: u64,
}

impl Estat {
    /// Pending state of the CPU-local timer line (IS bit 11).
    #[must_use]
    pub const fn timer_pending(self) -> bool {
        self.is() & (1 << crate::ecfg::TIMER_INTERRUPT_LINE) != 0
    }
}

crate::impl_csr_access!(Estat, crate::csr::ESTAT);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exception_fields() {
        // EXC=0xC (BRK), subcode 0, timer line pending.
        let v = Estat::from_bits((0xc << 16) | (1 << 11));
        assert_eq!(v.ecode(), 0xc);
        assert_eq!(v.esubcode(), 0);
        assert!(v.timer_pending());

        let v = Estat::from_bits(0x3 << 22);
        assert_eq!(v.esubcode(), 3);
        assert_eq!(v.ecode(), 0);
    }
}
