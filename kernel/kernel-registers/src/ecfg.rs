//! CSR.ECFG — exception configuration.

use bitfield_struct::bitfield;

/// Interrupt-line mask and exception vectoring configuration.
///
/// `lie` is a mask: a 1 bit permits delivery of that interrupt line (CRMD.IE
/// must additionally be set). `vs = 0` selects unified vectoring, where every
/// exception and interrupt enters through CSR.EENTRY.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Ecfg {
    /// LIE: local interrupt-line enable mask (bits 12:0).
    #[bits(13)]
    pub lie: u16,
    /// Reserved (bits 15:13).
    #[bits(3)]
    _rsv13_15: u8,
    /// VS: vector spacing (0 = unified entry).
    #[bits(3)]
    pub vs: u8,
    /// Reserved.
    #[bits(45)]
    _rsv19_63: u64,
}

/// ECFG.LIE bit index of the CPU-local timer interrupt line.
pub const TIMER_INTERRUPT_LINE: u16 = 11;

impl Ecfg {
    /// The configuration used at trap init: every line masked, unified entry.
    #[must_use]
    pub const fn all_masked() -> Self {
        Self::new()
    }

    #[must_use]
    pub const fn with_timer_line_unmasked(self) -> Self {
        self.with_lie(self.lie() | (1 << TIMER_INTERRUPT_LINE))
    }
}

crate::impl_csr_access!(Ecfg, crate::csr::ECFG);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_line_is_bit_11() {
        let v = Ecfg::all_masked().with_timer_line_unmasked();
        assert_eq!(v.into_bits(), 1 << 11);
        assert_eq!(v.vs(), 0);
    }
}
