//! CSR.TCFG — timer configuration.

use bitfield_struct::bitfield;

/// The CPU-local constant-frequency timer.
///
/// `init_val` holds the countdown start in units of 4 ticks (the low two
/// bits of the architectural count are forced to zero by the layout).
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Tcfg {
    /// EN: timer enable.
    pub en: bool,
    /// PERIODIC: reload on expiry instead of stopping.
    pub periodic: bool,
    /// InitVal: countdown start, bits 63:2 of the tick count.
    #[bits(62)]
    pub init_val: u64,
}

impl Tcfg {
    /// Disabled timer.
    #[must_use]
    pub const fn stopped() -> Self {
        Self::new()
    }

    /// One-shot countdown of `ticks` (PERIODIC=0, EN=1).
    #[must_use]
    pub const fn one_shot(ticks: u64) -> Self {
        Self::new().with_en(true).with_init_val(ticks)
    }
}

crate::impl_csr_access!(Tcfg, crate::csr::TCFG);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_packs_ticks_above_the_control_bits() {
        let v = Tcfg::one_shot(100_000);
        assert_eq!(v.into_bits(), (100_000 << 2) | 1);
        assert_eq!(Tcfg::stopped().into_bits(), 0);
    }
}
