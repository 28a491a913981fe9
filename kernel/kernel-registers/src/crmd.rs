//! CSR.CRMD — current mode information.

use bitfield_struct::bitfield;

/// Current privilege mode, interrupt enable, and address translation mode.
///
/// The DA/PG pair selects the translation mode: `DA=1, PG=0` is direct
/// address mode (VA == PA), `DA=0, PG=1` is mapped mode through the page
/// tables. Flipping between them must be a single CSR write.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Crmd {
    /// PLV: current privilege level (kernel = 0).
    #[bits(2)]
    pub plv: u8,
    /// IE: global interrupt enable.
    pub ie: bool,
    /// DA: direct address translation enable.
    pub da: bool,
    /// PG: mapped (paged) address translation enable.
    pub pg: bool,
    /// DATF: direct-mode instruction-fetch access type.
    #[bits(2)]
    pub datf: u8,
    /// DATM: direct-mode load/store access type.
    #[bits(2)]
    pub datm: u8,
    /// WE: instruction-fetch watchpoint enable.
    pub we: bool,
    #[bits(54)]
    __: u64,
}

crate::impl_csr_access!(Crmd, crate::csr::CRMD);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_positions() {
        let v = Crmd::from_bits((1 << 3) | (1 << 4)); // DA | PG
        assert!(v.da());
        assert!(v.pg());
        assert!(!v.ie());

        let v = Crmd::new().with_ie(true);
        assert_eq!(v.into_bits(), 1 << 2);
        let v = Crmd::new().with_pg(true);
        assert_eq!(v.into_bits(), 1 << 4);
        let v = Crmd::new().with_da(true);
        assert_eq!(v.into_bits(), 1 << 3);
    }
}
