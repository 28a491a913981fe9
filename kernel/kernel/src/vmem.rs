//! Kernel-side virtual memory glue: the translation-mode-aware physical
//! mapper and the boot-wide address-width snapshot.

use kernel_registers::{Crmd, LoadCsr};
use kernel_vmem::{AddressSpaceBits, PhysAddr, PhysMapper, layout};
use spin::Once;

static ADDRESS_BITS: Once<AddressSpaceBits> = Once::new();

/// Publish the CPUCFG-derived address widths. First caller wins.
pub fn set_address_bits(bits: AddressSpaceBits) {
    ADDRESS_BITS.call_once(|| bits);
}

/// The published address widths.
///
/// Panics if called before [`set_address_bits`]; the bring-up driver
/// publishes them in its first stage.
pub fn address_bits() -> AddressSpaceBits {
    *ADDRESS_BITS.get().expect("address bits published in stage 1")
}

/// Mapper that follows the current translation mode.
///
/// While CRMD.DA=1 physical addresses are dereferenced directly; once
/// CRMD.PG=1 they are reached through the physmap window. All page-table
/// pages live inside that window, so the same mapper value serves the whole
/// kernel lifetime.
#[derive(Copy, Clone, Default)]
pub struct BootPhysMapper;

impl PhysMapper for BootPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        // SAFETY (read): reading CRMD has no side effects.
        let paging = unsafe { Crmd::load() }.pg();
        let va = if paging {
            layout::to_phys_map_virtual(pa.as_u64(), address_bits().valen)
        } else {
            pa.as_u64()
        };
        // SAFETY: per the trait contract the caller guarantees `pa` is
        // dereferenceable in the current mode.
        unsafe { &mut *(va as usize as *mut T) }
    }
}
