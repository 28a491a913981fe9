//! QEMU virt board odds and ends: halting and powering off.

#![allow(dead_code)]

/// Syscon register that the virt board wires up as "syscon-poweroff":
/// writing [`SYSCON_POWEROFF_VALUE`] at offset 0 shuts QEMU down.
pub const SYSCON_POWEROFF_BASE: usize = 0x100e_001c;
const SYSCON_POWEROFF_VALUE: u8 = 0x34;

/// Stop forever: wait for interrupts that are never delivered.
pub fn halt() -> ! {
    loop {
        // SAFETY: privileged; waking up just loops back into idle.
        unsafe { kernel_registers::idle() };
    }
}

/// Ask QEMU to power the machine off; halts if the request is ignored.
pub fn poweroff() -> ! {
    // SAFETY: the syscon device is a fixed platform register on the virt
    // board, identity-mapped during bring-up.
    unsafe {
        core::ptr::write_volatile(SYSCON_POWEROFF_BASE as *mut u8, SYSCON_POWEROFF_VALUE);
    }
    kernel_registers::dbar();
    halt()
}
