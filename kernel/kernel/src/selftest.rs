//! On-target self-tests.
//!
//! These cover what host unit tests cannot: the trap entry and ERTN path,
//! real timer interrupt delivery, and loads/stores through the live TLB
//! after the DA→PG flip. They run on the higher-half stack, after paging is
//! enabled; QEMU is powered off when the suite finishes.

use kernel_registers::rdtime_d;
use kernel_vmem::{
    AddressSpace, AddressSpaceBits, PagePermissions, PhysAddr, PhysMapper, VirtAddr,
};
use log::{error, info};

use crate::init::PMM;
use crate::timer;
use crate::trap::{self, Exccode};
use crate::vmem::BootPhysMapper;

/// Scratch virtual address for the mapped-mode smoke test. Lower-half
/// canonical for every practical VALEN and far from anything mapped.
const SCRATCH_VA: u64 = 0x1_0000_0000;
const SCRATCH_PATTERN: u64 = 0x1122_3344_5566_7788;

/// Generous timeout for interrupt delivery, in stable-counter ticks.
const TIMER_WAIT_TIMEOUT_TICKS: u64 = 50_000_000;

pub fn run(bits: AddressSpaceBits, root: PhysAddr, guard_page_va: u64) {
    let tests: [(&str, fn(AddressSpaceBits, PhysAddr, u64) -> bool); 4] = [
        ("break_resumes_after_ertn", break_resumes_after_ertn),
        ("timer_interrupt_delivers", timer_interrupt_delivers),
        ("mapped_scratch_round_trip", mapped_scratch_round_trip),
        ("guard_page_store_faults", guard_page_store_faults),
    ];

    let mut failed = 0usize;
    for (name, test) in tests {
        trap::reset_trap_observations();
        if test(bits, root, guard_page_va) {
            info!("selftest {name}: PASS");
        } else {
            error!("selftest {name}: FAIL");
            failed += 1;
        }
    }

    if failed == 0 {
        info!("selftest: all tests passed");
    } else {
        error!("selftest: {failed} test(s) failed");
    }
}

/// `break 0` enters the handler with EXC=BRK; the handler advances ERA past
/// the 4-byte instruction and execution resumes here.
fn break_resumes_after_ertn(_bits: AddressSpaceBits, _root: PhysAddr, _guard: u64) -> bool {
    // SAFETY: the trap handler skips BREAK.
    unsafe { core::arch::asm!("break 0", options(nomem, nostack)) };
    trap::break_trap_count() == 1
}

/// A one-shot timer with IM bit 11 unmasked and CRMD.IE set delivers
/// exactly one interrupt within the polling window.
fn timer_interrupt_delivers(_bits: AddressSpaceBits, _root: PhysAddr, _guard: u64) -> bool {
    timer::disable_interrupts();
    timer::mask_all_interrupt_lines();

    timer::start_one_shot_timer_ticks(100_000);
    timer::unmask_timer_interrupt_line();
    timer::enable_interrupts();

    // Poll with a timeout so a broken delivery path fails loudly instead of
    // hanging the machine.
    let start = rdtime_d();
    while !trap::timer_interrupt_observed() {
        if rdtime_d().wrapping_sub(start) > TIMER_WAIT_TIMEOUT_TICKS {
            break;
        }
        core::hint::spin_loop();
    }

    timer::disable_interrupts();
    timer::mask_all_interrupt_lines();
    trap::timer_interrupt_observed()
}

/// Map a scratch page, read the pre-seeded pattern back through the new
/// translation, then unmap and verify a store raises PIS with the right
/// BADV.
fn mapped_scratch_round_trip(bits: AddressSpaceBits, root: PhysAddr, _guard: u64) -> bool {
    let mapper = BootPhysMapper;
    let Ok(aspace) = AddressSpace::new(&mapper, root, bits) else {
        return false;
    };

    let Some(frame) = PMM.lock().alloc_page() else {
        return false;
    };
    // Seed the frame through the physmap before the alias exists.
    // SAFETY: the frame is fresh RAM inside the physmap window.
    unsafe { *mapper.phys_to_mut::<u64>(frame) = SCRATCH_PATTERN };

    if aspace
        .map_page(
            &mut *PMM.lock(),
            VirtAddr::from_u64(SCRATCH_VA),
            frame,
            PagePermissions::KERNEL_DATA,
        )
        .is_err()
    {
        return false;
    }
    // SAFETY: mapping changed; flush before relying on it.
    unsafe { kernel_registers::invtlb_all() };
    kernel_registers::dbar();

    // SAFETY: just mapped, readable.
    let read = unsafe { core::ptr::read_volatile(SCRATCH_VA as *const u64) };
    if read != SCRATCH_PATTERN {
        error!("scratch read {read:#x}, want {SCRATCH_PATTERN:#x}");
        return false;
    }

    if aspace.unmap_page(VirtAddr::from_u64(SCRATCH_VA)).is_err() {
        return false;
    }
    // SAFETY: as above.
    unsafe { kernel_registers::invtlb_all() };
    kernel_registers::dbar();

    trap::arm_expected_fault(Exccode::Pis, SCRATCH_VA);
    // SAFETY: the store faults; the handler records it and skips the
    // instruction.
    unsafe { core::ptr::write_volatile(SCRATCH_VA as *mut u64, 0xdead_beef) };
    let faulted = trap::expected_fault_observed();

    let _ = PMM.lock().free_page(frame);
    faulted
}

/// A store into the unmapped guard page below the higher-half stack raises
/// PIS with BADV naming the guard page.
fn guard_page_store_faults(_bits: AddressSpaceBits, _root: PhysAddr, guard_page_va: u64) -> bool {
    trap::arm_expected_fault(Exccode::Pis, guard_page_va);
    // SAFETY: the store faults; the handler records it and skips the
    // instruction.
    unsafe { core::ptr::write_volatile(guard_page_va as *mut u64, 0) };
    trap::expected_fault_observed()
}
