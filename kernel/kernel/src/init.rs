//! Staged kernel bring-up.
//!
//! The naked `_start` builds the boot stack and jumps into [`kernel_main`],
//! which drives the stages in order: console and logging, bootstrap heap,
//! CPU feature snapshot, trap wiring, DTB discovery, boot-map parse, PMM
//! init, page-table construction, walker CSR programming, the DA→PG flip,
//! and finally the switch onto a higher-half stack with a VM-backed heap.
//!
//! Each stage logs one line; a failed stage logs its reason and either
//! skips its dependents or halts. Nothing is retried.

use kernel_alloc::BitmapFrameAlloc;
use kernel_cpucfg::{Architecture, Cpucfg};
use kernel_mmap::BootMemoryMap;
use kernel_uart::{UART0_BASE, Uart16550, UartLogger};
use kernel_vmem::walker::WalkerConfig;
use kernel_vmem::{
    AddressSpace, AddressSpaceBits, PAGE_SIZE, PagePermissions, PhysAddr, VirtAddr,
    align_down, align_up, alloc_table_page, layout,
};
use log::{LevelFilter, error, info, warn};
use spin::{Mutex, Once};

use crate::dtb;
use crate::vmem::BootPhysMapper;
use crate::{heap, machine, paging_hw, timer, trap};

/// Earliest boot stack, used from `_start` until the higher-half handoff.
pub const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct Aligned16<const N: usize>([u8; N]);

/// Boot stack storage in a dedicated BSS section. Inside the kernel image,
/// so the PMM reserves it along with everything else between `_start` and
/// `_end`.
#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned16<BOOT_STACK_SIZE> = Aligned16([0; BOOT_STACK_SIZE]);

/// The physical memory manager. One instance for the life of the kernel;
/// its bitmap is bootstrap-heap storage inside the identity-mapped kernel
/// image, so it stays addressable in both translation modes.
pub static PMM: Mutex<BitmapFrameAlloc> = Mutex::new(BitmapFrameAlloc::new());

/// Everything the higher-half continuation needs, published before the
/// stack switch (the old stack frames die with the jump).
struct Handoff {
    bits: AddressSpaceBits,
    root: PhysAddr,
    guard_page_va: u64,
    heap_base: u64,
    heap_size: u64,
    entry_alias: u64,
}

static HANDOFF: Once<Handoff> = Once::new();

/// The kernel entry point.
///
/// # ABI
/// The boot environment enters here in direct address mode with the LA64
/// argument registers set: a0 = UEFI-compliance flag, a1 = kernel command
/// line pointer, a2 = boot info pointer. They are forwarded untouched to
/// [`kernel_main`]; only `$sp` is replaced with the boot stack.
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.entry")]
extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "la.global $t0, {stack}",
        "li.d     $t1, {size}",
        "add.d    $sp, $t0, $t1",
        // Align down to 16 for the LA64 ABI.
        "bstrins.d $sp, $zero, 3, 0",
        "b        {main}",
        stack = sym BOOT_STACK,
        size = const BOOT_STACK_SIZE,
        main = sym kernel_main,
    )
}

unsafe extern "C" {
    /// End of the kernel image, provided by the linker script. `_start`
    /// doubles as the image base.
    static _end: u8;
}

fn kernel_image_range() -> (u64, u64) {
    let base = align_down(_start as usize as u64, PAGE_SIZE);
    // SAFETY: `_end` is a linker-provided marker; only its address is taken.
    let end = align_up(unsafe { (&raw const _end) as u64 }, PAGE_SIZE);
    (base, end)
}

#[unsafe(no_mangle)]
extern "C" fn kernel_main(is_uefi: u64, cmdline_ptr: u64, boot_info_ptr: u64) -> ! {
    // Stage 1: console, logging, bootstrap heap, CPU feature snapshot.
    // SAFETY: fixed platform UART, directly addressable in DA mode.
    kernel_uart::install_console(unsafe { Uart16550::new(UART0_BASE) });
    UartLogger::init(LevelFilter::Info).expect("logger init");
    info!("boot args: a0={is_uefi:#x} a1={cmdline_ptr:#x} a2={boot_info_ptr:#x}");
    log_command_line(cmdline_ptr);

    heap::init_bootstrap_heap();

    let cpucfg = Cpucfg::default();
    let bits = AddressSpaceBits::new(
        cpucfg.virtual_address_bits(),
        cpucfg.physical_address_bits(),
    );
    crate::vmem::set_address_bits(bits);
    log_cpu_features(&cpucfg, bits);

    // Stage 2: traps wired, everything masked, interrupts off.
    trap::init();
    timer::mask_all_interrupt_lines();
    timer::disable_interrupts();
    info!("trap entry installed at {:#x}", trap::entry_address());

    // Stage 3: locate the DTB.
    let Some(blob) = dtb::locate() else {
        warn!("no DTB found in low memory; cannot bring up the PMM");
        machine::halt();
    };
    info!(
        "DTB detected: base={:#x} size={} (low-memory scan)",
        blob.physical_base, blob.size_bytes
    );

    // Stage 4: parse the boot memory map.
    // SAFETY: the blob range is low RAM, directly addressable in DA mode.
    let boot_map = match BootMemoryMap::parse_device_tree(unsafe { blob.bytes() }) {
        Ok(map) => map,
        Err(e) => {
            error!("DTB parse failed: {e}");
            machine::halt();
        }
    };
    log_boot_map(&boot_map);

    // Stage 5: the physical memory manager.
    let (kernel_base, kernel_end) = kernel_image_range();
    {
        let mut pmm = PMM.lock();
        if let Err(e) = pmm.init_from_boot_map(
            &boot_map,
            kernel_base,
            kernel_end,
            blob.physical_base,
            blob.size_bytes as u64,
        ) {
            error!("PMM init failed: {e}");
            machine::halt();
        }
        info!(
            "PMM: tracked [{:#x}, {:#x}), {} pages total, {} free",
            pmm.tracked_physical_base(),
            pmm.tracked_physical_limit(),
            pmm.total_pages(),
            pmm.free_pages()
        );
    }

    // Stage 6: build the bring-up address space.
    let space = match build_bringup_address_space(bits, kernel_base, kernel_end) {
        Ok(space) => space,
        Err(reason) => {
            error!("page-table construction failed: {reason}");
            machine::halt();
        }
    };

    // Stage 7: program the walker and flip DA→PG.
    let config = match WalkerConfig::for_4k_pages(bits) {
        Ok(config) => config,
        Err(e) => {
            error!("VALEN not expressible in PWCL/PWCH: {e}");
            machine::halt();
        }
    };
    paging_hw::configure_page_walker(space.root, config);
    info!(
        "walker configured: pwcl={:#010x} pwch={:#010x} pgd={:#x}",
        config.pwcl.into_bits(),
        config.pwch.into_bits(),
        space.root.as_u64()
    );
    // SAFETY: stage 6 mapped the executing code, stack, UART, syscon, page
    // tables and PMM bitmap; the walker CSRs were just programmed.
    unsafe { paging_hw::enable_paging() };
    info!("paging enabled (CRMD.PG=1, CRMD.DA=0)");

    // Stage 8: move onto the higher-half stack and continue there.
    let hh_base = layout::kernel_higher_half_base(bits.valen);
    let continuation = hh_base + (higher_half_main as usize as u64 - kernel_base);
    HANDOFF.call_once(|| Handoff {
        bits,
        root: space.root,
        guard_page_va: space.guard_page_va,
        heap_base: space.heap_base,
        heap_size: space.heap_size,
        entry_alias: hh_base + (trap::entry_address() - kernel_base),
    });
    info!(
        "jumping to the higher half: entry={continuation:#x} sp={:#x}",
        space.stack_top_va
    );
    // SAFETY: the target stack and continuation alias were mapped in stage 6.
    unsafe { switch_stack_and_enter(space.stack_top_va, continuation) }
}

/// Built by stage 6; consumed by stages 7 and 8.
struct BringupSpace {
    root: PhysAddr,
    stack_top_va: u64,
    guard_page_va: u64,
    heap_base: u64,
    heap_size: u64,
}

/// Size of the higher-half kernel stack.
const KERNEL_STACK_PAGES: u64 = 4;
/// Size of the VM-backed heap region.
const VM_HEAP_PAGES: u64 = 16;
/// Size of the physmap window over PMM-tracked RAM.
const PHYS_MAP_WINDOW: u64 = 16 * 1024 * 1024;

/// Map everything mapped mode needs:
/// identity kernel image, higher-half kernel alias, UART and syscon MMIO
/// pages, a guarded higher-half stack, a VM-backed heap region, and the
/// physmap window.
fn build_bringup_address_space(
    bits: AddressSpaceBits,
    kernel_base: u64,
    kernel_end: u64,
) -> Result<BringupSpace, &'static str> {
    let mapper = BootPhysMapper;
    let mut pmm = PMM.lock();

    let root = alloc_table_page(&mapper, &mut *pmm).map_err(|_| "no frame for the root table")?;
    let aspace =
        AddressSpace::new(&mapper, root, bits).map_err(|_| "address widths not expressible")?;

    let kernel_size = kernel_end - kernel_base;

    // The kernel image, both as identity mapping (we are executing there
    // right now) and as the higher-half alias we hand off to.
    aspace
        .map_range(
            &mut *pmm,
            VirtAddr::from_u64(kernel_base),
            PhysAddr::from_u64(kernel_base),
            kernel_size,
            PagePermissions::KERNEL_RWX,
        )
        .map_err(|_| "kernel identity mapping")?;
    let hh_base = layout::kernel_higher_half_base(bits.valen);
    aspace
        .map_range(
            &mut *pmm,
            VirtAddr::from_u64(hh_base),
            PhysAddr::from_u64(kernel_base),
            kernel_size,
            PagePermissions::KERNEL_RWX,
        )
        .map_err(|_| "higher-half kernel alias")?;

    // Device windows, identity-mapped and strongly uncached.
    for mmio in [UART0_BASE as u64, machine::SYSCON_POWEROFF_BASE as u64] {
        let page = align_down(mmio, PAGE_SIZE);
        aspace
            .map_page(
                &mut *pmm,
                VirtAddr::from_u64(page),
                PhysAddr::from_u64(page),
                PagePermissions::MMIO,
            )
            .map_err(|_| "MMIO mapping")?;
    }

    // Higher-half stack above the kernel alias: one unmapped guard page,
    // then the stack pages.
    let guard_page_va = hh_base + kernel_size;
    let stack_base_va = guard_page_va + PAGE_SIZE;
    for i in 0..KERNEL_STACK_PAGES {
        let frame = pmm.alloc_page().ok_or("no frame for the stack")?;
        aspace
            .map_page(
                &mut *pmm,
                VirtAddr::from_u64(stack_base_va + i * PAGE_SIZE),
                frame,
                PagePermissions::KERNEL_DATA,
            )
            .map_err(|_| "stack mapping")?;
    }
    let stack_top_va = stack_base_va + KERNEL_STACK_PAGES * PAGE_SIZE;

    // VM-backed heap region above the stack.
    let heap_base = stack_top_va;
    for i in 0..VM_HEAP_PAGES {
        let frame = pmm.alloc_page().ok_or("no frame for the heap")?;
        aspace
            .map_page(
                &mut *pmm,
                VirtAddr::from_u64(heap_base + i * PAGE_SIZE),
                frame,
                PagePermissions::KERNEL_DATA,
            )
            .map_err(|_| "heap mapping")?;
    }

    // Physmap window over the start of tracked RAM; covers the PMM bitmap
    // and the page-table frames so mapped mode can keep mutating them.
    let tracked_base = pmm.tracked_physical_base();
    let window = PHYS_MAP_WINDOW.min(pmm.tracked_physical_limit() - tracked_base);
    aspace
        .map_range(
            &mut *pmm,
            VirtAddr::from_u64(layout::to_phys_map_virtual(tracked_base, bits.valen)),
            PhysAddr::from_u64(tracked_base),
            window,
            PagePermissions::KERNEL_DATA,
        )
        .map_err(|_| "physmap window")?;

    info!(
        "mappings built: identity [{kernel_base:#x}, {kernel_end:#x}), alias at {hh_base:#x}, \
         stack top {stack_top_va:#x} (guard {guard_page_va:#x}), heap [{heap_base:#x}, {:#x}), \
         physmap {:#x}+{window:#x}",
        heap_base + VM_HEAP_PAGES * PAGE_SIZE,
        layout::phys_map_base(bits.valen),
    );

    Ok(BringupSpace {
        root,
        stack_top_va,
        guard_page_va,
        heap_base,
        heap_size: VM_HEAP_PAGES * PAGE_SIZE,
    })
}

/// Jump pad for the higher-half handoff: replace `$sp` and tail-jump.
///
/// # Safety
/// `stack_top` must be mapped and 16-byte aligned; `entry` must be the
/// higher-half alias of a diverging `extern "C"` function.
#[unsafe(naked)]
unsafe extern "C" fn switch_stack_and_enter(stack_top: u64, entry: u64) -> ! {
    core::arch::naked_asm!(
        // a0 = stack top, a1 = entry.
        "move $sp, $a0",
        "jirl $zero, $a1, 0",
    )
}

/// Continuation running on the higher-half stack.
extern "C" fn higher_half_main() -> ! {
    let handoff = HANDOFF.get().expect("handoff published before the jump");

    // The VM-backed heap replaces the bootstrap buffer as allocation
    // backing.
    // SAFETY: stage 6 mapped the region read-write and nothing else uses it.
    unsafe { heap::add_vm_backed_region(handoff.heap_base as usize, handoff.heap_size as usize) };

    // Exceptions can now enter through the higher-half alias too; the TLB
    // refill entry stays at the physical alias on purpose.
    trap::set_general_entry(handoff.entry_alias);

    info!(
        "higher half reached: sp in [{:#x}, +{} pages), heap {} KiB at {:#x}",
        handoff.guard_page_va + PAGE_SIZE,
        KERNEL_STACK_PAGES,
        handoff.heap_size / 1024,
        handoff.heap_base
    );

    #[cfg(feature = "selftest")]
    {
        crate::selftest::run(handoff.bits, handoff.root, handoff.guard_page_va);
        machine::poweroff();
    }

    #[cfg(not(feature = "selftest"))]
    {
        let _ = (handoff.bits, handoff.root);
        info!("bring-up complete; idling");
        machine::halt();
    }
}

fn log_command_line(cmdline_ptr: u64) {
    if cmdline_ptr == 0 {
        return;
    }
    // Bounded read of the NUL-terminated command line the boot environment
    // put in a1.
    const MAX_CMDLINE: usize = 256;
    // SAFETY: non-null per the boot contract; the bound keeps the read
    // inside the boot-info area even if the terminator is missing.
    let bytes = unsafe { core::slice::from_raw_parts(cmdline_ptr as *const u8, MAX_CMDLINE) };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(MAX_CMDLINE);
    if let Ok(s) = core::str::from_utf8(&bytes[..len]) {
        info!("command line: {s}");
    }
}

fn log_cpu_features(cpucfg: &Cpucfg, bits: AddressSpaceBits) {
    let arch = match cpucfg.arch() {
        Architecture::SimplifiedLa32 => "simplified LA32",
        Architecture::La32 => "LA32",
        Architecture::La64 => "LA64",
        Architecture::Reserved => "unknown",
    };
    info!(
        "CPU: prid={:#x} arch={arch} VALEN={} PALEN={} paging-mmu={} hptw={}",
        cpucfg.processor_id(),
        bits.valen,
        bits.palen,
        cpucfg.mmu_supports_page_mapping(),
        cpucfg.supports_page_table_walker(),
    );
    if let Some(l1d) = cpucfg.l1_d_cache_geometry() {
        info!(
            "L1D: {} ways x {} sets x {} B = {} KiB",
            l1d.ways(),
            l1d.sets_per_way(),
            l1d.line_size_bytes(),
            l1d.size_bytes() / 1024
        );
    }
}

fn log_boot_map(map: &BootMemoryMap) {
    info!("boot memory map: {} regions", map.region_count());
    for r in map.regions() {
        info!(
            "  {} [{:#x}, {:#x}) ({} KiB)",
            r.region_type,
            r.physical_base,
            r.end(),
            r.size_bytes / 1024
        );
    }
}
