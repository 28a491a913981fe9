//! Kernel heap stages.
//!
//! Stage 1 points the global allocator at a small static buffer in `.bss`
//! (the bootstrap heap) so early code can allocate before the PMM exists.
//! After paging is enabled and the VM-backed heap region is mapped, the
//! higher-half continuation donates that region to the same allocator.

use buddy_system_allocator::LockedHeap;

#[global_allocator]
static HEAP: LockedHeap<32> = LockedHeap::empty();

/// Size of the static bootstrap heap buffer.
pub const BOOTSTRAP_HEAP_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct HeapMem([u8; BOOTSTRAP_HEAP_SIZE]);

/// Backing storage for the bootstrap heap. Lives inside the kernel image,
/// which the PMM reserves wholesale, so the two never collide.
#[unsafe(link_section = ".bss.heap")]
static mut BOOTSTRAP_HEAP: HeapMem = HeapMem([0; BOOTSTRAP_HEAP_SIZE]);

/// Point the allocator at the bootstrap buffer. Call exactly once, before
/// anything allocates.
#[allow(static_mut_refs)]
pub fn init_bootstrap_heap() {
    let start = unsafe { (&raw const BOOTSTRAP_HEAP.0).cast::<u8>() as usize };
    // SAFETY: the buffer is static, 16-byte aligned, and donated only once.
    unsafe {
        HEAP.lock().init(start, BOOTSTRAP_HEAP_SIZE);
    }
}

/// Donate the mapped VM-backed heap region to the allocator.
///
/// # Safety
/// `[base, base + size)` must be mapped read-write in the current address
/// space, unused by anything else, and donated only once.
pub unsafe fn add_vm_backed_region(base: usize, size: usize) {
    unsafe {
        HEAP.lock().add_to_heap(base, base + size);
    }
}
