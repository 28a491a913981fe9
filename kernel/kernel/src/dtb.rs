//! Locating the device-tree blob.
//!
//! The boot environment does not hand us a trusted DTB pointer on the QEMU
//! direct-kernel path, so the bring-up driver scans the conventional
//! low-memory boot-info area for a structurally valid FDT header. The linker
//! script keeps the kernel image clear of this range.

use kernel_mmap::{device_tree_total_size, looks_like_device_tree_blob};

/// Start the scan at 4 so a null pointer is never dereferenced.
const SEARCH_BEGIN: usize = 0x4;
/// First 16 MiB of physical memory, the common firmware/boot-blob area.
const SEARCH_END: usize = 0x0100_0000;
const SEARCH_STRIDE: usize = 4;

/// A located DTB.
#[derive(Copy, Clone)]
pub struct DtbBlob {
    pub physical_base: u64,
    pub size_bytes: usize,
}

impl DtbBlob {
    /// The blob contents.
    ///
    /// # Safety
    /// Valid only while the blob's physical range is directly addressable
    /// (direct mode, or identity-mapped).
    #[must_use]
    pub unsafe fn bytes(&self) -> &'static [u8] {
        unsafe { core::slice::from_raw_parts(self.physical_base as *const u8, self.size_bytes) }
    }
}

/// Scan low physical memory for a coherent FDT header.
///
/// Returns the first candidate whose header checks out and whose totalsize
/// stays inside the search window.
pub fn locate() -> Option<DtbBlob> {
    let mut candidate = SEARCH_BEGIN;
    while candidate + 4 < SEARCH_END {
        // SAFETY: the window is RAM on the virt board and below the kernel
        // image; direct mode is active during the scan.
        let header = unsafe { core::slice::from_raw_parts(candidate as *const u8, 40) };
        if looks_like_device_tree_blob(header) {
            if let Some(total) = device_tree_total_size(header)
                && candidate + total <= SEARCH_END
            {
                return Some(DtbBlob {
                    physical_base: candidate as u64,
                    size_bytes: total,
                });
            }
        }
        candidate += SEARCH_STRIDE;
    }
    None
}
