//! # Physical Memory Allocation
//!
//! The physical memory manager (PMM) for the bring-up kernel: a page-granular
//! bitmap allocator over the contiguous span of boot-reported usable RAM.
//!
//! The allocator's own metadata comes from the **bootstrap allocator**: the
//! bitmap is allocated from the early heap, whose static buffer lives inside
//! the kernel image range. The image is reserved wholesale during
//! initialization, so the metadata never consumes an allocatable page, and
//! since the image stays identity-mapped across the switch to mapped
//! translation, the bitmap stays addressable in both modes without any
//! translation help.
//!
//! Key policy:
//! - Pages not explicitly described as usable RAM are never allocatable.
//! - Reserved regions always win over usable ones.
//! - The kernel image, the DTB blob, and physical page 0 are reserved up
//!   front.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;

pub use crate::frame_alloc::{BitmapFrameAlloc, FreePageError, PmmInitError};
