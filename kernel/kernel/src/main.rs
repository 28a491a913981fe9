//! # Kernel Entry
//!
//! Freestanding LoongArch64 bring-up kernel for the QEMU virt board: early
//! memory and trap bring-up from direct-address mode into mapped
//! translation, with a higher-half stack and VM-backed heap at the end.
//!
//! The crate builds as a stub on non-LoongArch hosts so the workspace can
//! be type-checked and its library crates tested anywhere.

#![cfg_attr(target_arch = "loongarch64", no_std)]
#![cfg_attr(target_arch = "loongarch64", no_main)]
#![allow(unsafe_code)]

#[cfg(target_arch = "loongarch64")]
mod dtb;
#[cfg(target_arch = "loongarch64")]
mod heap;
#[cfg(target_arch = "loongarch64")]
mod init;
#[cfg(target_arch = "loongarch64")]
mod machine;
#[cfg(target_arch = "loongarch64")]
mod paging_hw;
#[cfg(all(target_arch = "loongarch64", feature = "selftest"))]
mod selftest;
#[cfg(target_arch = "loongarch64")]
mod timer;
#[cfg(target_arch = "loongarch64")]
mod trap;
#[cfg(target_arch = "loongarch64")]
mod vmem;

#[cfg(target_arch = "loongarch64")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    kernel_uart::uart_print!("\n*** PANIC ***\n{info}\n");
    machine::halt()
}

#[cfg(not(target_arch = "loongarch64"))]
fn main() {
    eprintln!("this kernel only runs on loongarch64-unknown-none");
}
