//! Paging hardware bring-up: walker CSRs, TLB invalidation, and the flip
//! from direct-address to mapped translation.

use kernel_registers::{Crmd, LoadCsr, StoreCsr, csr, write_raw};
use kernel_vmem::PhysAddr;
use kernel_vmem::walker::WalkerConfig;

/// Program the page-walk shape and both root pointers.
///
/// PGDL and PGDH share one root during bring-up: the same tree serves the
/// lower and higher halves until the kernel is fully relocated.
pub fn configure_page_walker(root: PhysAddr, config: WalkerConfig) {
    unsafe {
        write_raw::<{ csr::PWCL }>(u64::from(config.pwcl.into_bits()));
        write_raw::<{ csr::PWCH }>(u64::from(config.pwch.into_bits()));
        write_raw::<{ csr::PGDL }>(root.as_u64());
        write_raw::<{ csr::PGDH }>(root.as_u64());
    }
    kernel_registers::dbar();
}

// TODO: add a software TLB-refill path (lddir/ldpte at TLBRENTRY) for cores
// without CPUCFG word 2 HPTW; refill currently funnels into the unified
// entry and dumps.

/// Invalidate the TLB and switch CRMD from DA to PG in one CSR write.
///
/// # Safety
/// Everything the next instructions touch (the executing code, the stack,
/// the UART, the page tables, the PMM bitmap) must already be reachable in
/// mapped mode, and the walker CSRs must be programmed.
pub unsafe fn enable_paging() {
    unsafe {
        kernel_registers::invtlb_all();
    }
    kernel_registers::dbar();
    unsafe {
        let crmd = Crmd::load();
        crmd.with_pg(true).with_da(false).store();
    }
    kernel_registers::dbar();
}
