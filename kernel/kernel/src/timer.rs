//! CPU-local timer programming and global interrupt control.
//!
//! The timer lives entirely in CSRs: TCFG configures and starts the
//! countdown, TICLR clears a pending expiry, ECFG.IM gates delivery of the
//! timer line, and CRMD.IE gates interrupt delivery globally.

#![allow(dead_code)]

use kernel_registers::{Crmd, Ecfg, LoadCsr, StoreCsr, Tcfg, Ticlr};

/// Set CRMD.IE.
pub fn enable_interrupts() {
    unsafe {
        let crmd = Crmd::load();
        crmd.with_ie(true).store();
    }
}

/// Clear CRMD.IE.
pub fn disable_interrupts() {
    unsafe {
        let crmd = Crmd::load();
        crmd.with_ie(false).store();
    }
}

/// ECFG.IM ← 0: no interrupt line may deliver. Keeps unified vectoring.
pub fn mask_all_interrupt_lines() {
    unsafe { Ecfg::all_masked().store() }
}

/// Permit delivery of the CPU-local timer line (IM bit 11). CRMD.IE still
/// gates actual delivery.
pub fn unmask_timer_interrupt_line() {
    unsafe {
        let ecfg = Ecfg::load();
        ecfg.with_timer_line_unmasked().store();
    }
}

/// Program a one-shot countdown of `ticks`.
///
/// Stops any running timer and clears a stale pending interrupt first, so
/// an expiry observed afterwards is from this countdown.
pub fn start_one_shot_timer_ticks(ticks: u64) {
    stop_timer();
    clear_timer_interrupt();
    unsafe { Tcfg::one_shot(ticks).store() }
}

/// TCFG ← 0: disable the timer.
pub fn stop_timer() {
    unsafe { Tcfg::stopped().store() }
}

/// Acknowledge a pending timer interrupt (TICLR.CLR ← 1).
pub fn clear_timer_interrupt() {
    unsafe { Ticlr::clear_timer().store() }
}
