//! Trap and interrupt pipeline.
//!
//! Every exception and interrupt funnels through one unified entry
//! ([`exception_entry`], installed into CSR.EENTRY, CSR.TLBRENTRY and
//! CSR.MERRENTRY). The assembly stub builds a [`TrapFrame`] on the current
//! stack, calls [`trap_handler`], writes the (possibly modified) return
//! address back to CSR.ERA and executes `ertn`, so a handler can skip the
//! faulting 4-byte instruction by advancing `tf.era`.
//!
//! Handled events: the CPU-local timer interrupt, BREAK (skipped, for the
//! ERTN proof path), and faults explicitly armed as *expected* by the
//! self-tests. Everything else dumps the frame plus the translation CSRs to
//! the UART and halts.

#![allow(dead_code)]

use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use kernel_registers::{Ecfg, Estat, StoreCsr, csr, read_raw, write_raw};
use kernel_uart::{UART0_BASE, Uart16550};

use crate::machine;
use crate::timer;

/// Machine state captured at exception entry.
///
/// Hard ABI with the entry stub: 32 GPR slots (`gpr[3]` holds the
/// pre-exception stack pointer) followed by the ERA/ESTAT/BADV/CRMD/PRMD/
/// ECFG snapshots, 304 bytes total.
#[repr(C)]
pub struct TrapFrame {
    pub gpr: [u64; 32],
    pub era: u64,
    pub estat: u64,
    pub badv: u64,
    pub crmd: u64,
    pub prmd: u64,
    pub ecfg: u64,
}

const TRAP_FRAME_SIZE: usize = 304;
const _: () = {
    // The entry stub below stores by these exact offsets.
    assert!(core::mem::size_of::<TrapFrame>() == TRAP_FRAME_SIZE);
    assert!(core::mem::offset_of!(TrapFrame, gpr) == 0);
    assert!(core::mem::offset_of!(TrapFrame, era) == 256);
    assert!(core::mem::offset_of!(TrapFrame, estat) == 264);
    assert!(core::mem::offset_of!(TrapFrame, badv) == 272);
    assert!(core::mem::offset_of!(TrapFrame, crmd) == 280);
    assert!(core::mem::offset_of!(TrapFrame, prmd) == 288);
    assert!(core::mem::offset_of!(TrapFrame, ecfg) == 296);
};

// Unified exception entry.
//
// Layout contract with `TrapFrame`: GPR r{i} at offset i*8, CSRs from 256.
// The entry must be 4 KiB aligned because hardware ignores the low 12 bits
// of the entry CSRs.
core::arch::global_asm!(
    ".section .text.trap_entry, \"ax\", @progbits",
    ".balign 4096",
    ".global exception_entry",
    ".type exception_entry, @function",
    "exception_entry:",
    "addi.d  $sp, $sp, -304",
    "st.d    $zero, $sp, 0",
    "st.d    $ra, $sp, 8",
    "st.d    $tp, $sp, 16",
    "st.d    $a0, $sp, 32",
    "st.d    $a1, $sp, 40",
    "st.d    $a2, $sp, 48",
    "st.d    $a3, $sp, 56",
    "st.d    $a4, $sp, 64",
    "st.d    $a5, $sp, 72",
    "st.d    $a6, $sp, 80",
    "st.d    $a7, $sp, 88",
    "st.d    $t0, $sp, 96",
    "st.d    $t1, $sp, 104",
    "st.d    $t2, $sp, 112",
    "st.d    $t3, $sp, 120",
    "st.d    $t4, $sp, 128",
    "st.d    $t5, $sp, 136",
    "st.d    $t6, $sp, 144",
    "st.d    $t7, $sp, 152",
    "st.d    $t8, $sp, 160",
    "st.d    $r21, $sp, 168",
    "st.d    $fp, $sp, 176",
    "st.d    $s0, $sp, 184",
    "st.d    $s1, $sp, 192",
    "st.d    $s2, $sp, 200",
    "st.d    $s3, $sp, 208",
    "st.d    $s4, $sp, 216",
    "st.d    $s5, $sp, 224",
    "st.d    $s6, $sp, 232",
    "st.d    $s7, $sp, 240",
    "st.d    $s8, $sp, 248",
    // Pre-exception stack pointer into the r3 slot.
    "addi.d  $t0, $sp, 304",
    "st.d    $t0, $sp, 24",
    // CSR snapshots.
    "csrrd   $t0, 0x6", // ERA
    "st.d    $t0, $sp, 256",
    "csrrd   $t0, 0x5", // ESTAT
    "st.d    $t0, $sp, 264",
    "csrrd   $t0, 0x7", // BADV
    "st.d    $t0, $sp, 272",
    "csrrd   $t0, 0x0", // CRMD
    "st.d    $t0, $sp, 280",
    "csrrd   $t0, 0x1", // PRMD
    "st.d    $t0, $sp, 288",
    "csrrd   $t0, 0x4", // ECFG
    "st.d    $t0, $sp, 296",
    "move    $a0, $sp",
    "bl      trap_handler",
    // The handler may have rewritten the return address.
    "ld.d    $t0, $sp, 256",
    "csrwr   $t0, 0x6",
    "ld.d    $ra, $sp, 8",
    "ld.d    $tp, $sp, 16",
    "ld.d    $a0, $sp, 32",
    "ld.d    $a1, $sp, 40",
    "ld.d    $a2, $sp, 48",
    "ld.d    $a3, $sp, 56",
    "ld.d    $a4, $sp, 64",
    "ld.d    $a5, $sp, 72",
    "ld.d    $a6, $sp, 80",
    "ld.d    $a7, $sp, 88",
    "ld.d    $t0, $sp, 96",
    "ld.d    $t1, $sp, 104",
    "ld.d    $t2, $sp, 112",
    "ld.d    $t3, $sp, 120",
    "ld.d    $t4, $sp, 128",
    "ld.d    $t5, $sp, 136",
    "ld.d    $t6, $sp, 144",
    "ld.d    $t7, $sp, 152",
    "ld.d    $t8, $sp, 160",
    "ld.d    $r21, $sp, 168",
    "ld.d    $fp, $sp, 176",
    "ld.d    $s0, $sp, 184",
    "ld.d    $s1, $sp, 192",
    "ld.d    $s2, $sp, 200",
    "ld.d    $s3, $sp, 208",
    "ld.d    $s4, $sp, 216",
    "ld.d    $s5, $sp, 224",
    "ld.d    $s6, $sp, 232",
    "ld.d    $s7, $sp, 240",
    "ld.d    $s8, $sp, 248",
    "addi.d  $sp, $sp, 304",
    "ertn",
    ".size exception_entry, . - exception_entry",
);

unsafe extern "C" {
    fn exception_entry();
}

/// Address of the unified entry (physical/identity view).
#[must_use]
pub fn entry_address() -> u64 {
    exception_entry as usize as u64
}

/// Exception codes from ESTAT.Ecode, subset used during bring-up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Exccode {
    /// Interrupt; decode ESTAT.IS for the line.
    Int = 0x0,
    /// Page invalid on load.
    Pil = 0x1,
    /// Page invalid on store.
    Pis = 0x2,
    /// Page invalid on fetch.
    Pif = 0x3,
    /// Page modify (store to a clean page).
    Pme = 0x4,
    /// Page non-readable.
    Pnr = 0x5,
    /// Page non-executable.
    Pnx = 0x6,
    /// Page privilege insufficient.
    Ppi = 0x7,
    /// Address alignment error.
    Ale = 0x9,
    /// System call.
    Sys = 0xB,
    /// Breakpoint.
    Brk = 0xC,
    /// Instruction non-defined.
    Ine = 0xD,
}

impl Exccode {
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x0 => Self::Int,
            0x1 => Self::Pil,
            0x2 => Self::Pis,
            0x3 => Self::Pif,
            0x4 => Self::Pme,
            0x5 => Self::Pnr,
            0x6 => Self::Pnx,
            0x7 => Self::Ppi,
            0x9 => Self::Ale,
            0xB => Self::Sys,
            0xC => Self::Brk,
            0xD => Self::Ine,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Pil => "PIL",
            Self::Pis => "PIS",
            Self::Pif => "PIF",
            Self::Pme => "PME",
            Self::Pnr => "PNR",
            Self::Pnx => "PNX",
            Self::Ppi => "PPI",
            Self::Ale => "ALE",
            Self::Sys => "SYS",
            Self::Brk => "BRK",
            Self::Ine => "INE",
        }
    }
}

/// LoongArch instructions are fixed 4 bytes; skipping the faulting
/// instruction means advancing ERA by this much.
const INSTRUCTION_BYTES: u64 = 4;

// Observations for the self-tests and the armed-fault mechanism. Plain
// atomics: single core, and the handler runs with interrupts disabled.
static BREAK_TRAPS: AtomicU64 = AtomicU64::new(0);
static TIMER_OBSERVED: AtomicBool = AtomicBool::new(false);
static ARMED: AtomicBool = AtomicBool::new(false);
static ARMED_CODE: AtomicU64 = AtomicU64::new(0);
static ARMED_BADV: AtomicU64 = AtomicU64::new(0);
static ARMED_HIT: AtomicBool = AtomicBool::new(false);

/// Install the unified entry and mask every interrupt source.
///
/// ECFG is cleared (all IM lines off, VS=0 so vectoring is unified), and
/// EENTRY/TLBRENTRY/MERRENTRY all point at [`exception_entry`].
pub fn init() {
    unsafe {
        Ecfg::all_masked().store();
        let entry = entry_address();
        write_raw::<{ csr::EENTRY }>(entry);
        write_raw::<{ csr::TLBRENTRY }>(entry);
        write_raw::<{ csr::MERRENTRY }>(entry);
    }
    kernel_registers::dbar();
}

/// Re-point the general-exception and machine-error entries (not the TLB
/// refill entry) at `entry_base`, for the higher-half handoff.
pub fn set_general_entry(entry_base: u64) {
    unsafe {
        write_raw::<{ csr::EENTRY }>(entry_base);
        write_raw::<{ csr::MERRENTRY }>(entry_base);
    }
    kernel_registers::dbar();
}

/// Number of BREAK traps taken since the last reset.
pub fn break_trap_count() -> u64 {
    BREAK_TRAPS.load(Ordering::Relaxed)
}

/// Whether a timer interrupt has been delivered since the last reset.
pub fn timer_interrupt_observed() -> bool {
    TIMER_OBSERVED.load(Ordering::Relaxed)
}

/// Clear all trap observations.
pub fn reset_trap_observations() {
    BREAK_TRAPS.store(0, Ordering::Relaxed);
    TIMER_OBSERVED.store(false, Ordering::Relaxed);
    ARMED.store(false, Ordering::Relaxed);
    ARMED_HIT.store(false, Ordering::Relaxed);
}

/// Declare the next fault with `code` and this bad virtual address as
/// expected: the handler will record it, skip the faulting instruction and
/// resume instead of dumping.
pub fn arm_expected_fault(code: Exccode, badv: u64) {
    ARMED_CODE.store(code as u64, Ordering::Relaxed);
    ARMED_BADV.store(badv, Ordering::Relaxed);
    ARMED_HIT.store(false, Ordering::Relaxed);
    ARMED.store(true, Ordering::Relaxed);
}

/// Whether the armed fault fired. Disarms implicitly when it did.
pub fn expected_fault_observed() -> bool {
    ARMED_HIT.load(Ordering::Relaxed)
}

#[unsafe(no_mangle)]
extern "C" fn trap_handler(tf: &mut TrapFrame) {
    let estat = Estat::from_bits(tf.estat);
    let code = estat.ecode();
    let exc = Exccode::from_code(code);

    // Interrupts arrive with Ecode=0 and the pending lines in ESTAT.IS.
    if exc == Some(Exccode::Int) && estat.timer_pending() {
        timer::clear_timer_interrupt();
        timer::stop_timer();
        TIMER_OBSERVED.store(true, Ordering::Relaxed);
        return;
    }

    // An armed expected fault resumes past the faulting instruction.
    if ARMED.load(Ordering::Relaxed)
        && u64::from(code) == ARMED_CODE.load(Ordering::Relaxed)
        && tf.badv == ARMED_BADV.load(Ordering::Relaxed)
    {
        ARMED.store(false, Ordering::Relaxed);
        ARMED_HIT.store(true, Ordering::Relaxed);
        tf.era += INSTRUCTION_BYTES;
        return;
    }

    if exc == Some(Exccode::Brk) {
        BREAK_TRAPS.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "BRK at era={:#x} subcode={:#x}; resuming past it",
            tf.era,
            estat.esubcode()
        );
        tf.era += INSTRUCTION_BYTES;
        return;
    }

    fatal_dump(tf, estat, exc)
}

/// Dump the frame and every translation-relevant CSR, then halt.
///
/// Writes through a private UART handle rather than the logger: the fault
/// may have happened while the console lock was held.
fn fatal_dump(tf: &TrapFrame, estat: Estat, exc: Option<Exccode>) -> ! {
    // SAFETY: fixed platform UART, reachable in both translation modes via
    // the identity MMIO mapping.
    let uart = unsafe { Uart16550::new(UART0_BASE) };
    let mut out = &uart;

    let _ = writeln!(out, "\n*** TRAP ***");
    let _ = writeln!(
        out,
        "EXC:   {:#x} ({}) SUB: {:#x}",
        estat.ecode(),
        exc.map_or("?", Exccode::name),
        estat.esubcode()
    );
    let _ = writeln!(out, "ERA:   {:#018x}", tf.era);
    let _ = writeln!(out, "ESTAT: {:#018x}", tf.estat);
    let _ = writeln!(out, "BADV:  {:#018x}", tf.badv);
    let _ = writeln!(out, "CRMD:  {:#018x}", tf.crmd);
    let _ = writeln!(out, "PRMD:  {:#018x}", tf.prmd);
    let _ = writeln!(out, "ECFG:  {:#018x}", tf.ecfg);

    unsafe {
        let _ = writeln!(out, "TLBRENTRY: {:#018x}", read_raw::<{ csr::TLBRENTRY }>());
        let _ = writeln!(out, "TLBRERA:   {:#018x}", read_raw::<{ csr::TLBRERA }>());
        let _ = writeln!(out, "TLBREHI:   {:#018x}", read_raw::<{ csr::TLBREHI }>());
        let _ = writeln!(out, "TLBRBADV:  {:#018x}", read_raw::<{ csr::TLBRBADV }>());
        let _ = writeln!(out, "PGDL:      {:#018x}", read_raw::<{ csr::PGDL }>());
        let _ = writeln!(out, "PGDH:      {:#018x}", read_raw::<{ csr::PGDH }>());
        let _ = writeln!(out, "PGD:       {:#018x}", read_raw::<{ csr::PGD }>());
        let _ = writeln!(out, "PWCL:      {:#018x}", read_raw::<{ csr::PWCL }>());
        let _ = writeln!(out, "PWCH:      {:#018x}", read_raw::<{ csr::PWCH }>());
        let _ = writeln!(out, "RVACFG:    {:#018x}", read_raw::<{ csr::RVACFG }>());
        let _ = writeln!(out, "ASID:      {:#018x}", read_raw::<{ csr::ASID }>());
        let _ = writeln!(out, "TLBIDX:    {:#018x}", read_raw::<{ csr::TLBIDX }>());
        let _ = writeln!(out, "TLBEHI:    {:#018x}", read_raw::<{ csr::TLBEHI }>());
    }

    machine::halt()
}
