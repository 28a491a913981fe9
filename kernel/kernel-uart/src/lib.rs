//! # UART Console Support
//!
//! Byte-level output through the 16550-compatible UART of the QEMU
//! LoongArch virt board, plus a [`log::Log`] implementation so the kernel
//! can use the standard logging macros from the first instruction of the
//! Rust entry point.
//!
//! Two output paths exist on purpose:
//!
//! * [`UartLogger`] routes `log::info!` and friends through a spinlocked
//!   sink; this is the normal boot-log path.
//! * [`uart_print!`] writes through the same sink best-effort without the
//!   logging framework. The trap path uses it, since a fatal dump must not
//!   depend on logger state.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::UartLogger;

use core::fmt;
use spin::Mutex;

/// MMIO base of the first 16550 UART on the QEMU LoongArch virt board.
pub const UART0_BASE: usize = 0x1fe0_01e0;

/// Byte window of a 16550-compatible UART.
///
/// The bring-up kernel needs exactly one operation: write one character.
/// The transmit path polls LSR.THRE so back-to-back writes cannot outrun
/// the transmit holding register.
pub struct Uart16550 {
    base: usize,
}

/// Transmitter-holding-register-empty bit in the line status register.
const LSR_THRE: u8 = 1 << 5;

/// Register offsets within the byte window.
const THR: usize = 0;
const LSR: usize = 5;

impl Uart16550 {
    /// Bind to the UART at `base`.
    ///
    /// # Safety
    /// `base` must be the MMIO window of a 16550-compatible UART, accessible
    /// in the current translation mode.
    #[must_use]
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn read_register(&self, offset: usize) -> u8 {
        // SAFETY: per the constructor contract, `base + offset` is a live
        // device register.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u8) }
    }

    fn write_register(&self, offset: usize, value: u8) {
        // SAFETY: as in `read_register`.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u8, value) }
    }

    /// Blocking write of one byte.
    pub fn putc(&self, byte: u8) {
        while self.read_register(LSR) & LSR_THRE == 0 {
            core::hint::spin_loop();
        }
        self.write_register(THR, byte);
    }

    pub fn put_str(&self, s: &str) {
        for b in s.bytes() {
            if b == b'\n' {
                self.putc(b'\r');
            }
            self.putc(b);
        }
    }
}

impl fmt::Write for &Uart16550 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put_str(s);
        Ok(())
    }
}

/// The console sink shared by the logger and [`uart_print!`].
static CONSOLE: Mutex<Option<Uart16550>> = Mutex::new(None);

/// Install the console sink. Idempotent; the first caller wins.
pub fn install_console(uart: Uart16550) {
    let mut console = CONSOLE.lock();
    if console.is_none() {
        *console = Some(uart);
    }
}

#[doc(hidden)]
pub fn console_write(args: fmt::Arguments) {
    use fmt::Write;
    let console = CONSOLE.lock();
    if let Some(uart) = console.as_ref() {
        // Best-effort; the sink itself cannot fail.
        let _ = (&mut &*uart).write_fmt(args);
    }
}

/// Raw formatted output to the console, bypassing the `log` framework.
#[macro_export]
macro_rules! uart_print {
    ($($arg:tt)*) => {{
        $crate::console_write(core::format_args!($($arg)*));
    }};
}
