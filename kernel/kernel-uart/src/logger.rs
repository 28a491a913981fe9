//! `log` backend for the UART console.
//!
//! Each record is rendered in one [`uart_print!`] call, so the whole line is
//! emitted under a single sink lock and concurrent trap output cannot split
//! it. Lines are prefixed with the stable counter (`rdtime.d`) so the boot
//! log doubles as a coarse timeline of the bring-up stages.

use crate::uart_print;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

/// `log::Log` implementation writing through the console sink.
pub struct UartLogger {
    max_level: LevelFilter,
}

static LOGGER: Once<UartLogger> = Once::new();

impl UartLogger {
    /// Install as the global logger with the given threshold. Call once
    /// during early init, after [`install_console`](crate::install_console);
    /// later calls keep the first threshold.
    pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = LOGGER.call_once(|| UartLogger { max_level });
        log::set_logger(logger)?;
        // Filtering happens in `enabled`; tell the facade the same limit so
        // disabled records are skipped before argument capture.
        log::set_max_level(logger.max_level);
        Ok(())
    }
}

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        uart_print!(
            "[{ticks:>12}] {level:<5} {target}: {args}\n",
            ticks = time_counter_ticks(),
            level = record.level(),
            target = record.target(),
            args = record.args(),
        );
    }

    fn flush(&self) {
        // The 16550 sink polls LSR.THRE per byte; nothing is buffered here.
    }
}

#[cfg(target_arch = "loongarch64")]
fn time_counter_ticks() -> u64 {
    kernel_registers::rdtime_d()
}

#[cfg(not(target_arch = "loongarch64"))]
fn time_counter_ticks() -> u64 {
    0
}
