//! A `log::Log` implementor, installed once per process. Grounded on
//! `examples/valibali-cluu/kernel/src/utils/logger.rs` (`CluuLogger`): same shape — a unit struct
//! implementing `log::Log`, a single `static` instance, an idempotent `init()` — adapted here to
//! tag each record with the owning cooperator's name and the currently-scheduled context's name,
//! since a single process may run several cooperators each multiplexing many contexts and a bare
//! `[{level}] {args}` line wouldn't say which one logged.

use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record};

struct CoopLogger;

impl Log for CoopLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match (crate::current::cooperator(), crate::current::current()) {
            (Some(coop), Some(ctx)) => {
                let coop_name = unsafe { coop.as_ref().name() };
                let ctx_name = unsafe { ctx.as_ref().name() };
                eprintln!("[{}] [{coop_name}/{ctx_name}] {}", record.level(), record.args());
            }
            (Some(coop), None) => {
                let coop_name = unsafe { coop.as_ref().name() };
                eprintln!("[{}] [{coop_name}] {}", record.level(), record.args());
            }
            _ => eprintln!("[{}] {}", record.level(), record.args()),
        }
    }

    fn flush(&self) {}
}

static LOGGER: CoopLogger = CoopLogger;
static INIT: Once = Once::new();

/// Install the logger as the global `log` facade backend. Idempotent — safe to call from every
/// cooperator's `Launch`; only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(LevelFilter::Trace))
            .expect("coop::logging::init raced with another logger installation");
    });
}
