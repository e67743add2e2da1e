//! Injected logging collaborator
//!
//! Components never reach for a global logger themselves. They hold a
//! [`Diagnostics`] handle given to them by the host, which decides where
//! records go. The default handle forwards to whatever logger the process
//! installed through the `log` facade.

use std::any::Any;
use std::fmt;

use log::{Level, Log, Record};

/// Target used for every record emitted by this crate
pub const TARGET: &str = "report_merge";

/// Handle to the host's logger
#[derive(Clone, Copy)]
pub struct Diagnostics<'a> {
    log: &'a dyn Log,
}

impl<'a> Diagnostics<'a> {
    /// Send records to `log` instead of the process-wide logger
    pub fn new(log: &'a dyn Log) -> Self {
        Self { log }
    }

    pub(crate) fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        self.log.log(
            &Record::builder()
                .level(level)
                .target(TARGET)
                .module_path_static(Some(module_path!()))
                .args(args)
                .build(),
        );
    }

    pub(crate) fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Error, args);
    }

    pub(crate) fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, args);
    }

    pub(crate) fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, args);
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, args);
    }
}

impl Default for Diagnostics<'static> {
    fn default() -> Self {
        Self { log: log::logger() }
    }
}

impl fmt::Debug for Diagnostics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Diagnostics")
    }
}

/// Text of a panic caught with `catch_unwind`
///
/// The message becomes part of a rejection reason, so it reaches the host
/// through [`Diagnostics`]. Whatever the default panic hook prints to stderr
/// is up to the host's own hook.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
