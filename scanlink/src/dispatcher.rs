//! Single-consumer delivery of scan strings.

use crate::error::Error;
use log::{debug, error, warn};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// What a scan consumer returns.
pub type ConsumerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A registered scan consumer.
pub type ScanCallback = Box<dyn FnMut(&str) -> ConsumerResult + Send>;

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The consumer ran to completion.
    Delivered,
    /// No consumer was registered; the scan was dropped.
    NoConsumer,
    /// The consumer returned an error or panicked.
    ConsumerFailed,
}

/// Holds at most one consumer and invokes it once per scan.
///
/// Consumer failures (errors and panics) stop here.
#[derive(Default)]
pub struct ScanDispatcher {
    slot: Option<ScanCallback>,
}

impl fmt::Debug for ScanDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanDispatcher")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl ScanDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `callback`, replacing any previous consumer.
    ///
    /// Returns `true` if a consumer was replaced.
    pub fn register<F>(&mut self, callback: F) -> bool
    where
        F: FnMut(&str) -> ConsumerResult + Send + 'static,
    {
        self.register_boxed(Box::new(callback))
    }

    /// Install an already boxed consumer.
    pub fn register_boxed(&mut self, callback: ScanCallback) -> bool {
        let replaced = self.slot.replace(callback).is_some();
        debug!("Scan consumer registered (replaced previous: {replaced})");
        replaced
    }

    /// Remove the consumer. Returns `true` if one was registered.
    pub fn unregister(&mut self) -> bool {
        let removed = self.slot.take().is_some();
        debug!("Scan consumer unregistered (was registered: {removed})");
        removed
    }

    /// Whether a consumer is installed.
    pub fn is_registered(&self) -> bool {
        self.slot.is_some()
    }

    /// Deliver one scan to the consumer.
    pub fn dispatch(&mut self, scan: &str) -> DispatchOutcome {
        let Some(callback) = self.slot.as_mut() else {
            warn!("No scan consumer registered, dropping scan {scan:?}");
            return DispatchOutcome::NoConsumer;
        };

        debug!("Dispatching scan {scan:?}");
        match panic::catch_unwind(AssertUnwindSafe(|| callback(scan))) {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => {
                error!("{}", Error::Consumer(e.to_string()));
                DispatchOutcome::ConsumerFailed
            },
            Err(payload) => {
                error!(
                    "{}",
                    Error::Consumer(format!("panicked: {}", panic_message(payload.as_ref())))
                );
                DispatchOutcome::ConsumerFailed
            },
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
