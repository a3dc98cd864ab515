//! Test utilities for msgport.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A manual event-loop pump for driving port delivery deterministically
//! - A scriptable environment for shutdown-path tests
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use msgport::test_utils::{init_test_logging, LoopSignal, ManualLoop};
//! use msgport::{AsyncHandle, MessageChannel, NullEnvironment, Value};
//!
//! init_test_logging();
//! let s1 = Arc::new(LoopSignal::default());
//! let s2 = Arc::new(LoopSignal::default());
//! let channel = MessageChannel::new(
//!     Arc::new(NullEnvironment),
//!     s1.clone() as Arc<dyn AsyncHandle>,
//!     s2.clone() as Arc<dyn AsyncHandle>,
//! );
//! channel.port2.set_on_message(|v| assert!(v.is_some()));
//! channel.port2.start().unwrap();
//! channel.port1.post_message(&Value::Int(1), &[]).unwrap();
//!
//! let mut pump = ManualLoop::new();
//! pump.register(s2, channel.port2.clone());
//! pump.run_until_idle();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use tracing_subscriber::fmt::format::FmtSpan;

use crate::env::{AsyncHandle, Environment};
use crate::port::Port;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// A flag-based wake handle.
///
/// [`signal`](AsyncHandle::signal) marks the handle pending from any
/// thread; a loop (usually [`ManualLoop`]) consumes the flag with
/// [`take`](Self::take) and runs the port's delivery routine. The ref
/// state models event-loop keepalive.
#[derive(Debug)]
pub struct LoopSignal {
    pending: AtomicBool,
    keepalive: AtomicBool,
}

impl Default for LoopSignal {
    fn default() -> Self {
        Self {
            pending: AtomicBool::new(false),
            keepalive: AtomicBool::new(true),
        }
    }
}

impl LoopSignal {
    /// Consumes the pending flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Returns whether a wake-up is pending without consuming it.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

impl AsyncHandle for LoopSignal {
    fn signal(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    fn ref_(&self) {
        self.keepalive.store(true, Ordering::SeqCst);
    }

    fn unref(&self) {
        self.keepalive.store(false, Ordering::SeqCst);
    }

    fn has_ref(&self) -> bool {
        self.keepalive.load(Ordering::SeqCst)
    }
}

/// A manual event-loop pump.
///
/// Stands in for the owner thread's event loop in tests: each
/// [`turn`](Self::turn) runs the delivery routine of every port whose
/// signal fired, and [`run_until_idle`](Self::run_until_idle) keeps
/// turning until nothing is pending. Delivery re-arms (decode failures,
/// missing callbacks) terminate because each turn consumes one message.
#[derive(Default)]
pub struct ManualLoop {
    entries: Vec<(Arc<LoopSignal>, Port)>,
}

impl ManualLoop {
    /// Creates an empty pump.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a port and the signal its wake handle sets.
    pub fn register(&mut self, signal: Arc<LoopSignal>, port: Port) {
        self.entries.push((signal, port));
    }

    /// Runs one pass over all registered ports. Returns true if any
    /// delivery routine ran.
    pub fn turn(&mut self) -> bool {
        let mut ran = false;
        for (signal, port) in &self.entries {
            if signal.take() {
                port.process_messages();
                ran = true;
            }
        }
        ran
    }

    /// Turns until no signal is pending.
    pub fn run_until_idle(&mut self) {
        while self.turn() {}
    }
}

/// An environment whose user-code gate can be flipped by the test.
#[derive(Debug, Default)]
pub struct TestEnvironment {
    shutdown: AtomicBool,
}

impl TestEnvironment {
    /// Scripts whether user callbacks may run.
    pub fn set_can_invoke_user_code(&self, can: bool) {
        self.shutdown.store(!can, Ordering::SeqCst);
    }
}

impl Environment for TestEnvironment {
    fn can_invoke_user_code(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        let __assert_with_log_cond = $cond;
        let __assert_with_log_expected = &$expected;
        let __assert_with_log_actual = &$actual;
        tracing::debug!(
            expected = ?__assert_with_log_expected,
            actual = ?__assert_with_log_actual,
            "Asserting: {}",
            $msg
        );
        assert!(
            __assert_with_log_cond,
            "{}: expected {:?}, got {:?}",
            $msg,
            __assert_with_log_expected,
            __assert_with_log_actual
        );
    }};
}
