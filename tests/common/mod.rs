#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::Arc;

use msgport::{AsyncHandle, Environment, MessageChannel, NullEnvironment};

pub use msgport::test_utils::{init_test_logging, LoopSignal, ManualLoop, TestEnvironment};
pub use msgport::{assert_with_log, test_complete, test_phase, test_section};

/// A channel plus the signals and pump that drive it, ready for a test.
pub struct ChannelFixture {
    pub channel: MessageChannel,
    pub signal1: Arc<LoopSignal>,
    pub signal2: Arc<LoopSignal>,
    pub pump: ManualLoop,
}

/// Builds an entangled pair on a fresh manual loop.
pub fn channel_fixture() -> ChannelFixture {
    channel_fixture_with_env(Arc::new(NullEnvironment))
}

/// Builds an entangled pair against a specific environment.
pub fn channel_fixture_with_env(env: Arc<dyn Environment>) -> ChannelFixture {
    let signal1 = Arc::new(LoopSignal::default());
    let signal2 = Arc::new(LoopSignal::default());
    let channel = MessageChannel::new(
        env,
        Arc::clone(&signal1) as Arc<dyn AsyncHandle>,
        Arc::clone(&signal2) as Arc<dyn AsyncHandle>,
    );
    let mut pump = ManualLoop::new();
    pump.register(Arc::clone(&signal1), channel.port1.clone());
    pump.register(Arc::clone(&signal2), channel.port2.clone());
    ChannelFixture {
        channel,
        signal1,
        signal2,
        pump,
    }
}
