//! The channel factory: two fresh ports, pre-entangled.

use std::sync::Arc;

use crate::env::{AsyncHandle, Environment};
use crate::error::{Error, ErrorKind, Result};
use crate::port::port::Port;

/// How a binding-level constructor was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructKind {
    /// Invoked with the distinguished construct marker.
    Construct,
    /// Invoked as a plain call.
    Call,
}

/// A pair of entangled ports on the current thread.
///
/// Construction performs no I/O and fires no user callbacks; the ports
/// are ready to post but deliver nothing until started.
#[derive(Debug)]
pub struct MessageChannel {
    /// First endpoint.
    pub port1: Port,
    /// Second endpoint.
    pub port2: Port,
}

impl MessageChannel {
    /// Creates two fresh ports entangled with each other.
    ///
    /// Each port gets its own wake handle, both bound to the current
    /// thread's event loop.
    #[must_use]
    pub fn new(
        env: Arc<dyn Environment>,
        handle1: Arc<dyn AsyncHandle>,
        handle2: Arc<dyn AsyncHandle>,
    ) -> Self {
        let port1 = Port::new(Arc::clone(&env), handle1);
        let port2 = Port::new(env, handle2);
        Port::entangle(&port1, &port2);
        Self { port1, port2 }
    }

    /// Binding-level constructor: refuses plain calls.
    pub fn construct(
        kind: ConstructKind,
        env: Arc<dyn Environment>,
        handle1: Arc<dyn AsyncHandle>,
        handle2: Arc<dyn AsyncHandle>,
    ) -> Result<Self> {
        match kind {
            ConstructKind::Construct => Ok(Self::new(env, handle1, handle2)),
            ConstructKind::Call => Err(Error::new(ErrorKind::ConstructCallRequired)
                .with_context("channel constructor requires construct invocation")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::NullEnvironment;
    use crate::test_utils::LoopSignal;

    fn handles() -> (Arc<dyn AsyncHandle>, Arc<dyn AsyncHandle>) {
        (
            Arc::new(LoopSignal::default()),
            Arc::new(LoopSignal::default()),
        )
    }

    #[test]
    fn fresh_pair_is_entangled() {
        let (h1, h2) = handles();
        let channel = MessageChannel::new(Arc::new(NullEnvironment), h1, h2);
        assert!(!channel.port1.is_sibling_closed().unwrap());
        assert!(!channel.port2.is_sibling_closed().unwrap());
        channel.port1.close();
        channel.port2.close();
    }

    #[test]
    fn plain_call_is_rejected() {
        let (h1, h2) = handles();
        let err = MessageChannel::construct(ConstructKind::Call, Arc::new(NullEnvironment), h1, h2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstructCallRequired);
    }

    #[test]
    fn closing_one_side_closes_the_link() {
        let (h1, h2) = handles();
        let channel = MessageChannel::new(Arc::new(NullEnvironment), h1, h2);
        channel.port2.close();
        assert!(channel.port1.is_sibling_closed().unwrap());
        channel.port1.close();
    }
}
