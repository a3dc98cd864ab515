//! Interfaces to the embedding runtime.
//!
//! The subsystem does not own an event loop or a user-code execution
//! context; it talks to them through two capabilities:
//!
//! - [`AsyncHandle`]: a thread-safe "signal and run on the owning loop"
//!   primitive. Any implementation that eventually invokes the port's
//!   delivery routine on the owner thread after [`signal`](AsyncHandle::signal)
//!   satisfies the contract.
//! - [`Environment`]: the runtime that executes user callbacks. It gates
//!   delivery during shutdown and optionally extends the codec with
//!   host-object translation.
//!
//! [`NullEnvironment`] is the identity implementation: user code always
//! runs, host objects are refused.

use crate::codec::{CodecError, WireDecoder, WireEncoder};
use crate::value::HostObject;

/// An asynchronous wake-up handle bound to one owner thread's event loop.
///
/// `signal` may be called from any thread; the loop reacts by invoking the
/// owning port's delivery routine. The ref/unref pair controls whether the
/// handle keeps the owning loop alive, mirroring the usual event-loop
/// keepalive semantics.
pub trait AsyncHandle: Send + Sync {
    /// Requests that the owner loop run the port's delivery routine soon.
    fn signal(&self);

    /// Makes this handle keep the owner loop alive.
    fn ref_(&self) {}

    /// Stops this handle from keeping the owner loop alive.
    fn unref(&self) {}

    /// Returns true if this handle currently keeps the loop alive.
    fn has_ref(&self) -> bool {
        true
    }
}

/// The embedding runtime seen by ports and the codec.
///
/// All methods have defaults; an embedder only overrides what it needs.
pub trait Environment: Send + Sync {
    /// Whether user callbacks may run right now.
    ///
    /// When false (runtime shutdown in progress), the delivery loop drains
    /// and discards queued messages instead of invoking callbacks.
    fn can_invoke_user_code(&self) -> bool {
        true
    }

    /// Writes a host object into the wire stream.
    ///
    /// The default refuses with a [`CodecError::DataClone`] carrying a
    /// human-readable reason; serialization of the enclosing value fails.
    fn encode_host_object(
        &self,
        _enc: &mut WireEncoder<'_>,
        obj: &HostObject,
    ) -> Result<(), CodecError> {
        Err(CodecError::DataClone(format!(
            "{} object could not be cloned",
            obj.tag
        )))
    }

    /// Reads a host object back out of the wire stream.
    ///
    /// Invoked for host-tagged wire values; must consume exactly the bytes
    /// the encoding delegate produced.
    fn decode_host_object(&self, _dec: &mut WireDecoder<'_>) -> Result<HostObject, CodecError> {
        Err(CodecError::DataClone(
            "host object in stream but no delegate installed".to_owned(),
        ))
    }
}

/// An [`Environment`] with no host objects and no shutdown state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEnvironment;

impl Environment for NullEnvironment {}
