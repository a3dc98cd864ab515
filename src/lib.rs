//! Msgport: cross-thread message ports with transferable buffers.
//!
//! # Overview
//!
//! Msgport implements a message-port subsystem in which two cooperating
//! execution contexts inside the same process exchange structured values
//! over a pair of linked endpoints. Each endpoint belongs to exactly one
//! owning thread; posting on one endpoint makes the value surface on the
//! other endpoint's owner later, driven by that owner's event loop.
//!
//! # Core Guarantees
//!
//! - **Entanglement protocol**: two endpoints are paired atomically and the
//!   pair can be torn apart from either side without deadlocking against a
//!   concurrent send from the other side
//! - **FIFO delivery**: messages from one sender to one receiver arrive in
//!   post order; a stopped receiver buffers, a closed receiver drops
//! - **Transfer, not copy**: array buffers named in a transfer list move
//!   their backing memory to the receiver; the sender's handle is left
//!   detached and the byte region is never duplicated
//! - **Two-phase externalization**: either the serialized blob and every
//!   transferred buffer move together, or nothing moves
//!
//! # Module Structure
//!
//! - [`buffer`]: move-only heap regions and detachable array buffers
//! - [`value`]: the structured value graph the codec operates on
//! - [`codec`]: wire encoder/decoder with header framing and transfer ids
//! - [`message`]: serialized payload plus its sidecar of moved buffers
//! - [`port`]: endpoint handles, shared pair state, delivery loop, factory
//! - [`env`]: interfaces to the embedding runtime (wake-up, user-code gate)
//! - [`error`]: error types
//! - [`test_utils`]: logging setup and a manual event-loop pump for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod buffer;
pub mod codec;
pub mod env;
pub mod error;
pub mod message;
pub mod port;
pub mod test_utils;
pub mod value;

// Re-exports for convenient access to core types
pub use buffer::{ArrayBuffer, TransferBuffer};
pub use codec::{CodecError, Decoder, Encoder, WireDecoder, WireEncoder, WireLimits};
pub use env::{AsyncHandle, Environment, NullEnvironment};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use message::Message;
pub use port::{ConstructKind, MessageChannel, Port, PortData};
pub use value::{HostObject, Value};
