//! Endpoint handles, shared pair state, and the channel factory.
//!
//! A [`Port`] is the owner-thread handle to one side of an entangled pair;
//! [`PortData`] is the mutex-protected state the two sides share between
//! them; [`MessageChannel`] builds a fresh, pre-entangled pair.

pub mod channel;
pub mod data;
pub mod port;

pub use channel::{ConstructKind, MessageChannel};
pub use data::PortData;
pub use port::Port;
