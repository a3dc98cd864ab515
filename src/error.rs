//! Error types and error handling strategy for msgport.
//!
//! This module defines the crate-wide error type used by the port surface.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Argument and lifecycle errors surface synchronously to the caller
//! - A vanished sibling is not an error: such sends succeed and drop
//! - Fatal invariant violations (a non-empty message re-serialized, a
//!   still-owned endpoint destroyed) abort via assertion instead

use core::fmt;
use std::sync::Arc;

use crate::codec::CodecError;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Invalid arguments ===
    /// A transfer-list entry was not an array buffer.
    InvalidTransferObject,
    /// A binding-level call carried too few arguments.
    MissingArgs,
    /// A binding-level constructor was invoked as a plain call.
    ConstructCallRequired,

    // === Lifecycle ===
    /// An operation was invoked on a port whose state is gone
    /// (closed or detached).
    ClosedPort,

    // === Codec ===
    /// Serialization or deserialization failed.
    Codec,
}

/// The main error type for msgport operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error reports a bad argument.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidTransferObject
                | ErrorKind::MissingArgs
                | ErrorKind::ConstructCallRequired
        )
    }

    /// Returns true if this error reports use of a closed or detached port.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::ClosedPort)
    }

    /// Returns true if this error originated inside the codec.
    #[must_use]
    pub const fn is_codec(&self) -> bool {
        matches!(self.kind, ErrorKind::Codec)
    }

    /// Adds deterministic context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        let ctx = e.to_string();
        Self::new(ErrorKind::Codec).with_context(ctx).with_source(e)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for msgport operations.
pub type Result<T> = core::result::Result<T, Error>;
