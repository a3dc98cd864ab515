//! Buffer types with explicit ownership movement.
//!
//! This module provides:
//! - [`TransferBuffer`]: a move-only heap region. It is the unit of
//!   cross-thread handoff: the bytes inside a serialized message and the
//!   externalized contents of transferred array buffers travel as
//!   `TransferBuffer`s.
//! - [`ArrayBuffer`]: a shared, detachable buffer handle living in a value
//!   domain. Cloning aliases the same storage; detaching steals the
//!   storage out of every alias at once.
//!
//! # Design Notes
//!
//! Both types use safe Rust throughout: owned regions are `Box<[u8]>` and
//! shared storage is `Arc` + `Mutex` rather than raw pointers. Moving a
//! `TransferBuffer` transfers ownership of the allocation; dropping one
//! frees it. There is no copy operation — the only movement is by value.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A heap region with explicit move semantics.
///
/// A `TransferBuffer` is exclusively owned by at most one holder at any
/// time. [`release`](Self::release) yields the backing allocation and
/// leaves the source empty; dropping a non-empty buffer frees the region.
/// The type deliberately implements neither `Clone` nor equality.
#[derive(Default)]
pub struct TransferBuffer {
    bytes: Option<Box<[u8]>>,
}

impl TransferBuffer {
    /// Adopts an already-allocated region.
    #[must_use]
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            bytes: Some(bytes.into()),
        }
    }

    /// Creates an empty buffer that owns nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self { bytes: None }
    }

    /// Yields the backing region and becomes empty.
    ///
    /// The caller assumes ownership of the allocation. Releasing an empty
    /// buffer yields an empty allocation.
    #[must_use]
    pub fn release(&mut self) -> Box<[u8]> {
        self.bytes.take().unwrap_or_default()
    }

    /// Number of bytes owned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, |b| b.len())
    }

    /// Returns true if this buffer owns no region.
    ///
    /// A zero-length adopted region still counts as owned; emptiness here
    /// means "nothing to hand off".
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_none()
    }

    /// Borrow the owned bytes (empty slice when nothing is owned).
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.len())
            .field("owned", &!self.is_empty())
            .finish()
    }
}

/// Shared storage behind an [`ArrayBuffer`] handle.
struct BufferCell {
    /// Whether the backing store may be stolen out of this domain.
    detachable: bool,
    /// `None` once detached.
    bytes: Mutex<Option<Box<[u8]>>>,
}

/// A detachable buffer handle.
///
/// `ArrayBuffer` models the large-object type that message transfer acts
/// on: a byte region owned by a value domain, visible through any number
/// of aliasing handles, whose backing memory can be *detached* — moved out
/// wholesale — leaving every alias empty. Detachment is what makes
/// zero-copy transfer observable on the sending side.
///
/// Equality compares bytes, not identity; two detached buffers compare
/// equal. Use [`ptr_eq`](Self::ptr_eq) for identity.
#[derive(Clone)]
pub struct ArrayBuffer {
    cell: Arc<BufferCell>,
}

impl ArrayBuffer {
    /// Creates a detachable buffer owning `bytes`.
    #[must_use]
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            cell: Arc::new(BufferCell {
                detachable: true,
                bytes: Mutex::new(Some(bytes.into())),
            }),
        }
    }

    /// Creates a buffer whose backing store is pinned to this domain.
    ///
    /// External buffers can be read and cloned into messages but never
    /// transferred; a transfer list naming one skips it silently.
    #[must_use]
    pub fn external(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            cell: Arc::new(BufferCell {
                detachable: false,
                bytes: Mutex::new(Some(bytes.into())),
            }),
        }
    }

    /// Current length in bytes; 0 once detached.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.cell.bytes.lock().as_ref().map_or(0, |b| b.len())
    }

    /// Returns true if the backing store has been moved out.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.cell.bytes.lock().is_none()
    }

    /// Returns true if the backing store may be stolen.
    #[must_use]
    pub fn is_detachable(&self) -> bool {
        self.cell.detachable
    }

    /// Steals the backing store, leaving every aliasing handle detached.
    ///
    /// Returns `None` if the buffer is not detachable or was already
    /// detached; in that case no handle is disturbed.
    #[must_use]
    pub fn detach(&self) -> Option<TransferBuffer> {
        if !self.cell.detachable {
            return None;
        }
        self.cell.bytes.lock().take().map(TransferBuffer::new)
    }

    /// Copies out the current contents, or `None` if detached.
    #[must_use]
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.cell.bytes.lock().as_ref().map(|b| b.to_vec())
    }

    /// Returns true if both handles alias the same storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl PartialEq for ArrayBuffer {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        // Snapshot each side independently; never hold both locks.
        let a = self.cell.bytes.lock().clone();
        let b = other.cell.bytes.lock().clone();
        a == b
    }
}

impl fmt::Debug for ArrayBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayBuffer")
            .field("byte_len", &self.byte_len())
            .field("detachable", &self.cell.detachable)
            .field("detached", &self.is_detached())
            .finish()
    }
}
