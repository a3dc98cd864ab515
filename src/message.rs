//! The unit of delivery between two ports.
//!
//! A [`Message`] is immutable after serialization: one main blob holding
//! the encoded value graph, plus an ordered sidecar of buffer regions
//! whose ownership moved out of the sender's domain. It is constructed
//! empty, filled by exactly one [`serialize`](Message::serialize) call,
//! moved through the sibling's incoming queue, and consumed by one
//! [`deserialize`](Message::deserialize) call. Dropping an undelivered
//! message frees everything it carries.
//!
//! # Externalization Commit
//!
//! Transfer is a two-phase commit tied to encoder success: the value body
//! is written first, referencing transferred buffers by dense id; only
//! once the body write has succeeded is each surviving buffer's backing
//! memory stolen out of the sender's domain. A failed serialization
//! therefore detaches nothing.

use crate::buffer::{ArrayBuffer, TransferBuffer};
use crate::codec::{Decoder, Encoder, WireDecoder, WireEncoder};
use crate::env::Environment;
use crate::error::{Error, ErrorKind, Result};
use crate::value::Value;

/// A serialized value plus the buffers transferred alongside it.
#[derive(Debug, Default)]
pub struct Message {
    main_blob: TransferBuffer,
    array_buffer_contents: Vec<TransferBuffer>,
}

impl Message {
    /// Returns true if no payload has been serialized into this message.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.main_blob.is_empty() && self.array_buffer_contents.is_empty()
    }

    /// Number of transferred buffers still held by this message.
    #[must_use]
    pub fn transfer_count(&self) -> usize {
        self.array_buffer_contents.len()
    }

    /// Bytes held by the main blob. Used for queue accounting.
    pub(crate) fn blob_len(&self) -> usize {
        self.main_blob.len()
    }

    /// Encodes `value` into this message, moving the buffers named in
    /// `transfer_list` out of the sender's domain.
    ///
    /// Transfer-list entries must be array buffers; anything else aborts
    /// with [`ErrorKind::InvalidTransferObject`] before any encoding
    /// happens. Entries that cannot be transferred (pinned to the sender's
    /// domain, or already detached) are skipped silently and consume no
    /// id. On any failure the message stays empty and no buffer is
    /// detached.
    ///
    /// # Panics
    ///
    /// Panics if the message already holds a payload.
    pub fn serialize(
        &mut self,
        env: &dyn Environment,
        value: &Value,
        transfer_list: &[Value],
    ) -> Result<()> {
        // Refuse to silently overwrite an existing payload.
        assert!(
            self.is_empty(),
            "message already holds a serialized payload"
        );

        let mut survivors: Vec<ArrayBuffer> = Vec::new();
        for entry in transfer_list {
            let Value::ArrayBuffer(ab) = entry else {
                return Err(Error::new(ErrorKind::InvalidTransferObject)
                    .with_context("transfer list entries must be array buffers"));
            };
            // A buffer whose memory cannot be stolen out of this domain is
            // skipped, not copied: it keeps working on the sender side and
            // consumes no transfer id.
            if !ab.is_detachable() || ab.is_detached() {
                tracing::debug!(
                    detachable = ab.is_detachable(),
                    detached = ab.is_detached(),
                    "skipping non-transferable array buffer in transfer list"
                );
                continue;
            }
            survivors.push(ab.clone());
        }

        let mut enc = WireEncoder::new(env);
        for (id, ab) in survivors.iter().enumerate() {
            enc.transfer_array_buffer(id as u32, ab);
        }

        enc.write_header();
        enc.write_value(value)?;

        // The body write succeeded: commit, stealing each surviving
        // buffer's backing memory and leaving the sender's handles
        // detached.
        self.array_buffer_contents = survivors
            .iter()
            .map(|ab| ab.detach().unwrap_or_default())
            .collect();
        self.main_blob = enc.finish();
        Ok(())
    }

    /// Decodes the payload in the receiver's domain.
    ///
    /// Every transferred buffer is first adopted into the receiver's
    /// domain under its original id, then the value body is read. After
    /// this call the message holds no buffers; exactly one call is
    /// expected per message.
    pub fn deserialize(&mut self, env: &dyn Environment) -> Result<Value> {
        let contents = std::mem::take(&mut self.array_buffer_contents);

        let mut dec = WireDecoder::new(env, self.main_blob.as_slice());
        for (id, mut buf) in contents.into_iter().enumerate() {
            dec.transfer_array_buffer(id as u32, ArrayBuffer::new(buf.release()));
        }

        dec.read_header()?;
        Ok(dec.read_value()?)
    }
}
