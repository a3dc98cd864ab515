//! The versioned tagged binary wire format.
//!
//! # Blob Layout
//!
//! ```text
//! +--------------------+
//! | Magic (4 bytes)    |  "MSGP"
//! +--------------------+
//! | Version (2 bytes)  |  u16 little-endian
//! +--------------------+
//! | Value body         |  one tagged value, recursively encoded
//! +--------------------+
//! ```
//!
//! Each value starts with a tag byte. Lengths and counts are `u32`
//! little-endian; integers are `i64` little-endian; floats are IEEE-754
//! bit patterns. Array buffers encode one of two ways: a buffer registered
//! for transfer encodes as its dense id, any other buffer encodes inline
//! as a byte copy. Host-tagged values are framed by the environment's
//! delegate on both sides.

use crate::buffer::{ArrayBuffer, TransferBuffer};
use crate::codec::{CodecError, Decoder, Encoder};
use crate::env::Environment;
use crate::value::Value;

/// Magic bytes at the start of every blob.
pub const WIRE_MAGIC: &[u8; 4] = b"MSGP";

/// Current wire format version.
pub const WIRE_VERSION: u16 = 1;

/// Header size (magic + version).
const HEADER_LEN: usize = 4 + 2;

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_LIST: u8 = 0x06;
const TAG_MAP: u8 = 0x07;
const TAG_BUF_INLINE: u8 = 0x08;
const TAG_BUF_TRANSFER: u8 = 0x09;
const TAG_HOST: u8 = 0x0A;

/// Decode-side resource limits.
///
/// Builder-style: chain the setters onto `WireLimits::default()`.
#[derive(Debug, Clone, Copy)]
pub struct WireLimits {
    max_blob_len: usize,
    max_depth: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            max_blob_len: 8 * 1024 * 1024,
            max_depth: 64,
        }
    }
}

impl WireLimits {
    /// Sets the maximum accepted blob size in bytes.
    #[must_use]
    pub const fn max_blob_len(mut self, val: usize) -> Self {
        self.max_blob_len = val;
        self
    }

    /// Sets the maximum value nesting depth.
    #[must_use]
    pub const fn max_depth(mut self, val: usize) -> Self {
        self.max_depth = val;
        self
    }
}

/// Concrete [`Encoder`] for the wire format.
pub struct WireEncoder<'a> {
    env: &'a dyn Environment,
    out: Vec<u8>,
    transfers: Vec<ArrayBuffer>,
}

impl<'a> WireEncoder<'a> {
    /// Creates an encoder delegating host objects to `env`.
    #[must_use]
    pub fn new(env: &'a dyn Environment) -> Self {
        Self {
            env,
            out: Vec::new(),
            transfers: Vec::new(),
        }
    }

    /// Appends raw bytes. Intended for host-object delegates.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Appends a little-endian u32. Intended for host-object delegates.
    pub fn write_u32(&mut self, val: u32) {
        self.out.extend_from_slice(&val.to_le_bytes());
    }

    fn write_len(&mut self, len: usize) -> Result<(), CodecError> {
        let len = u32::try_from(len).map_err(|_| CodecError::LengthOverflow)?;
        self.write_u32(len);
        Ok(())
    }

    fn write_text_raw(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_len(s.len())?;
        self.out.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn transfer_id(&self, buffer: &ArrayBuffer) -> Option<u32> {
        self.transfers
            .iter()
            .position(|t| t.ptr_eq(buffer))
            .map(|i| i as u32)
    }
}

impl Encoder for WireEncoder<'_> {
    fn transfer_array_buffer(&mut self, id: u32, buffer: &ArrayBuffer) {
        debug_assert_eq!(id as usize, self.transfers.len(), "ids must be dense");
        self.transfers.push(buffer.clone());
    }

    fn write_header(&mut self) {
        self.out.extend_from_slice(WIRE_MAGIC);
        self.out.extend_from_slice(&WIRE_VERSION.to_le_bytes());
    }

    fn write_value(&mut self, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::Null => self.out.push(TAG_NULL),
            Value::Bool(false) => self.out.push(TAG_FALSE),
            Value::Bool(true) => self.out.push(TAG_TRUE),
            Value::Int(v) => {
                self.out.push(TAG_INT);
                self.out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float(v) => {
                self.out.push(TAG_FLOAT);
                self.out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Text(s) => {
                self.out.push(TAG_TEXT);
                self.write_text_raw(s)?;
            }
            Value::List(items) => {
                self.out.push(TAG_LIST);
                self.write_len(items.len())?;
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Map(entries) => {
                self.out.push(TAG_MAP);
                self.write_len(entries.len())?;
                for (key, item) in entries {
                    self.write_text_raw(key)?;
                    self.write_value(item)?;
                }
            }
            Value::ArrayBuffer(ab) => {
                if let Some(id) = self.transfer_id(ab) {
                    self.out.push(TAG_BUF_TRANSFER);
                    self.write_u32(id);
                } else {
                    // Clone path: a buffer not named for transfer travels
                    // as a byte copy.
                    let bytes = ab.snapshot().ok_or(CodecError::DetachedBuffer)?;
                    self.out.push(TAG_BUF_INLINE);
                    self.write_len(bytes.len())?;
                    self.out.extend_from_slice(&bytes);
                }
            }
            Value::Host(obj) => {
                self.out.push(TAG_HOST);
                let env = self.env;
                env.encode_host_object(self, obj)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> TransferBuffer {
        TransferBuffer::new(self.out)
    }
}

/// Concrete [`Decoder`] for the wire format.
pub struct WireDecoder<'a> {
    env: &'a dyn Environment,
    input: &'a [u8],
    pos: usize,
    transferred: Vec<Option<ArrayBuffer>>,
    limits: WireLimits,
    depth: usize,
}

impl<'a> WireDecoder<'a> {
    /// Creates a decoder over `input` with default limits.
    #[must_use]
    pub fn new(env: &'a dyn Environment, input: &'a [u8]) -> Self {
        Self::with_limits(env, input, WireLimits::default())
    }

    /// Creates a decoder over `input` with explicit limits.
    #[must_use]
    pub fn with_limits(env: &'a dyn Environment, input: &'a [u8], limits: WireLimits) -> Self {
        Self {
            env,
            input,
            pos: 0,
            transferred: Vec::new(),
            limits,
            depth: 0,
        }
    }

    /// Reads `len` raw bytes. Intended for host-object delegates.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::Truncated)?;
        if end > self.input.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reads a little-endian u32. Intended for host-object delegates.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        let bytes = self.read_bytes(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        let bytes = self.read_bytes(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    fn read_text_raw(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidText)
    }

    fn enter(&mut self) -> Result<(), CodecError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(CodecError::DepthExceeded(self.limits.max_depth));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

impl Decoder for WireDecoder<'_> {
    fn transfer_array_buffer(&mut self, id: u32, buffer: ArrayBuffer) {
        let slot = id as usize;
        if slot >= self.transferred.len() {
            self.transferred.resize_with(slot + 1, || None);
        }
        self.transferred[slot] = Some(buffer);
    }

    fn read_header(&mut self) -> Result<(), CodecError> {
        if self.input.len() > self.limits.max_blob_len {
            return Err(CodecError::BlobTooLarge(self.limits.max_blob_len));
        }
        if self.input.len() < HEADER_LEN {
            return Err(CodecError::BadHeader);
        }
        let magic = self.read_bytes(4)?;
        if magic != WIRE_MAGIC {
            return Err(CodecError::BadHeader);
        }
        let version_bytes = self.read_bytes(2)?;
        let found = u16::from_le_bytes(version_bytes.try_into().expect("2-byte slice"));
        if found > WIRE_VERSION {
            return Err(CodecError::UnsupportedVersion {
                expected: WIRE_VERSION,
                found,
            });
        }
        Ok(())
    }

    fn read_value(&mut self) -> Result<Value, CodecError> {
        let tag = self.read_u8()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => Value::Int(self.read_i64()?),
            TAG_FLOAT => Value::Float(self.read_f64()?),
            TAG_TEXT => Value::Text(self.read_text_raw()?),
            TAG_LIST => {
                self.enter()?;
                let count = self.read_u32()? as usize;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                self.leave();
                Value::List(items)
            }
            TAG_MAP => {
                self.enter()?;
                let count = self.read_u32()? as usize;
                let mut entries = Vec::new();
                for _ in 0..count {
                    let key = self.read_text_raw()?;
                    let item = self.read_value()?;
                    entries.push((key, item));
                }
                self.leave();
                Value::Map(entries)
            }
            TAG_BUF_INLINE => {
                let len = self.read_u32()? as usize;
                let bytes = self.read_bytes(len)?;
                Value::ArrayBuffer(ArrayBuffer::new(bytes.to_vec()))
            }
            TAG_BUF_TRANSFER => {
                let id = self.read_u32()?;
                let buffer = self
                    .transferred
                    .get(id as usize)
                    .and_then(Option::clone)
                    .ok_or(CodecError::BadTransferId(id))?;
                Value::ArrayBuffer(buffer)
            }
            TAG_HOST => {
                let env = self.env;
                Value::Host(env.decode_host_object(self)?)
            }
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::NullEnvironment;
    use crate::value::HostObject;

    fn encode(value: &Value) -> Vec<u8> {
        let env = NullEnvironment;
        let mut enc = WireEncoder::new(&env);
        enc.write_header();
        enc.write_value(value).expect("encode");
        enc.finish().release().into_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
        let env = NullEnvironment;
        let mut dec = WireDecoder::new(&env, bytes);
        dec.read_header()?;
        dec.read_value()
    }

    #[test]
    fn nested_value_round_trips() {
        let value = Value::map([
            ("id", Value::Int(-7)),
            ("pi", Value::Float(3.25)),
            ("name", Value::text("port")),
            (
                "tags",
                Value::List(vec![Value::Bool(true), Value::Null, Value::text("x")]),
            ),
        ]);
        let blob = encode(&value);
        assert_eq!(decode(&blob).expect("decode"), value);
    }

    #[test]
    fn header_is_validated() {
        assert!(matches!(decode(b"MSG"), Err(CodecError::BadHeader)));
        assert!(matches!(decode(b"XXXX\x01\x00"), Err(CodecError::BadHeader)));

        let mut blob = encode(&Value::Null);
        blob[4] = 0xFF;
        blob[5] = 0xFF;
        assert!(matches!(
            decode(&blob),
            Err(CodecError::UnsupportedVersion { found: 0xFFFF, .. })
        ));
    }

    #[test]
    fn empty_input_is_a_bad_header() {
        assert!(matches!(decode(&[]), Err(CodecError::BadHeader)));
    }

    #[test]
    fn unregistered_buffer_travels_inline_as_a_copy() {
        let ab = ArrayBuffer::new(vec![1u8, 2, 3]);
        let blob = encode(&Value::ArrayBuffer(ab.clone()));

        // The source buffer is untouched by the clone path.
        assert!(!ab.is_detached());

        let out = decode(&blob).expect("decode");
        let got = out.as_array_buffer().expect("buffer");
        assert_eq!(got.snapshot().unwrap(), vec![1, 2, 3]);
        assert!(!got.ptr_eq(&ab));
    }

    #[test]
    fn detached_buffer_refuses_to_encode() {
        let ab = ArrayBuffer::new(vec![1u8]);
        let _ = ab.detach();
        let env = NullEnvironment;
        let mut enc = WireEncoder::new(&env);
        enc.write_header();
        let err = enc.write_value(&Value::ArrayBuffer(ab)).unwrap_err();
        assert!(matches!(err, CodecError::DetachedBuffer));
    }

    #[test]
    fn transfer_registered_buffer_encodes_as_id() {
        let env = NullEnvironment;
        let ab = ArrayBuffer::new(vec![5u8; 100]);

        let mut enc = WireEncoder::new(&env);
        enc.transfer_array_buffer(0, &ab);
        enc.write_header();
        enc.write_value(&Value::ArrayBuffer(ab.clone())).unwrap();
        let blob = enc.finish();

        // The 100-byte payload is not in the stream, only the id.
        assert!(blob.len() < 20);

        let incoming = ArrayBuffer::new(vec![5u8; 100]);
        let mut dec = WireDecoder::new(&env, blob.as_slice());
        dec.transfer_array_buffer(0, incoming.clone());
        dec.read_header().unwrap();
        let out = dec.read_value().unwrap();
        assert!(out.as_array_buffer().unwrap().ptr_eq(&incoming));
    }

    #[test]
    fn missing_transfer_id_is_an_error() {
        let env = NullEnvironment;
        let ab = ArrayBuffer::new(vec![1u8]);
        let mut enc = WireEncoder::new(&env);
        enc.transfer_array_buffer(0, &ab);
        enc.write_header();
        enc.write_value(&Value::ArrayBuffer(ab)).unwrap();
        let blob = enc.finish();

        // Decoder never installs id 0.
        let mut dec = WireDecoder::new(&env, blob.as_slice());
        dec.read_header().unwrap();
        assert!(matches!(
            dec.read_value(),
            Err(CodecError::BadTransferId(0))
        ));
    }

    #[test]
    fn unknown_tag_and_truncation_are_reported() {
        let mut blob = encode(&Value::Null);
        let body = blob.len() - 1;
        blob[body] = 0x7F;
        assert!(matches!(decode(&blob), Err(CodecError::UnknownTag(0x7F))));

        let blob = encode(&Value::text("hello"));
        assert!(matches!(
            decode(&blob[..blob.len() - 2]),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut value = Value::Null;
        for _ in 0..80 {
            value = Value::List(vec![value]);
        }
        let blob = encode(&value);
        let env = NullEnvironment;
        let mut dec = WireDecoder::with_limits(&env, &blob, WireLimits::default().max_depth(16));
        dec.read_header().unwrap();
        assert!(matches!(dec.read_value(), Err(CodecError::DepthExceeded(16))));
    }

    #[test]
    fn blob_size_limit_is_enforced() {
        let blob = encode(&Value::text("a".repeat(1024)));
        let env = NullEnvironment;
        let mut dec = WireDecoder::with_limits(&env, &blob, WireLimits::default().max_blob_len(64));
        assert!(matches!(
            dec.read_header(),
            Err(CodecError::BlobTooLarge(64))
        ));
    }

    #[test]
    fn host_object_fails_without_delegate() {
        let env = NullEnvironment;
        let mut enc = WireEncoder::new(&env);
        enc.write_header();
        let err = enc
            .write_value(&Value::Host(HostObject::new("Socket", vec![])))
            .unwrap_err();
        assert!(err.to_string().contains("Socket"));
    }

    #[test]
    fn host_object_round_trips_through_delegate() {
        struct TaggingEnv;
        impl Environment for TaggingEnv {
            fn encode_host_object(
                &self,
                enc: &mut WireEncoder<'_>,
                obj: &HostObject,
            ) -> Result<(), CodecError> {
                enc.write_u32(obj.tag.len() as u32);
                enc.write_bytes(obj.tag.as_bytes());
                enc.write_u32(obj.payload.len() as u32);
                enc.write_bytes(&obj.payload);
                Ok(())
            }

            fn decode_host_object(
                &self,
                dec: &mut WireDecoder<'_>,
            ) -> Result<HostObject, CodecError> {
                let tag_len = dec.read_u32()? as usize;
                let tag = String::from_utf8(dec.read_bytes(tag_len)?.to_vec())
                    .map_err(|_| CodecError::InvalidText)?;
                let payload_len = dec.read_u32()? as usize;
                let payload = dec.read_bytes(payload_len)?.to_vec();
                Ok(HostObject { tag, payload })
            }
        }

        let env = TaggingEnv;
        let obj = HostObject::new("Timer", vec![1, 2, 3]);
        let mut enc = WireEncoder::new(&env);
        enc.write_header();
        enc.write_value(&Value::Host(obj.clone())).unwrap();
        let blob = enc.finish();

        let mut dec = WireDecoder::new(&env, blob.as_slice());
        dec.read_header().unwrap();
        assert_eq!(dec.read_value().unwrap(), Value::Host(obj));
    }
}
