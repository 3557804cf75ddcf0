//! Self-describing wire envelope.
//!
//! Every payload on the bus is framed as:
//!
//! ```text
//! +-------------+------------------------+------------------+
//! | magic: 0x00 | schema id: u32 (BE)    | encoded datum    |
//! +-------------+------------------------+------------------+
//! ```
//!
//! The length check runs before the magic check, so any buffer of five bytes
//! or fewer is rejected as malformed regardless of its contents.

use apache_avro::types::Value;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use oxbow_core::SchemaId;

use crate::cache::SchemaCache;
use crate::codec::CompiledCodec;
use crate::error::{SchemaError, SchemaResult};

/// Leading byte of every enveloped payload.
pub const MAGIC_BYTE: u8 = 0;

/// Envelope length in bytes: magic plus the schema id.
pub const WIRE_HEADER_LEN: usize = 5;

/// Encodes a value under a schema and frames it with the envelope.
///
/// # Errors
/// Returns `PayloadEncode` if the value does not fit the codec's schema.
pub fn encode(id: SchemaId, codec: &CompiledCodec, value: &Value) -> SchemaResult<Bytes> {
    let datum = codec.encode(value)?;
    let mut buf = BytesMut::with_capacity(WIRE_HEADER_LEN + datum.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_u32(id.get());
    buf.put_slice(&datum);
    Ok(buf.freeze())
}

/// Splits an enveloped payload into its schema id and bare datum.
///
/// # Errors
/// Returns `MalformedEnvelope` when `raw` is not longer than the header and
/// `UnsupportedMagicByte` when the first byte is nonzero.
pub fn split(raw: &[u8]) -> SchemaResult<(SchemaId, &[u8])> {
    if raw.len() <= WIRE_HEADER_LEN {
        return Err(SchemaError::MalformedEnvelope {
            len: raw.len(),
            min: WIRE_HEADER_LEN,
        });
    }
    if raw[0] != MAGIC_BYTE {
        return Err(SchemaError::UnsupportedMagicByte { byte: raw[0] });
    }
    let mut header = &raw[1..WIRE_HEADER_LEN];
    let id = SchemaId::new(header.get_u32());
    Ok((id, &raw[WIRE_HEADER_LEN..]))
}

/// Decodes an enveloped payload, resolving its schema through the cache.
///
/// Returns the schema id alongside the value so callers can attribute
/// the record in logs.
///
/// # Errors
/// Envelope errors from [`split`], resolution errors from
/// [`SchemaCache::get_or_fetch`], and `PayloadDecode` when the datum does
/// not match the resolved schema.
pub async fn decode(raw: &[u8], cache: &SchemaCache) -> SchemaResult<(SchemaId, Value)> {
    let (id, datum) = split(raw)?;
    let codec = cache.get_or_fetch(id).await?;
    let value = codec.decode(id, datum)?;
    Ok((id, value))
}
