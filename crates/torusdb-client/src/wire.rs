//! Compact binary encoding of search result lists.
//!
//! Layout, all multi-byte scalars big-endian:
//!
//! ```text
//! <varint count>
//! repeat count times:
//!   <f64 distance><f64 similarity>
//!   <varint id><i64 created_at_millis>
//!   <varint dim><dim x f32 embedding>
//!   <varint len><len bytes database_id utf8>
//!   <varint len><len bytes original_data utf8>
//! ```
//!
//! Varints are unsigned LEB128. Storage nodes negotiate this encoding via
//! the content-type selector; JSON remains the fallback.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use torusdb_core::{Error, Result, SearchHit, VectorRecord};

/// Content type selecting the binary result encoding.
pub const BINARY_RESULTS: &str = "application/vnd.torusdb.results";

/// Content type selecting JSON results.
pub const JSON_RESULTS: &str = "application/json";

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn get_varint(buf: &mut Bytes) -> Result<u64> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(Error::protocol("truncated varint"));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::protocol("varint exceeds 64 bits"))
}

fn put_string(buf: &mut BytesMut, value: &str) {
    put_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String> {
    let len = get_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::protocol("truncated string"));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::protocol("string is not valid utf-8"))
}

fn ensure(buf: &Bytes, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::protocol(format!("truncated {what}")));
    }
    Ok(())
}

/// Encodes a result list into the binary wire form.
#[must_use]
pub fn encode_hits(hits: &[SearchHit]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16 + hits.len() * 64);
    put_varint(&mut buf, hits.len() as u64);
    for hit in hits {
        buf.put_f64(hit.distance);
        buf.put_f64(hit.similarity);
        put_varint(&mut buf, hit.vector.id as u64);
        buf.put_i64(hit.vector.created_at_millis());
        put_varint(&mut buf, hit.vector.embedding.len() as u64);
        for value in &hit.vector.embedding {
            buf.put_f32(*value);
        }
        put_string(&mut buf, &hit.vector.database_id);
        put_string(&mut buf, &hit.vector.original_data);
    }
    buf.to_vec()
}

/// Decodes a binary result list.
pub fn decode_hits(bytes: &[u8]) -> Result<Vec<SearchHit>> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let count = get_varint(&mut buf)? as usize;
    let mut hits = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        ensure(&buf, 16, "result scores")?;
        let distance = buf.get_f64();
        let similarity = buf.get_f64();
        let id = get_varint(&mut buf)? as i64;
        ensure(&buf, 8, "created-at stamp")?;
        let created_at_millis = buf.get_i64();
        let dim = get_varint(&mut buf)? as usize;
        ensure(&buf, dim * 4, "embedding")?;
        let mut embedding = Vec::with_capacity(dim);
        for _ in 0..dim {
            embedding.push(buf.get_f32());
        }
        let database_id = get_string(&mut buf)?;
        let original_data = get_string(&mut buf)?;
        hits.push(SearchHit {
            distance,
            similarity,
            vector: VectorRecord {
                id,
                embedding,
                original_data,
                database_id,
                created_at: VectorRecord::instant_from_millis(created_at_millis),
            },
        });
    }
    if buf.has_remaining() {
        return Err(Error::protocol("trailing bytes after result list"));
    }
    Ok(hits)
}
