//! Decoding of simulated-call return values.
//!
//! The ledger returns each `vector<u64>` as a ULEB128 length prefix followed
//! by that many 8-byte little-endian integers. Multiple return values arrive
//! as separate byte buffers; [`decode_u64_vectors`] also accepts several
//! vectors concatenated in one buffer.

use crate::error::DecodeError;

const U64_WIDTH: usize = 8;

/// Decode a ULEB128 length prefix, returning the value and bytes consumed.
fn decode_uleb128(bytes: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for (i, byte) in bytes.iter().enumerate() {
        let low = u64::from(byte & 0x7f);
        if shift >= 64 || (shift == 63 && low > 1) {
            return Err(DecodeError::LengthOverflow);
        }
        value |= low << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    Err(DecodeError::Truncated {
        expected: bytes.len() + 1,
        got: bytes.len(),
    })
}

/// Decode one vector from the front of `bytes`, returning it and the bytes consumed.
pub fn decode_u64_vector_prefix(bytes: &[u8]) -> Result<(Vec<u64>, usize), DecodeError> {
    let (len, header) = decode_uleb128(bytes)?;
    let len = usize::try_from(len).map_err(|_| DecodeError::LengthOverflow)?;
    let body = len
        .checked_mul(U64_WIDTH)
        .ok_or(DecodeError::LengthOverflow)?;
    let total = header.checked_add(body).ok_or(DecodeError::LengthOverflow)?;

    if bytes.len() < total {
        return Err(DecodeError::Truncated {
            expected: total,
            got: bytes.len(),
        });
    }

    let values = bytes[header..total]
        .chunks_exact(U64_WIDTH)
        .map(|chunk| {
            let mut buf = [0u8; U64_WIDTH];
            buf.copy_from_slice(chunk);
            u64::from_le_bytes(buf)
        })
        .collect();

    Ok((values, total))
}

/// Decode a buffer holding exactly one vector.
pub fn decode_u64_vector(bytes: &[u8]) -> Result<Vec<u64>, DecodeError> {
    let (values, consumed) = decode_u64_vector_prefix(bytes)?;
    if consumed != bytes.len() {
        return Err(DecodeError::TrailingBytes {
            remaining: bytes.len() - consumed,
        });
    }
    Ok(values)
}

/// Decode `count` vectors laid out back to back.
pub fn decode_u64_vectors(bytes: &[u8], count: usize) -> Result<Vec<Vec<u64>>, DecodeError> {
    let mut out = Vec::with_capacity(count);
    let mut offset = 0;

    for _ in 0..count {
        let (values, consumed) = decode_u64_vector_prefix(&bytes[offset..])?;
        out.push(values);
        offset += consumed;
    }

    if offset != bytes.len() {
        return Err(DecodeError::TrailingBytes {
            remaining: bytes.len() - offset,
        });
    }
    Ok(out)
}

/// Encode a vector in the same layout. Used to build fixtures.
pub fn encode_u64_vector(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + values.len() * U64_WIDTH);
    let mut len = values.len() as u64;
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
