//! Minimal RLP encoding for slot-key derivation.
//!
//! Slot preimages are flat lists of byte strings, so only the string and
//! one-level list forms are needed. The encoding is byte-exact: slot
//! addresses are an external contract and must never drift.

/// Append the RLP encoding of a byte string to `out`.
pub fn append_bytes(out: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        1 if data[0] < 0x80 => out.push(data[0]),
        len if len <= 55 => {
            out.push(0x80 + len as u8);
            out.extend_from_slice(data);
        }
        len => {
            let len_bytes = uint_be(len as u64);
            out.push(0xb7 + len_bytes.len() as u8);
            out.extend_from_slice(&len_bytes);
            out.extend_from_slice(data);
        }
    }
}

/// RLP-encode a flat list of byte strings.
#[must_use]
pub fn list_of_strings(items: &[&[u8]]) -> Vec<u8> {
    let mut payload = Vec::new();
    for item in items {
        append_bytes(&mut payload, item);
    }
    let mut out = Vec::with_capacity(payload.len() + 9);
    match payload.len() {
        len if len <= 55 => out.push(0xc0 + len as u8),
        len => {
            let len_bytes = uint_be(len as u64);
            out.push(0xf7 + len_bytes.len() as u8);
            out.extend_from_slice(&len_bytes);
        }
    }
    out.extend_from_slice(&payload);
    out
}

/// Decode a flat list of byte strings. Returns `None` on malformed input or
/// nested lists.
#[must_use]
pub fn decode_list_of_strings(data: &[u8]) -> Option<Vec<Vec<u8>>> {
    let (payload, rest) = split_payload(data, 0xc0, 0xf7)?;
    if !rest.is_empty() {
        return None;
    }
    let mut items = Vec::new();
    let mut cursor = payload;
    while !cursor.is_empty() {
        if cursor[0] >= 0xc0 {
            return None; // nested list
        }
        if cursor[0] < 0x80 {
            items.push(vec![cursor[0]]);
            cursor = &cursor[1..];
        } else {
            let (item, rest) = split_payload(cursor, 0x80, 0xb7)?;
            items.push(item.to_vec());
            cursor = rest;
        }
    }
    Some(items)
}

/// Minimal big-endian encoding of an unsigned integer: no leading zero
/// bytes, and zero encodes as the empty string.
#[must_use]
pub fn uint_be(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(8);
    bytes[first..].to_vec()
}

/// Split `(payload, rest)` off a prefixed item with the given short/long
/// prefix bases.
fn split_payload(data: &[u8], short_base: u8, long_base: u8) -> Option<(&[u8], &[u8])> {
    let head = *data.first()?;
    if head < short_base {
        return None;
    }
    if head <= long_base {
        let len = (head - short_base) as usize;
        if data.len() < 1 + len {
            return None;
        }
        Some((&data[1..1 + len], &data[1 + len..]))
    } else {
        let len_len = (head - long_base) as usize;
        if len_len > 8 || data.len() < 1 + len_len {
            return None;
        }
        let mut len: usize = 0;
        for b in &data[1..1 + len_len] {
            len = len.checked_mul(256)?.checked_add(*b as usize)?;
        }
        let start = 1 + len_len;
        if data.len() < start + len {
            return None;
        }
        Some((&data[start..start + len], &data[start + len..]))
    }
}
