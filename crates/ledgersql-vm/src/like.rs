//! Byte-wise SQL LIKE matching.
//!
//! `%` matches any byte sequence, `_` matches exactly one byte, and an
//! optional caller-specified escape byte turns the following byte into a
//! literal. Matching is over raw bytes: malformed UTF-8 in the subject is
//! treated as opaque data, never an error.

use ledgersql_error::{RuntimeError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok {
    Literal(u8),
    AnyOne,
    AnySeq,
}

/// Token at `pattern[p]` and the number of bytes it consumes.
fn tok_at(pattern: &[u8], p: usize, escape: Option<u8>) -> VmResult<(Tok, usize)> {
    let b = pattern[p];
    if escape == Some(b) {
        match pattern.get(p + 1) {
            Some(lit) => Ok((Tok::Literal(*lit), 2)),
            None => Err(RuntimeError::InvalidEscape),
        }
    } else {
        match b {
            b'%' => Ok((Tok::AnySeq, 1)),
            b'_' => Ok((Tok::AnyOne, 1)),
            lit => Ok((Tok::Literal(lit), 1)),
        }
    }
}

/// Match `subject` against `pattern`.
///
/// # Errors
///
/// [`RuntimeError::InvalidEscape`] when the pattern ends in a dangling
/// escape byte.
pub fn like_match(subject: &[u8], pattern: &[u8], escape: Option<u8>) -> VmResult<bool> {
    let mut s = 0;
    let mut p = 0;
    // position to resume from after the most recent `%`
    let mut back: Option<(usize, usize)> = None;

    loop {
        if s == subject.len() {
            while p < pattern.len() {
                match tok_at(pattern, p, escape)? {
                    (Tok::AnySeq, w) => p += w,
                    _ => break,
                }
            }
            return Ok(p == pattern.len());
        }
        if p < pattern.len() {
            let (tok, w) = tok_at(pattern, p, escape)?;
            match tok {
                Tok::AnySeq => {
                    back = Some((p + w, s));
                    p += w;
                    continue;
                }
                Tok::AnyOne => {
                    p += w;
                    s += 1;
                    continue;
                }
                Tok::Literal(b) if subject[s] == b => {
                    p += w;
                    s += 1;
                    continue;
                }
                Tok::Literal(_) => {}
            }
        }
        match back {
            Some((bp, bs)) => {
                p = bp;
                s = bs + 1;
                back = Some((bp, bs + 1));
            }
            None => return Ok(false),
        }
    }
}
