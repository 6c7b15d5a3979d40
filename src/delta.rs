//! Byte-level delta codec: a small COPY/INSERT program that reconstructs
//! one byte sequence relative to another.

use core::mem::size_of;

use super::internals::{Error, Result};

const U32: usize = size_of::<u32>();
const OP_COPY: u8 = 0;
const OP_INSERT: u8 = 1;

/// Longest run considered for a single match before the encoder commits to it.
const DEFAULT_MIN_MATCH_LENGTH: usize = 8;

fn read_u32(delta: &[u8], i: &mut usize) -> Result<u32> {
    let slice = delta.get(*i..*i + U32).ok_or(Error::CorruptDelta)?;
    let mut bytes = [0; U32];
    bytes.copy_from_slice(slice);
    *i += U32;
    Ok(u32::from_le_bytes(bytes))
}

/// Applies `delta` to `original`, reproducing the encoder's input bit-exactly.
///
/// Errors with [`Error::CorruptDelta`] if the delta bytes are malformed: an
/// unknown opcode, a COPY reaching past the end of `original`, an INSERT
/// whose declared length overruns the remaining delta bytes, or a delta
/// that ends mid-operation.
pub fn decode(original: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < delta.len() {
        let opcode = delta[i];
        i += 1;

        match opcode {
            OP_COPY => {
                let offset = read_u32(delta, &mut i)? as usize;
                let length = read_u32(delta, &mut i)? as usize;

                let end = offset.checked_add(length).ok_or(Error::CorruptDelta)?;
                let slice = original.get(offset..end).ok_or(Error::CorruptDelta)?;
                out.extend_from_slice(slice);
            }
            OP_INSERT => {
                let length = read_u32(delta, &mut i)? as usize;
                let slice = delta.get(i..i + length).ok_or(Error::CorruptDelta)?;
                out.extend_from_slice(slice);
                i += length;
            }
            _ => return Err(Error::CorruptDelta),
        }
    }

    Ok(out)
}

fn emit_copy(out: &mut Vec<u8>, offset: usize, length: usize) {
    out.push(OP_COPY);
    out.extend_from_slice(&(offset as u32).to_le_bytes());
    out.extend_from_slice(&(length as u32).to_le_bytes());
}

fn emit_insert(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(OP_INSERT);
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Finds the longest prefix of `new[at..]` occurring anywhere in `original`.
///
/// Returns `(position, length)` of the earliest longest match, or `(0, 0)`
/// if nothing matches. Linear in `original.len()` per call site; fine for
/// the modest blob sizes this service targets, not streaming large blobs.
fn longest_match(original: &[u8], new: &[u8], at: usize) -> (usize, usize) {
    let mut best_pos = 0;
    let mut best_len = 0;

    for pos in 0..original.len() {
        let max_len = (original.len() - pos).min(new.len() - at);
        let mut len = 0;
        while len < max_len && original[pos + len] == new[at + len] {
            len += 1;
        }

        if len > best_len {
            best_len = len;
            best_pos = pos;
        }
    }

    (best_pos, best_len)
}

/// Encodes `new` relative to `original` as a COPY/INSERT program.
///
/// Greedy longest-match-wins heuristic, `min_match_length` controlling how
/// long a match must be before it's worth a COPY instead of being folded
/// into a literal run. No correctness property depends on match
/// optimality, only that `decode(original, encode(original, new)) == new`.
pub fn encode_with_min_match(original: &[u8], new: &[u8], min_match_length: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < new.len() {
        let (pos, len) = longest_match(original, new, i);

        if len >= min_match_length {
            emit_copy(&mut out, pos, len);
            i += len;
        } else {
            let start = i;
            i += 1;

            while i < new.len() {
                let (_, len) = longest_match(original, new, i);
                if len >= min_match_length {
                    break;
                }
                i += 1;
            }

            emit_insert(&mut out, &new[start..i]);
        }
    }

    out
}

pub fn encode(original: &[u8], new: &[u8]) -> Vec<u8> {
    encode_with_min_match(original, new, DEFAULT_MIN_MATCH_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_on_disjoint_content() {
        let original = b"the quick brown fox jumps over the lazy dog";
        let new = b"something entirely different and unrelated text";
        let delta = encode(original, new);
        assert_eq!(decode(original, &delta).unwrap(), new);
    }

    #[test]
    fn roundtrip_on_small_edit() {
        let original = b"the quick brown fox jumps over the lazy dog";
        let mut new = original.to_vec();
        new.extend_from_slice(b", and then ran off");
        let delta = encode(original, &new);
        assert_eq!(decode(original, &delta).unwrap(), new);
        // the long common prefix should have been copied, not re-inserted
        assert!(delta.len() < new.len());
    }

    #[test]
    fn identity_roundtrips_and_is_compact() {
        let original = b"the quick brown fox jumps over the lazy dog";
        let delta = encode(original, original);
        assert_eq!(decode(original, &delta).unwrap(), original);
        assert!(delta.len() < original.len());
    }

    #[test]
    fn empty_inputs_roundtrip() {
        let delta = encode(b"", b"");
        assert_eq!(decode(b"", &delta).unwrap(), b"");

        let delta = encode(b"", b"brand new content");
        assert_eq!(decode(b"", &delta).unwrap(), b"brand new content");
    }

    #[test]
    fn corrupt_opcode_is_rejected() {
        assert!(matches!(decode(b"x", &[0x02]), Err(Error::CorruptDelta)));
    }

    #[test]
    fn copy_past_end_of_original_is_rejected() {
        let mut delta = Vec::new();
        emit_copy(&mut delta, 0, 100);
        assert!(matches!(decode(b"short", &delta), Err(Error::CorruptDelta)));
    }

    #[test]
    fn insert_overrunning_delta_is_rejected() {
        let mut delta = Vec::new();
        delta.push(OP_INSERT);
        delta.extend_from_slice(&100u32.to_le_bytes());
        delta.extend_from_slice(b"short");
        assert!(matches!(decode(b"", &delta), Err(Error::CorruptDelta)));
    }

    #[test]
    fn truncated_mid_operation_is_rejected() {
        let delta = vec![OP_COPY, 1, 2, 3];
        assert!(matches!(decode(b"abcdef", &delta), Err(Error::CorruptDelta)));
    }
}
