//! Cheap equality oracle for whole-document snapshots.
//!
//! A 32-bit rolling hash over the compact JSON form. Collisions are possible;
//! callers only use a match as a "likely equal" hint.

use crate::{Result, UserData};

/// Checksum of a snapshot.
pub fn checksum(data: &UserData) -> Result<String> {
    let serialized = serde_json::to_string(data)?;
    Ok(checksum_str(&serialized))
}

/// Rolling hash `h = h * 31 + c` (wrapping) over UTF-16 code units,
/// rendered in base 36.
pub fn checksum_str(input: &str) -> String {
    let mut hash: i32 = 0;
    for c in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(c as i32);
    }
    to_base36(hash.unsigned_abs())
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(7);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
