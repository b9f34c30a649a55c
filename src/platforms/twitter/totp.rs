//! Time-based one-time codes for accounts with 2FA.

use totp_lite::{DEFAULT_STEP, Sha1, totp_custom};

use crate::platforms::PlatformError;

const DIGITS: u32 = 6;
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Six-digit code for `unix_time` from a base32 secret as shown by
/// authenticator setup screens (spaces and padding are ignored).
pub fn code(secret_base32: &str, unix_time: u64) -> Result<String, PlatformError> {
    let key = decode_base32(secret_base32)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| PlatformError::Auth("2FA secret is not valid base32".into()))?;
    Ok(totp_custom::<Sha1>(DEFAULT_STEP, DIGITS, &key, unix_time))
}

/// RFC 4648 base32, case-insensitive. `None` on any character outside the
/// alphabet.
pub fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for c in input.bytes().filter(|c| !c.is_ascii_whitespace() && *c != b'=' && *c != b'-') {
        let upper = c.to_ascii_uppercase();
        let v = ALPHABET.iter().position(|&a| a == upper)? as u64;
        buffer = (buffer << 5) | v;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Some(out)
}
