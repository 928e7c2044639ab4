//! PIN and token generation
//!
//! Short secrets are drawn uniformly from their alphabet with an OS CSPRNG,
//! using rejection sampling so no symbol is favored by modulo bias. Generated
//! PINs are grouped into runs of three separated by dashes for readability;
//! comparisons strip the dashes again and run in constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::TryRngCore;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

const NUMERIC_ALPHABET: &[u8] = b"0123456789";
const ALPHANUMERIC_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a numeric PIN of `length` symbols, dash-grouped in runs of 3
/// (`generate_numeric(7)` matches `^[0-9]{3}-[0-9]{3}-[0-9]$`).
pub fn generate_numeric(length: usize) -> Result<String> {
    Ok(format_with_dashes(&generate_uniform(
        NUMERIC_ALPHABET,
        length,
    )?))
}

/// Generate an uppercase alphanumeric PIN of `length` symbols, dash-grouped
/// in runs of 3.
pub fn generate_alphanumeric(length: usize) -> Result<String> {
    Ok(format_with_dashes(&generate_uniform(
        ALPHANUMERIC_ALPHABET,
        length,
    )?))
}

/// Compare two numeric PINs in constant time, ignoring dash grouping.
pub fn compare_numeric(a: &str, b: &str) -> bool {
    constant_time_eq(strip_dashes(a).as_bytes(), strip_dashes(b).as_bytes())
}

/// Compare two alphanumeric PINs in constant time, ignoring dash grouping
/// and case.
pub fn compare_alphanumeric(a: &str, b: &str) -> bool {
    constant_time_eq(
        strip_dashes(a).to_ascii_uppercase().as_bytes(),
        strip_dashes(b).to_ascii_uppercase().as_bytes(),
    )
}

/// Generate `byte_len` CSPRNG bytes, URL-safe base64 encoded without padding.
///
/// The output length is `ceil(4 * byte_len / 3)`.
pub fn generate_secure_base64_token(byte_len: usize) -> Result<String> {
    if byte_len == 0 {
        return Err(Error::InvalidLength);
    }

    let mut bytes = vec![0u8; byte_len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Internal(format!("entropy source failure: {}", e)))?;

    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Draw `length` symbols uniformly from `alphabet` via rejection sampling.
fn generate_uniform(alphabet: &[u8], length: usize) -> Result<String> {
    if length == 0 {
        return Err(Error::InvalidLength);
    }

    // Largest multiple of the alphabet size that fits in a byte; bytes at or
    // above it are re-drawn so every symbol stays equally likely.
    let limit = 256 - (256 % alphabet.len());
    let mut out = Vec::with_capacity(length);
    let mut buf = [0u8; 64];

    while out.len() < length {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| Error::Internal(format!("entropy source failure: {}", e)))?;

        for &byte in &buf {
            if (byte as usize) < limit {
                out.push(alphabet[byte as usize % alphabet.len()]);
                if out.len() == length {
                    break;
                }
            }
        }
    }

    String::from_utf8(out).map_err(|_| Error::Internal("non-ascii alphabet".to_string()))
}

/// Group `value` into runs of 3 separated by dashes
/// (`"123456789"` becomes `"123-456-789"`; strings of 3 or fewer symbols are
/// returned unchanged).
pub fn format_with_dashes(value: &str) -> String {
    let chunks: Vec<&str> = value
        .as_bytes()
        .chunks(3)
        .map(|c| std::str::from_utf8(c).unwrap_or(""))
        .collect();
    chunks.join("-")
}

fn strip_dashes(value: &str) -> String {
    value.replace('-', "")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // Length is not secret; ct_eq covers the content.
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
