//! Short clipboard IDs
//!
//! IDs are 4 characters drawn from `a-z0-9` using the OS random source. A
//! candidate that collides with a key already in the store is discarded; after
//! [`MAX_ATTEMPTS`] collisions the generator falls back to a 6-character ID.

use std::collections::HashSet;

/// Alphabet of generated IDs
pub const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a normal ID
pub const SHORT_ID_LEN: usize = 4;

/// Length used once short candidates keep colliding
pub const FALLBACK_ID_LEN: usize = 6;

/// Short candidates tried before falling back
pub const MAX_ATTEMPTS: usize = 100;

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above this are rejected so every character is equally likely.
const REJECTION_BOUND: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Generate an ID not present in `existing`.
///
/// # Errors
///
/// Returns an error if the OS random source fails
pub fn generate_short_id(existing: &HashSet<String>) -> Result<String, getrandom::Error> {
    generate_with(existing, random_string)
}

/// Generate an ID using `random` as the candidate source
///
/// Split out so the fallback path can be driven by a deterministic source.
pub(crate) fn generate_with<F, E>(existing: &HashSet<String>, mut random: F) -> Result<String, E>
where
    F: FnMut(usize) -> Result<String, E>,
{
    for _ in 0..MAX_ATTEMPTS {
        let candidate = random(SHORT_ID_LEN)?;
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }

    // Single draw; the store's insert_new still rejects a collision here.
    random(FALLBACK_ID_LEN)
}

/// Random lowercase alphanumeric string of `len` characters
pub fn random_string(len: usize) -> Result<String, getrandom::Error> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 16];

    while out.len() < len {
        getrandom::fill(&mut buf)?;
        for &byte in buf.iter() {
            if byte >= REJECTION_BOUND {
                continue;
            }
            out.push(ALPHABET[(byte as usize) % ALPHABET.len()] as char);
            if out.len() == len {
                break;
            }
        }
    }

    Ok(out)
}
