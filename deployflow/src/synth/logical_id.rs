//! Stable logical ids for template resources.

use sha2::{Digest, Sha256};

/// Length of the hash suffix, in hex digits.
const HASH_LEN: usize = 8;

/// Derives a logical id from a construct path.
///
/// The first element is the stack id and only contributes to the hash; the
/// rest are stripped to ASCII alphanumerics and concatenated, then suffixed
/// with the first eight hex digits of the SHA-256 of the `/`-joined path.
/// The same path always yields the same id.
#[must_use]
pub fn logical_id(path: &[&str]) -> String {
    let readable: String = path
        .iter()
        .skip(1)
        .flat_map(|part| part.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect();

    let digest = Sha256::digest(path.join("/").as_bytes());
    let suffix = hex::encode_upper(digest);

    format!("{readable}{}", &suffix[..HASH_LEN])
}
