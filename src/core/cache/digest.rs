use md5::{Digest, Md5};

/// Length of a hex-encoded MD5 digest.
pub const MD5_HEX_LEN: usize = 32;

/// Lowercase hex MD5 of `bytes`.
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Parse the body of a `.md5` marker.
///
/// Surrounding whitespace is ignored and case is normalized. Anything that is
/// not exactly 32 hex digits yields `None`.
pub fn parse_digest(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.len() == MD5_HEX_LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(trimmed.to_ascii_lowercase())
    } else {
        None
    }
}
