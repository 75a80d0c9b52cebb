//! Common utility functions

use std::time::SystemTime;

/// Seconds since 1970.
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|x| x.as_secs())
        .unwrap_or(0)
}

/// Check if a string contains only lowercase hex characters.
pub fn is_hex(s: &str) -> bool {
    s.chars().all(|x| char::is_ascii_hexdigit(&x) && !char::is_uppercase(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_hex() {
        assert!(is_hex("abcdef0123456789"));
    }

    #[test]
    fn uppercase_hex_rejected() {
        assert!(!is_hex("ABCDEF"));
    }

    #[test]
    fn non_hex_rejected() {
        assert!(!is_hex("zebra"));
    }

    #[test]
    fn clock_is_sane() {
        // Well after 2020-01-01.
        assert!(unix_time() > 1_577_836_800);
    }
}
