//! Monotonic fallback id generator
//!
//! Ids are a nanosecond timestamp paired with a process-wide counter,
//! base64-encoded. Unique within a process even when the clock stalls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate the next fallback id.
pub fn next() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;

    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&nanos.to_le_bytes());
    raw[8..].copy_from_slice(&count.to_le_bytes());
    URL_SAFE_NO_PAD.encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = next();
        let b = next();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_url_safe() {
        let id = next();
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
