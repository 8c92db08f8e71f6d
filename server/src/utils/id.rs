//! Random 128-bit id generation with a non-panicking fallback

use rand::RngCore;
use rand::rngs::OsRng;

use super::fast_id;

/// Generate a random UUID-formatted id. If the OS random source is
/// unavailable, falls back to the timestamp+counter generator instead of
/// failing the caller.
pub fn generate() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string(),
        Err(_) => fast_id::next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_uuid_format() {
        let id = generate();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(generate(), generate());
    }
}
