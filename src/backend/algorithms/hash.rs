//! Ring hash primitive.

use md5::{Digest, Md5};

/// Map a key onto the 64-bit ring.
///
/// MD5 of the UTF-8 bytes, first eight digest bytes read big-endian. Pure:
/// every call owns its hasher, so concurrent callers never contend. Used for
/// both virtual-node placement and client keys.
pub fn hash_key(key: &str) -> u64 {
    let digest = Md5::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest_prefix() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(hash_key(""), 0xd41d8cd98f00b204);
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(hash_key("abc"), 0x900150983cd24fb0);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(hash_key("10.0.0.5"), hash_key("10.0.0.5"));
        assert_ne!(hash_key("10.0.0.5"), hash_key("10.0.0.6"));
    }

    #[test]
    fn test_concurrent_callers_agree() {
        let expected = hash_key("http://localhost:8081#7");
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| hash_key("http://localhost:8081#7")))
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
