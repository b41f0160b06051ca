// ConsentKeeper — Identity & Content Cryptography
//
// Two identity forms exist for every user and they must never be confused:
//   - hash_identity()   SHA-256 hex of the raw ID, used for every lookup/join
//   - Cipher::encrypt() AES-256-CBC token of the raw ID, audit log only
//
// Token format: base64(iv[16] || ciphertext), PKCS#7 padded. The IV is fresh
// for every call, so equal plaintexts never produce equal tokens.

use base64::Engine;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::atoms::constants::{HASH_LOG_PREFIX, IV_LEN, KEY_LEN};
use crate::atoms::error::{EngineError, EngineResult};

// ── One-way digests ────────────────────────────────────────────────────

/// Deterministic SHA-256 digest of a raw platform user ID, lowercase hex.
pub fn hash_identity(raw_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_id.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Idempotency key for a collected message: SHA-256 of the identity hash
/// concatenated with the *plaintext* content.
///
/// Must never be fed the encrypted message; encryption is randomized and
/// the fingerprint would change on every run.
pub fn content_fingerprint(user_id_hash: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id_hash.as_bytes());
    hasher.update(content.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Short, log-safe prefix of an identity hash.
pub fn hash_prefix(hash: &str) -> &str {
    let end = hash
        .char_indices()
        .nth(HASH_LOG_PREFIX)
        .map(|(i, _)| i)
        .unwrap_or(hash.len());
    &hash[..end]
}

// ── Reversible encryption ──────────────────────────────────────────────

/// AES-256-CBC cipher bound to the system secret key.
pub struct Cipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl Cipher {
    /// Build from the 64-character hex key in configuration.
    pub fn from_hex(key_hex: &str) -> EngineResult<Self> {
        let key_hex = key_hex.trim();
        if key_hex.is_empty() {
            return Err(EngineError::Config("ENCRYPTION_KEY not set".into()));
        }
        let bytes = Zeroizing::new(
            hex_decode(key_hex)
                .map_err(|_| EngineError::Config("ENCRYPTION_KEY must be hex-encoded".into()))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(EngineError::Config(format!(
                "ENCRYPTION_KEY must be {} hex characters (256-bit key), got {} bytes",
                KEY_LEN * 2,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Cipher { key })
    }

    /// Encrypt a UTF-8 string into a base64 token with an embedded random IV.
    pub fn encrypt(&self, plaintext: &str) -> EngineResult<String> {
        use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

        let iv: [u8; IV_LEN] = rand::random();
        let pt = plaintext.as_bytes();
        // Buffer: plaintext + up to one block of PKCS#7 padding
        let mut buf = vec![0u8; pt.len() + IV_LEN];
        buf[..pt.len()].copy_from_slice(pt);

        let ciphertext = cbc::Encryptor::<aes::Aes256>::new_from_slices(self.key.as_slice(), &iv)
            .map_err(|e| EngineError::Config(format!("Invalid cipher key: {}", e)))?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, pt.len())
            .map_err(|e| EngineError::Other(format!("AES-256-CBC encryption failed: {}", e)))?;

        let mut packed = Vec::with_capacity(IV_LEN + ciphertext.len());
        packed.extend_from_slice(&iv);
        packed.extend_from_slice(ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(packed))
    }

    /// Exact inverse of [`Cipher::encrypt`].
    pub fn decrypt(&self, token: &str) -> EngineResult<String> {
        use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

        let packed = base64::engine::general_purpose::STANDARD
            .decode(token.trim())
            .map_err(|e| EngineError::Integrity(format!("Token is not valid base64: {}", e)))?;

        if packed.len() < IV_LEN * 2 || (packed.len() - IV_LEN) % IV_LEN != 0 {
            return Err(EngineError::Integrity(format!(
                "Token has invalid length {}",
                packed.len()
            )));
        }

        let (iv, ciphertext) = packed.split_at(IV_LEN);
        let mut buf = ciphertext.to_vec();
        let plaintext = cbc::Decryptor::<aes::Aes256>::new_from_slices(self.key.as_slice(), iv)
            .map_err(|e| EngineError::Integrity(format!("Invalid IV: {}", e)))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| EngineError::Integrity("Padding check failed: wrong key or corrupted token".into()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| EngineError::Integrity("Decrypted token is not UTF-8".into()))
    }
}

/// Fresh random 256-bit key, hex-encoded for the ENCRYPTION_KEY variable.
pub fn generate_key_hex() -> String {
    let key = Zeroizing::new(rand::random::<[u8; KEY_LEN]>());
    hex_encode(key.as_slice())
}

// ── Hex Utils ──────────────────────────────────────────────────────────

pub fn hex_decode(hex: &str) -> EngineResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err("Odd hex length".into());
    }
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("Non-hex character".into());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| EngineError::Other(format!("Bad hex byte: {}", e)))
        })
        .collect()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn cipher() -> Cipher {
        Cipher::from_hex(TEST_KEY).unwrap()
    }

    #[test]
    fn hash_identity_is_deterministic() {
        assert_eq!(hash_identity("123456789"), hash_identity("123456789"));
        assert_ne!(hash_identity("123456789"), hash_identity("123456788"));
    }

    #[test]
    fn hash_identity_matches_sha256_hex() {
        assert_eq!(
            hash_identity("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_identity("anything").len(), 64);
    }

    #[test]
    fn fingerprint_is_concatenation_hash() {
        let h = hash_identity("42");
        assert_eq!(content_fingerprint(&h, "hello"), hash_identity(&format!("{}hello", h)));
        assert_eq!(content_fingerprint(&h, "hello"), content_fingerprint(&h, "hello"));
        assert_ne!(content_fingerprint(&h, "hello"), content_fingerprint(&h, "hello!"));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher();
        let long = "x".repeat(1000);
        for s in ["", "a", "exactly sixteen!", "héllo wörld 🐾", long.as_str()] {
            let token = c.encrypt(s).unwrap();
            assert_eq!(c.decrypt(&token).unwrap(), s);
        }
    }

    #[test]
    fn encrypt_is_randomized() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    #[test]
    fn decrypt_rejects_tampered_token() {
        let c = cipher();
        let token = c.encrypt("sensitive").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&token).unwrap();
        // Flipping the IV byte that XORs into the padding byte makes it 0xf8.
        raw[IV_LEN - 1] ^= 0xff;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(matches!(c.decrypt(&tampered), Err(EngineError::Integrity(_))));
    }

    #[test]
    fn decrypt_rejects_malformed_tokens() {
        let c = cipher();
        assert!(matches!(c.decrypt("not base64!!"), Err(EngineError::Integrity(_))));
        assert!(matches!(c.decrypt("AAAA"), Err(EngineError::Integrity(_))));
        let odd = base64::engine::general_purpose::STANDARD.encode([0u8; 20]);
        assert!(matches!(c.decrypt(&odd), Err(EngineError::Integrity(_))));
    }

    #[test]
    fn decrypt_with_wrong_key_fails_or_differs() {
        let token = cipher().encrypt("secret").unwrap();
        let other = Cipher::from_hex(&"ab".repeat(32)).unwrap();
        match other.decrypt(&token) {
            Ok(pt) => assert_ne!(pt, "secret"),
            Err(e) => assert!(matches!(e, EngineError::Integrity(_))),
        }
    }

    #[test]
    fn key_validation() {
        assert!(matches!(Cipher::from_hex(""), Err(EngineError::Config(_))));
        assert!(matches!(Cipher::from_hex("abcd"), Err(EngineError::Config(_))));
        assert!(matches!(Cipher::from_hex(&"zz".repeat(32)), Err(EngineError::Config(_))));
        assert!(matches!(Cipher::from_hex(&"00".repeat(33)), Err(EngineError::Config(_))));
        assert!(Cipher::from_hex(TEST_KEY).is_ok());
    }

    #[test]
    fn generated_key_is_usable() {
        let key = generate_key_hex();
        assert_eq!(key.len(), 64);
        assert!(Cipher::from_hex(&key).is_ok());
        assert_ne!(key, generate_key_hex());
    }

    #[test]
    fn hash_prefix_is_short() {
        assert_eq!(hash_prefix("abcdef0123"), "abcdef");
        assert_eq!(hash_prefix("abc"), "abc");
    }

    #[test]
    fn hex_encode_decode_roundtrip() {
        let original = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(hex_decode(&hex_encode(&original)).unwrap(), original);
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
    }
}
