use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

/// Fixed application salt for key derivation. Changing it invalidates every
/// stored ciphertext, so it is versioned rather than configurable.
const KDF_SALT: &[u8] = b"connector-service.params.v1";
const KDF_ITERATIONS: u32 = 100_000;

#[derive(Debug)]
pub enum CryptoError {
    Encrypt(String),
    Decrypt(String),
    Decode(String),
    Json(serde_json::Error),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::Encrypt(e) => write!(f, "Encryption error: {e}"),
            CryptoError::Decrypt(e) => write!(f, "Decryption error: {e}"),
            CryptoError::Decode(e) => write!(f, "Base64 decode error: {e}"),
            CryptoError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Derive a stable AES-256 key from the operator secret.
/// Same secret, same key — the key itself is never stored.
pub fn derive_key(secret: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
    key
}

enum Mode {
    /// Params are stored as plaintext JSON.
    Disabled,
    Enabled { key: [u8; 32] },
}

/// Whole-document encryption of connection parameter JSON.
///
/// The single control point for the encryption toggle: callers always go
/// through `encrypt_params`/`decrypt_params`, and the disabled mode is an
/// identity round-trip through plaintext JSON. Rows are not re-encrypted
/// when the toggle changes.
pub struct EncryptionService {
    mode: Mode,
}

impl EncryptionService {
    pub fn new(secret: &str) -> Self {
        Self {
            mode: Mode::Enabled {
                key: derive_key(secret),
            },
        }
    }

    pub fn disabled() -> Self {
        Self {
            mode: Mode::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, Mode::Enabled { .. })
    }

    /// Serialize the document and encrypt it as one token:
    /// base64(12-byte nonce ‖ ciphertext+tag).
    pub fn encrypt_params(&self, params: &serde_json::Value) -> Result<String, CryptoError> {
        let plaintext = serde_json::to_vec(params).map_err(CryptoError::Json)?;

        let key = match &self.mode {
            Mode::Disabled => {
                return String::from_utf8(plaintext)
                    .map_err(|e| CryptoError::Encrypt(e.to_string()));
            }
            Mode::Enabled { key } => key,
        };

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new(key.into());
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(&combined))
    }

    /// Decrypt a token back to the parameter document. Tampered or
    /// wrong-key tokens fail; they never decode to corrupted data because
    /// GCM authenticates the ciphertext. Decrypted bytes that are not valid
    /// JSON come back as a JSON string value.
    pub fn decrypt_params(&self, token: &str) -> Result<serde_json::Value, CryptoError> {
        let key = match &self.mode {
            Mode::Disabled => {
                return Ok(serde_json::from_str(token)
                    .unwrap_or_else(|_| serde_json::Value::String(token.to_string())));
            }
            Mode::Enabled { key } => key,
        };

        let data = STANDARD
            .decode(token)
            .map_err(|e| CryptoError::Decode(e.to_string()))?;

        if data.len() < 12 {
            return Err(CryptoError::Decrypt(
                "Ciphertext too short (< 12 bytes)".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new(key.into());
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        Ok(serde_json::from_slice(&plaintext).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&plaintext).into_owned())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc() -> EncryptionService {
        EncryptionService::new("unit-test-secret")
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        assert_eq!(derive_key("s3cret"), derive_key("s3cret"));
        assert_ne!(derive_key("s3cret"), derive_key("other"));
    }

    #[test]
    fn test_round_trip_object() {
        let svc = svc();
        let data = serde_json::json!({"host": "localhost", "port": 5432, "password": "pw"});
        let token = svc.encrypt_params(&data).unwrap();
        assert_eq!(svc.decrypt_params(&token).unwrap(), data);
    }

    #[test]
    fn test_round_trip_nested() {
        let svc = svc();
        let data = serde_json::json!({"credentials": {"private_key": "---"}, "ids": [1, 2, 3], "x": null});
        let token = svc.encrypt_params(&data).unwrap();
        assert_eq!(svc.decrypt_params(&token).unwrap(), data);
    }

    #[test]
    fn test_two_encryptions_differ() {
        let svc = svc();
        let data = serde_json::json!({"host": "localhost"});
        let a = svc.encrypt_params(&data).unwrap();
        let b = svc.encrypt_params(&data).unwrap();
        assert_ne!(a, b, "Random nonce should produce different ciphertext each time");
    }

    #[test]
    fn test_wrong_key_fails() {
        let data = serde_json::json!({"secret": "value"});
        let token = EncryptionService::new("key-one").encrypt_params(&data).unwrap();
        let result = EncryptionService::new("key-two").decrypt_params(&token);
        assert!(matches!(result, Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn test_tampered_token_fails() {
        let svc = svc();
        let token = svc
            .encrypt_params(&serde_json::json!({"secret": "value"}))
            .unwrap();
        let mut raw = STANDARD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(&raw);
        assert!(matches!(
            svc.decrypt_params(&tampered),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn test_garbage_token_fails() {
        assert!(svc().decrypt_params("not-valid-base64!!!").is_err());
    }

    #[test]
    fn test_disabled_mode_is_identity() {
        let svc = EncryptionService::disabled();
        let data = serde_json::json!({"host": "localhost", "password": "pw"});
        let token = svc.encrypt_params(&data).unwrap();
        // Stored form is plaintext JSON in this mode.
        assert_eq!(serde_json::from_str::<serde_json::Value>(&token).unwrap(), data);
        assert_eq!(svc.decrypt_params(&token).unwrap(), data);
    }

    #[test]
    fn test_disabled_mode_non_json_falls_back_to_string() {
        let svc = EncryptionService::disabled();
        assert_eq!(
            svc.decrypt_params("just text").unwrap(),
            serde_json::Value::String("just text".to_string())
        );
    }
}
