//! Master-key management and field-level encryption
//!
//! Implements the vault's token codec: values are stored either as
//! `PLAIN:<literal>` (no master password set) or as
//! `ENC:<hex(nonce ‖ ciphertext ‖ tag)>` where the ciphertext is produced by
//! an HMAC-SHA256 keystream and the tag authenticates `nonce ‖ ciphertext`.
//!
//! The byte layout is load-bearing: vaults written by earlier releases must
//! remain readable, so the scheme is kept exactly as shipped (16-byte nonce,
//! 32-byte keystream blocks keyed by a big-endian u32 counter, 16-byte
//! truncated tag) rather than being replaced by a standard AEAD.

use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};

use crate::error::{Result, VaultError};

type HmacSha256 = Hmac<Sha256>;

/// Field names whose string values are encrypted before persistence
pub const SENSITIVE_FIELDS: &[&str] = &[
    "private_key",
    "seed_phrase",
    "wif",
    "extended_private_key",
];

/// PBKDF2-HMAC-SHA256 iteration count (matches existing vault data)
const PBKDF2_ITERATIONS: u32 = 600_000;

/// Length of the persisted salt in bytes
const SALT_LENGTH: usize = 32;

/// Derived key length in bytes
const KEY_LENGTH: usize = 32;

/// Nonce length in bytes
const NONCE_LENGTH: usize = 16;

/// Truncated authentication tag length in bytes
const TAG_LENGTH: usize = 16;

/// Process-wide encryption context.
///
/// Holds the master key behind a read-mostly lock. The key is set exactly
/// once per process lifetime (`set_master_password` is first-writer-wins);
/// the only way to replace it is the explicit password-change flow.
pub struct SecurityContext {
    /// Path of the raw 32-byte salt file
    salt_path: PathBuf,

    /// Derived master key plus the salt it was derived from
    key: RwLock<Option<KeyMaterial>>,

    /// Field names treated as sensitive during dict encryption
    sensitive_fields: Vec<String>,
}

struct KeyMaterial {
    key: [u8; KEY_LENGTH],
    salt: Vec<u8>,
}

impl SecurityContext {
    /// Create a context with no master key set.
    ///
    /// Until `set_master_password` succeeds, `encrypt` emits `PLAIN:` tokens.
    pub fn new<P: AsRef<Path>>(salt_path: P) -> Self {
        Self {
            salt_path: salt_path.as_ref().to_path_buf(),
            key: RwLock::new(None),
            sensitive_fields: SENSITIVE_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the set of sensitive field names.
    pub fn with_sensitive_fields(mut self, fields: Vec<String>) -> Self {
        self.sensitive_fields = fields;
        self
    }

    /// Derive the master key from a password. Returns `true` on the first
    /// successful call; every later call returns `false` and keeps the
    /// original key (first writer wins under concurrency).
    pub fn set_master_password(&self, password: &str) -> bool {
        let mut guard = self.key.write();
        if guard.is_some() {
            warn!("Master password already set; keeping the original key");
            return false;
        }

        let salt = match self.load_or_create_salt() {
            Ok(salt) => salt,
            Err(e) => {
                warn!("Could not load or create salt file: {}", e);
                return false;
            }
        };

        let key = derive_key(password, &salt);
        *guard = Some(KeyMaterial { key, salt });
        info!("Master password set; vault is in encrypted mode");
        true
    }

    /// Whether a master key is currently held.
    pub fn is_encrypted_mode(&self) -> bool {
        self.key.read().is_some()
    }

    /// Whether a salt file exists on disk.
    pub fn has_salt(&self) -> bool {
        self.salt_path.exists()
    }

    /// Encrypt a single value into the token format.
    ///
    /// With no key set this returns `PLAIN:<literal>`; otherwise an `ENC:`
    /// token with a fresh random nonce per call.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let guard = self.key.read();
        let material = match guard.as_ref() {
            Some(m) => m,
            None => return format!("PLAIN:{}", plaintext),
        };

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let mut ciphertext = plaintext.as_bytes().to_vec();
        apply_keystream(&material.key, &nonce, &mut ciphertext);

        let tag = compute_tag(&material.key, &nonce, &ciphertext);

        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len() + TAG_LENGTH);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        payload.extend_from_slice(&tag);
        format!("ENC:{}", hex::encode(payload))
    }

    /// Decrypt a token.
    ///
    /// `PLAIN:` tokens pass through; `ENC:` tokens are authenticated before
    /// decryption and fail with a tamper error on mismatch. Tokens with any
    /// other prefix are legacy data and are returned unchanged.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        if let Some(literal) = token.strip_prefix("PLAIN:") {
            return Ok(literal.to_string());
        }
        let encoded = match token.strip_prefix("ENC:") {
            Some(e) => e,
            None => return Ok(token.to_string()),
        };

        let guard = self.key.read();
        let material = guard.as_ref().ok_or(VaultError::NoMasterKey)?;

        let payload = hex::decode(encoded)
            .map_err(|e| VaultError::malformed(format!("invalid hex payload: {}", e)))?;
        if payload.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(VaultError::malformed("encrypted payload too short"));
        }

        let nonce = &payload[..NONCE_LENGTH];
        let tag = &payload[payload.len() - TAG_LENGTH..];
        let ciphertext = &payload[NONCE_LENGTH..payload.len() - TAG_LENGTH];

        // Constant-time tag verification
        let mut mac = HmacSha256::new_from_slice(&material.key)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(nonce);
        mac.update(ciphertext);
        mac.verify_truncated_left(tag)
            .map_err(|_| VaultError::tamper("wrong password or modified data"))?;

        let mut plaintext = ciphertext.to_vec();
        apply_keystream(&material.key, nonce, &mut plaintext);
        String::from_utf8(plaintext)
            .map_err(|_| VaultError::tamper("decrypted bytes are not valid UTF-8"))
    }

    /// Encrypt the sensitive string fields of a JSON object, recursing into
    /// nested objects. Non-object input and non-string values under
    /// sensitive names are returned untouched.
    pub fn encrypt_fields(&self, data: &Value) -> Value {
        match data {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    let transformed = if self.is_sensitive(k) {
                        match v {
                            Value::String(s) => Value::String(self.encrypt(s)),
                            other => self.encrypt_fields(other),
                        }
                    } else {
                        self.encrypt_fields(v)
                    };
                    out.insert(k.clone(), transformed);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Decrypt the sensitive string fields of a JSON object (inverse of
    /// `encrypt_fields`). Tamper errors are surfaced, never swallowed.
    pub fn decrypt_fields(&self, data: &Value) -> Result<Value> {
        match data {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    let transformed = if self.is_sensitive(k) {
                        match v {
                            Value::String(s) => Value::String(self.decrypt(s)?),
                            other => self.decrypt_fields(other)?,
                        }
                    } else {
                        self.decrypt_fields(v)?
                    };
                    out.insert(k.clone(), transformed);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Replace the master password.
    ///
    /// Verifies that `old` re-derives the current key, then regenerates the
    /// salt and derives a fresh key from `new`. Data encrypted under the old
    /// key is NOT re-encrypted; it becomes permanently unreadable and must
    /// be migrated offline if still needed.
    pub fn change_master_password(&self, old: &str, new: &str) -> Result<bool> {
        let mut guard = self.key.write();
        let material = match guard.as_mut() {
            Some(m) => m,
            None => return Ok(false),
        };

        let candidate = derive_key(old, &material.salt);
        if candidate != material.key {
            warn!("Password change rejected: old password does not match");
            return Ok(false);
        }

        let mut salt = vec![0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        if let Some(parent) = self.salt_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.salt_path, &salt)?;

        material.key = derive_key(new, &salt);
        material.salt = salt;
        info!("Master password changed; previously stored ciphertexts are now unreadable");
        Ok(true)
    }

    fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive_fields.iter().any(|f| f == field)
    }

    /// Read the salt file verbatim, or create a fresh 32-byte one.
    ///
    /// A short or otherwise odd salt file is used as-is: recoverability of
    /// existing ciphertexts depends on preserving those exact bytes.
    fn load_or_create_salt(&self) -> std::io::Result<Vec<u8>> {
        if self.salt_path.exists() {
            return std::fs::read(&self.salt_path);
        }
        let mut salt = vec![0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        if let Some(parent) = self.salt_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.salt_path, &salt)?;
        Ok(salt)
    }
}

/// PBKDF2-HMAC-SHA256 key derivation (compatible with existing vault data).
fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// XOR `data` in place with the HMAC keystream for `nonce`.
///
/// Block `i` of the keystream is `HMAC-SHA256(key, nonce ‖ i_be32)`.
fn apply_keystream(key: &[u8; KEY_LENGTH], nonce: &[u8], data: &mut [u8]) {
    for (i, chunk) in data.chunks_mut(32).enumerate() {
        let mut mac = HmacSha256::new_from_slice(key)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(nonce);
        mac.update(&(i as u32).to_be_bytes());
        let block = mac.finalize().into_bytes();
        for (byte, ks) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= ks;
        }
    }
}

/// Truncated authentication tag over `nonce ‖ ciphertext`.
fn compute_tag(key: &[u8; KEY_LENGTH], nonce: &[u8], ciphertext: &[u8]) -> [u8; TAG_LENGTH] {
    let mut mac = HmacSha256::new_from_slice(key)
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(nonce);
    mac.update(ciphertext);
    let digest = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&digest[..TAG_LENGTH]);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context() -> (TempDir, SecurityContext) {
        let dir = TempDir::new().unwrap();
        let ctx = SecurityContext::new(dir.path().join(".vault_salt"));
        (dir, ctx)
    }

    #[test]
    fn test_set_master_password_first_call() {
        let (_dir, ctx) = context();
        assert!(!ctx.is_encrypted_mode());
        assert!(!ctx.has_salt());
        assert!(ctx.set_master_password("testpass"));
        assert!(ctx.is_encrypted_mode());
        assert!(ctx.has_salt());
    }

    #[test]
    fn test_set_master_password_twice_fails() {
        let (_dir, ctx) = context();
        assert!(ctx.set_master_password("testpass"));
        assert!(!ctx.set_master_password("other"));

        // Original key keeps working
        let token = ctx.encrypt("still mine");
        assert_eq!(ctx.decrypt(&token).unwrap(), "still mine");
    }

    #[test]
    fn test_concurrent_set_master_password_single_winner() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(SecurityContext::new(dir.path().join(".salt")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || ctx.set_master_password(&format!("pw{}", i)))
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (_dir, ctx) = context();
        ctx.set_master_password("mypassword");
        let original = "Hello World 123 !@# sensitive_data";
        let token = ctx.encrypt(original);
        assert!(token.starts_with("ENC:"));
        assert_eq!(ctx.decrypt(&token).unwrap(), original);
    }

    #[test]
    fn test_empty_string_roundtrip() {
        let (_dir, ctx) = context();
        ctx.set_master_password("testpass");
        let token = ctx.encrypt("");
        assert_eq!(ctx.decrypt(&token).unwrap(), "");
    }

    #[test]
    fn test_unicode_roundtrip() {
        let (_dir, ctx) = context();
        ctx.set_master_password("testpass");
        let original = "Hello 世界 😀 éèê";
        let token = ctx.encrypt(original);
        assert_eq!(ctx.decrypt(&token).unwrap(), original);
    }

    #[test]
    fn test_plain_prefix_without_password() {
        let (_dir, ctx) = context();
        let token = ctx.encrypt("hello");
        assert_eq!(token, "PLAIN:hello");
        assert_eq!(ctx.decrypt(&token).unwrap(), "hello");
    }

    #[test]
    fn test_repeated_encryption_distinct_ciphertexts() {
        let (_dir, ctx) = context();
        ctx.set_master_password("testpass");
        let tokens: std::collections::HashSet<String> =
            (0..64).map(|_| ctx.encrypt("same plaintext")).collect();
        assert_eq!(tokens.len(), 64);
    }

    #[test]
    fn test_concurrent_encryption_distinct_ciphertexts() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(SecurityContext::new(dir.path().join(".salt")));
        ctx.set_master_password("testpass");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    (0..32).map(|_| ctx.encrypt("dup")).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = std::collections::HashSet::new();
        for h in handles {
            for token in h.join().unwrap() {
                assert!(all.insert(token), "nonce reuse detected");
            }
        }
    }

    #[test]
    fn test_tamper_detection_every_byte() {
        let (_dir, ctx) = context();
        ctx.set_master_password("testpass");
        let token = ctx.encrypt("secret");
        let payload = hex::decode(&token[4..]).unwrap();

        for i in 0..payload.len() {
            let mut mutated = payload.clone();
            mutated[i] ^= 0xFF;
            let tampered = format!("ENC:{}", hex::encode(&mutated));
            assert!(
                matches!(ctx.decrypt(&tampered), Err(VaultError::Tamper(_))),
                "flipping byte {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_decrypt_without_password_fails() {
        let (dir, ctx) = context();
        ctx.set_master_password("temp-pass");
        let token = ctx.encrypt("secret");

        // Fresh context over the same salt, no password set
        let ctx2 = SecurityContext::new(dir.path().join(".vault_salt"));
        assert!(matches!(ctx2.decrypt(&token), Err(VaultError::NoMasterKey)));
    }

    #[test]
    fn test_wrong_password_fails() {
        let (dir, ctx) = context();
        ctx.set_master_password("correct_password");
        let token = ctx.encrypt("secret data");

        let salt2 = dir.path().join(".other_salt");
        let ctx2 = SecurityContext::new(salt2);
        ctx2.set_master_password("wrong_password");
        assert!(matches!(ctx2.decrypt(&token), Err(VaultError::Tamper(_))));
    }

    #[test]
    fn test_legacy_data_passthrough() {
        let (_dir, ctx) = context();
        assert_eq!(ctx.decrypt("some_legacy_data").unwrap(), "some_legacy_data");
    }

    #[test]
    fn test_malformed_payload() {
        let (_dir, ctx) = context();
        ctx.set_master_password("testpass");
        assert!(matches!(
            ctx.decrypt("ENC:zzzz"),
            Err(VaultError::MalformedToken(_))
        ));
        assert!(matches!(
            ctx.decrypt("ENC:00ff"),
            Err(VaultError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_dict_encryption_sensitive_fields_only() {
        let (_dir, ctx) = context();
        ctx.set_master_password("testpass");
        let data = json!({
            "address": "1A1zP1...",
            "private_key": "5HueCGU...",
            "balance": 1.5,
            "nested": {
                "seed_phrase": "abandon abandon ability",
                "chain": "btc"
            }
        });

        let encrypted = ctx.encrypt_fields(&data);
        assert_eq!(encrypted["address"], "1A1zP1...");
        assert_eq!(encrypted["balance"], 1.5);
        assert!(encrypted["private_key"].as_str().unwrap().starts_with("ENC:"));
        assert!(encrypted["nested"]["seed_phrase"]
            .as_str()
            .unwrap()
            .starts_with("ENC:"));
        assert_eq!(encrypted["nested"]["chain"], "btc");

        let decrypted = ctx.decrypt_fields(&encrypted).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_non_string_sensitive_value_untouched() {
        let (_dir, ctx) = context();
        ctx.set_master_password("testpass");
        let data = json!({ "private_key": 12345 });
        let encrypted = ctx.encrypt_fields(&data);
        assert_eq!(encrypted["private_key"], 12345);
    }

    #[test]
    fn test_change_master_password() {
        let (_dir, ctx) = context();
        ctx.set_master_password("first");
        let old_token = ctx.encrypt("old data");

        assert!(!ctx.change_master_password("wrong", "next").unwrap());
        assert!(ctx.change_master_password("first", "next").unwrap());

        // New key round-trips
        let new_token = ctx.encrypt("new data");
        assert_eq!(ctx.decrypt(&new_token).unwrap(), "new data");

        // Old ciphertext is permanently unreadable (not re-encrypted)
        assert!(ctx.decrypt(&old_token).is_err());
    }

    #[test]
    fn test_short_salt_file_used_verbatim() {
        let dir = TempDir::new().unwrap();
        let salt_path = dir.path().join(".vault_salt");
        std::fs::write(&salt_path, b"short").unwrap();

        let ctx = SecurityContext::new(&salt_path);
        assert!(ctx.set_master_password("pw"));
        let token = ctx.encrypt("data");

        // Same short salt, same password, fresh context: still decryptable
        let ctx2 = SecurityContext::new(&salt_path);
        ctx2.set_master_password("pw");
        assert_eq!(ctx2.decrypt(&token).unwrap(), "data");
        assert_eq!(std::fs::read(&salt_path).unwrap(), b"short");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::sync::OnceLock;

        fn shared() -> &'static SecurityContext {
            static CTX: OnceLock<(TempDir, SecurityContext)> = OnceLock::new();
            let (_, ctx) = CTX.get_or_init(|| {
                let dir = TempDir::new().unwrap();
                let ctx = SecurityContext::new(dir.path().join(".salt"));
                ctx.set_master_password("property-pass");
                (dir, ctx)
            });
            ctx
        }

        proptest! {
            #[test]
            fn roundtrip_any_plaintext(s in "\\PC*") {
                let ctx = shared();
                let token = ctx.encrypt(&s);
                prop_assert!(token.starts_with("ENC:"));
                prop_assert_eq!(ctx.decrypt(&token).unwrap(), s);
            }
        }
    }
}
