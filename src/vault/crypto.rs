use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

/// One envelope-encrypted value: a random data key sealed under the KEK, and the
/// secret sealed under that data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    encrypted_dek: String,
    dek_nonce: String,
    encrypted_secret: String,
    secret_nonce: String,
}

impl EncryptedSecret {
    /// Text form persisted by the repositories.
    pub fn to_payload(&self) -> String {
        let b64 = &base64::engine::general_purpose::STANDARD;
        let payload = Payload {
            encrypted_dek: b64.encode(&self.encrypted_dek),
            dek_nonce: b64.encode(&self.dek_nonce),
            encrypted_secret: b64.encode(&self.ciphertext),
            secret_nonce: b64.encode(&self.nonce),
        };
        serde_json::to_string(&payload).unwrap_or_default()
    }

    pub fn from_payload(raw: &str) -> anyhow::Result<Self> {
        let b64 = &base64::engine::general_purpose::STANDARD;
        let payload: Payload = serde_json::from_str(raw)?;
        Ok(Self {
            encrypted_dek: b64.decode(payload.encrypted_dek)?,
            dek_nonce: b64.decode(payload.dek_nonce)?,
            ciphertext: b64.decode(payload.encrypted_secret)?,
            nonce: b64.decode(payload.secret_nonce)?,
        })
    }
}

/// AES-256-GCM envelope encryption under a 32-byte key-encryption key.
pub struct VaultCrypto {
    kek: [u8; 32],
}

impl Drop for VaultCrypto {
    fn drop(&mut self) {
        self.kek.zeroize();
    }
}

impl VaultCrypto {
    pub fn new(key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_key(key_hex)?;
        Ok(Self { kek })
    }

    pub fn encrypt_string(&self, plaintext: &str) -> anyhow::Result<EncryptedSecret> {
        let mut dek = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *dek);

        let secret_cipher = Aes256Gcm::new_from_slice(&*dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let nonce = generate_nonce();
        let ciphertext = secret_cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce), &dek[..])
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        Ok(EncryptedSecret {
            encrypted_dek,
            dek_nonce: dek_nonce.to_vec(),
            ciphertext,
            nonce: nonce.to_vec(),
        })
    }

    pub fn decrypt_string(&self, secret: &EncryptedSecret) -> anyhow::Result<String> {
        if secret.dek_nonce.len() != 12 || secret.nonce.len() != 12 {
            anyhow::bail!("malformed nonce");
        }

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_bytes = Zeroizing::new(
            kek_cipher
                .decrypt(Nonce::from_slice(&secret.dek_nonce), secret.encrypted_dek.as_slice())
                .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?,
        );

        let secret_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let plaintext = secret_cipher
            .decrypt(Nonce::from_slice(&secret.nonce), secret.ciphertext.as_slice())
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "ENCRYPTION_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = Zeroizing::new(hex::decode(hex)?);
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Fresh random key in the format `ENCRYPTION_KEY` expects.
pub fn generate_key_hex() -> String {
    let mut key = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut *key);
    hex::encode(&*key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encryption_roundtrip() {
        let crypto = VaultCrypto::new(KEY).unwrap();
        let sealed = crypto.encrypt_string("bearer-abc").unwrap();
        assert_ne!(sealed.ciphertext, b"bearer-abc");
        assert_eq!(crypto.decrypt_string(&sealed).unwrap(), "bearer-abc");
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let crypto = VaultCrypto::new(KEY).unwrap();
        let other = VaultCrypto::new(&generate_key_hex()).unwrap();
        let sealed = crypto.encrypt_string("refresh-xyz").unwrap();
        assert!(other.decrypt_string(&sealed).is_err());
    }

    #[test]
    fn test_payload_survives_text_storage() {
        let crypto = VaultCrypto::new(KEY).unwrap();
        let sealed = crypto.encrypt_string("t").unwrap();
        let parsed = EncryptedSecret::from_payload(&sealed.to_payload()).unwrap();
        assert_eq!(parsed, sealed);
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(VaultCrypto::new("abcd").is_err());
        assert_eq!(generate_key_hex().len(), 64);
    }
}
