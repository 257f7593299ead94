//! AEAD sealing for audit event details.
//!
//! XChaCha20-Poly1305 with a random 24-byte nonce per event; the wire
//! form is base64(nonce || ciphertext).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::error::{ComplianceError, Result};

const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

pub struct AuditCipher {
    cipher: XChaCha20Poly1305,
}

impl AuditCipher {
    /// Build a cipher from hex (64 chars) or base64 key material
    /// encoding exactly 32 bytes.
    pub fn from_key_material(material: &str) -> Result<Self> {
        let material = material.trim();
        let bytes = if material.len() == KEY_LEN * 2 && material.chars().all(|c| c.is_ascii_hexdigit())
        {
            hex::decode(material).map_err(|e| ComplianceError::Crypto {
                message: format!("invalid hex key: {e}"),
            })?
        } else {
            BASE64.decode(material).map_err(|e| ComplianceError::Crypto {
                message: format!("invalid base64 key: {e}"),
            })?
        };

        if bytes.len() != KEY_LEN {
            return Err(ComplianceError::Crypto {
                message: format!("audit key must be {KEY_LEN} bytes, got {}", bytes.len()),
            });
        }

        Ok(Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&bytes)),
        })
    }

    /// Encrypt a serialized details payload.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ComplianceError::Crypto {
                message: "encryption failed".to_string(),
            })?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a payload produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let bytes = BASE64.decode(sealed).map_err(|e| ComplianceError::Crypto {
            message: format!("invalid sealed payload: {e}"),
        })?;
        if bytes.len() < NONCE_LEN {
            return Err(ComplianceError::Crypto {
                message: "sealed payload too short".to_string(),
            });
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ComplianceError::Crypto {
                message: "decryption failed (wrong key or corrupted payload)".to_string(),
            })
    }
}
