//! Identity - the bridge's long-lived signing key pair.

use crate::crypto::CryptoError;

/// Bridge identity. The hex public key is the on-relay identifier that
/// clients address requests to with a `p` tag.
#[derive(Debug, Clone)]
pub struct Identity {
    pub keys: nostr::Keys,
    pub pubkey_hex: String,
}

impl Identity {
    pub fn from_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let sk = nostr::SecretKey::from_hex(secret_hex)
            .map_err(|e| CryptoError::BadKey(e.to_string()))?;
        let keys = nostr::Keys::new(sk);
        let pubkey_hex = keys.public_key().to_hex();
        Ok(Self { keys, pubkey_hex })
    }

    pub fn generate() -> Self {
        let keys = nostr::Keys::generate();
        let pubkey_hex = keys.public_key().to_hex();
        Self { keys, pubkey_hex }
    }

    pub fn secret_hex(&self) -> String {
        self.keys.secret_key().to_secret_hex()
    }
}
