//! NIP-04 content crypto and event signing.
//!
//! Request and response content travels as `base64(ciphertext)?iv=base64(iv)`,
//! AES-256-CBC keyed with the x-coordinate of the secp256k1 ECDH point between
//! the two parties' keys. Events are Schnorr-signed over the NIP-01 canonical
//! serialization; the `nostr` crate carries that part.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use nostr::secp256k1::ecdh;
use nostr::{Event, Kind, Tag, Timestamp, UnsignedEvent};
use std::str::FromStr;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    BadKey(String),
    #[error("invalid ciphertext: {0}")]
    BadCiphertext(String),
    #[error("invalid signature: {0}")]
    BadSignature(String),
}

/// ECDH shared secret between an x-only pubkey (hex) and our secret key.
/// NIP-04 uses the x-coordinate of the shared point, with the even-parity
/// lift of the peer key.
pub fn shared_secret(
    their_pubkey_hex: &str,
    my_secret: &nostr::SecretKey,
) -> Result<[u8; 32], CryptoError> {
    let full = format!("02{their_pubkey_hex}");
    let their_pubkey = nostr::secp256k1::PublicKey::from_str(&full)
        .map_err(|e| CryptoError::BadKey(e.to_string()))?;
    let point = ecdh::shared_secret_point(&their_pubkey, my_secret);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&point[..32]);
    Ok(secret)
}

pub fn encrypt(plaintext: &str, shared_secret: &[u8; 32]) -> String {
    let iv: [u8; 16] = rand::random();
    let ciphertext = Aes256CbcEnc::new(shared_secret.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    format!("{}?iv={}", BASE64.encode(ciphertext), BASE64.encode(iv))
}

pub fn decrypt(content: &str, shared_secret: &[u8; 32]) -> Result<String, CryptoError> {
    let (ciphertext_b64, iv_b64) = content
        .split_once("?iv=")
        .ok_or_else(|| CryptoError::BadCiphertext("missing iv".into()))?;
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| CryptoError::BadCiphertext(e.to_string()))?;
    let iv: [u8; 16] = BASE64
        .decode(iv_b64)
        .map_err(|e| CryptoError::BadCiphertext(e.to_string()))?
        .try_into()
        .map_err(|_| CryptoError::BadCiphertext("iv is not 16 bytes".into()))?;
    let plaintext = Aes256CbcDec::new(shared_secret.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| CryptoError::BadCiphertext(e.to_string()))?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::BadCiphertext(e.to_string()))
}

/// Build and Schnorr-sign an event with our identity keys. The event id is
/// the SHA-256 of the canonical serialization; both come from the signer.
pub fn sign_event(
    keys: &nostr::Keys,
    kind: u16,
    tags: Vec<Tag>,
    content: String,
) -> Result<Event, CryptoError> {
    let unsigned = UnsignedEvent::new(
        keys.public_key(),
        Timestamp::now(),
        Kind::Custom(kind),
        tags,
        content,
    );
    unsigned
        .sign(keys)
        .map_err(|e| CryptoError::BadSignature(e.to_string()))
}

pub fn verify_event(event: &Event) -> bool {
    event.verify().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_is_symmetric() {
        let a = nostr::Keys::generate();
        let b = nostr::Keys::generate();
        let ab = shared_secret(&b.public_key().to_hex(), a.secret_key()).unwrap();
        let ba = shared_secret(&a.public_key().to_hex(), b.secret_key()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let a = nostr::Keys::generate();
        let b = nostr::Keys::generate();
        let ss = shared_secret(&b.public_key().to_hex(), a.secret_key()).unwrap();
        let plaintext = r#"{"method":"pay_invoice","params":{"invoice":"lnbc1..."}}"#;
        let wire = encrypt(plaintext, &ss);
        assert!(wire.contains("?iv="));
        let ss2 = shared_secret(&a.public_key().to_hex(), b.secret_key()).unwrap();
        assert_eq!(decrypt(&wire, &ss2).unwrap(), plaintext);
    }

    #[test]
    fn decrypt_rejects_malformed_content() {
        let ss = [7u8; 32];
        assert!(matches!(
            decrypt("no-iv-separator", &ss),
            Err(CryptoError::BadCiphertext(_))
        ));
        assert!(matches!(
            decrypt("!!!?iv=!!!", &ss),
            Err(CryptoError::BadCiphertext(_))
        ));
        // valid base64, wrong key material
        let other = [9u8; 32];
        let wire = encrypt("hello", &other);
        assert!(decrypt(&wire, &ss).is_err());
    }

    #[test]
    fn shared_secret_rejects_bad_pubkey() {
        let keys = nostr::Keys::generate();
        assert!(matches!(
            shared_secret("zz", keys.secret_key()),
            Err(CryptoError::BadKey(_))
        ));
    }

    #[test]
    fn signed_event_verifies() {
        let keys = nostr::Keys::generate();
        let tags = vec![Tag::parse(&["p", &keys.public_key().to_hex()]).unwrap()];
        let event = sign_event(&keys, 23195, tags, "content".into()).unwrap();
        assert!(verify_event(&event));
        assert_eq!(event.kind.as_u16(), 23195);
    }
}
