//! Session cryptography.
//!
//! Key-pair generation, authenticated box encryption, and anonymous box
//! sealing, implemented with `crypto_box` (X25519 + XSalsa20-Poly1305, the
//! same primitive family as NaCl/libsodium's `crypto_box`).

use crate::error::BridgeError;
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{PublicKey, SalsaBox, SecretKey};

const NONCE_LEN: usize = 24;
const PUBLIC_KEY_LEN: usize = 32;

/// A peer's key material: an X25519 key pair identified by the hex-encoded
/// public key (`session_id`).
pub struct Session {
    secret: SecretKey,
    public: PublicKey,
    session_id: String,
}

impl Session {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        Self::from_secret(secret)
    }

    /// Rehydrate a session from a previously-persisted 32-byte secret key.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(SecretKey::from(bytes))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        let session_id = hex::encode(public.as_bytes());
        Self {
            secret,
            public,
            session_id,
        }
    }

    /// Hex-encoded public key; the identifier this peer subscribes under.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Raw public key bytes.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.public.as_bytes()
    }

    /// The 32 secret key bytes, for callers that persist sessions
    /// themselves (the bridge does not persist anything).
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Authenticated-box encrypt `plaintext` for a receiver identified by
    /// their raw public key bytes. Output is `nonce(24) || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8], receiver_public_key: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let receiver = parse_public_key(receiver_public_key)?;
        let cipher = SalsaBox::new(&receiver, &self.secret);
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| BridgeError::Decode(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Authenticated-box decrypt a payload sent by the peer identified by
    /// `sender_public_key`. Expects `nonce(24) || ciphertext` framing.
    pub fn decrypt(&self, payload: &[u8], sender_public_key: &[u8]) -> Result<Vec<u8>, BridgeError> {
        if payload.len() < NONCE_LEN {
            return Err(BridgeError::Decode("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let sender = parse_public_key(sender_public_key)?;
        let cipher = SalsaBox::new(&sender, &self.secret);
        let nonce = crypto_box::Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| BridgeError::Decode(format!("decrypt failed: {e}")))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("session_id", &self.session_id).finish()
    }
}

fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, BridgeError> {
    let array: [u8; PUBLIC_KEY_LEN] = bytes
        .try_into()
        .map_err(|_| BridgeError::Decode(format!("public key must be {PUBLIC_KEY_LEN} bytes")))?;
    Ok(PublicKey::from(array))
}

/// Anonymous-box seal: a one-shot public-key encryption where the sender
/// uses a fresh ephemeral key pair and the receiver can decrypt without
/// knowing the sender's identity.
///
/// Output framing: `ephemeralPublicKey(32) || box(plaintext, nonce,
/// ephemeralPublicKey, receiverSecretKey)`, where
/// `nonce = blake2b_24(ephemeralPublicKey || receiverPublicKey)`.
pub fn anonymous_seal(plaintext: &[u8], receiver_public_key: &[u8]) -> Result<Vec<u8>, BridgeError> {
    let receiver = parse_public_key(receiver_public_key)?;
    let ephemeral = SecretKey::generate(&mut OsRng);
    let ephemeral_public = ephemeral.public_key();

    let nonce_bytes = sealed_box_nonce(ephemeral_public.as_bytes(), receiver_public_key)?;
    let cipher = SalsaBox::new(&receiver, &ephemeral);
    let nonce = crypto_box::Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| BridgeError::Decode(format!("seal failed: {e}")))?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Anonymous-box open: the inverse of [`anonymous_seal`], used by the
/// Provider to decode a frame's `request_source` field with its own key
/// pair.
pub fn anonymous_open(sealed: &[u8], receiver: &Session) -> Result<Vec<u8>, BridgeError> {
    if sealed.len() < PUBLIC_KEY_LEN {
        return Err(BridgeError::Decode(
            "sealed payload shorter than an ephemeral public key".into(),
        ));
    }
    let (ephemeral_public_bytes, ciphertext) = sealed.split_at(PUBLIC_KEY_LEN);
    let ephemeral_public = parse_public_key(ephemeral_public_bytes)?;

    let nonce_bytes = sealed_box_nonce(ephemeral_public_bytes, &receiver.public_key_bytes())?;
    let cipher = SalsaBox::new(&ephemeral_public, &receiver.secret);
    let nonce = crypto_box::Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| BridgeError::Decode(format!("unseal failed: {e}")))
}

fn sealed_box_nonce(ephemeral_public: &[u8], receiver_public: &[u8]) -> Result<[u8; NONCE_LEN], BridgeError> {
    let mut hasher = Blake2bVar::new(NONCE_LEN)
        .map_err(|e| BridgeError::Decode(format!("blake2b init failed: {e}")))?;
    hasher.update(ephemeral_public);
    hasher.update(receiver_public);
    let mut out = [0u8; NONCE_LEN];
    hasher
        .finalize_variable(&mut out)
        .map_err(|e| BridgeError::Decode(format!("blake2b finalize failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_box_round_trips() {
        let alice = Session::generate();
        let bob = Session::generate();

        let plaintext = br#"{"method":"sendTransaction","id":"1"}"#;
        let ciphertext = alice.encrypt(plaintext, &bob.public_key_bytes()).unwrap();
        let decoded = bob.decrypt(&ciphertext, &alice.public_key_bytes()).unwrap();

        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn wrong_sender_key_fails_to_decrypt() {
        let alice = Session::generate();
        let bob = Session::generate();
        let mallory = Session::generate();

        let ciphertext = alice.encrypt(b"hello", &bob.public_key_bytes()).unwrap();
        let result = bob.decrypt(&ciphertext, &mallory.public_key_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn anonymous_box_round_trips_without_sender_identity() {
        let receiver = Session::generate();
        let plaintext = br#"{"origin":"https://example.com"}"#;

        let sealed = anonymous_seal(plaintext, &receiver.public_key_bytes()).unwrap();
        let opened = anonymous_open(&sealed, &receiver).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn session_id_is_hex_of_public_key() {
        let session = Session::generate();
        assert_eq!(session.session_id().len(), 64);
        assert!(hex::decode(session.session_id()).is_ok());
    }
}
