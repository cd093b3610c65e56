//! Govnode Cryptography
//!
//! Ed25519 key pairs and the message signer used by masternode announcements,
//! pings, payment votes and budget votes.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use govnode_core::{sha256d, Hash256, MessageSigner, PubKey, SecretKey, SignerError};
use rand::rngs::OsRng;
use thiserror::Error;

/// Prefix mixed into every signed message so signatures cannot be replayed
/// as transaction signatures
pub const MESSAGE_MAGIC: &str = "Govnode Signed Message:\n";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,
}

/// Key pair for an operator or collateral owner
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn from_secret(secret: &SecretKey) -> Self {
        let signing_key = SigningKey::from_bytes(&secret.0);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create keypair from private key hex
    pub fn from_private_key_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_hex(hex_str).ok_or(CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_secret(&secret))
    }

    pub fn secret(&self) -> SecretKey {
        SecretKey(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> PubKey {
        PubKey(self.verifying_key.as_bytes().to_vec())
    }

    /// Get public key as hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Sign raw bytes
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Verify raw bytes against a public key
    pub fn verify(
        public_key: &PubKey,
        message: &[u8],
        signature_bytes: &[u8],
    ) -> Result<(), CryptoError> {
        let pub_key_array: [u8; 32] = public_key
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let verifying_key =
            VerifyingKey::from_bytes(&pub_key_array).map_err(|_| CryptoError::InvalidPublicKey)?;

        let sig_array: [u8; 64] = signature_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;

        let signature = Signature::from_bytes(&sig_array);

        verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Digest actually signed for a text message
pub fn message_digest(message: &str) -> Hash256 {
    let mut data = Vec::with_capacity(MESSAGE_MAGIC.len() + message.len());
    data.extend_from_slice(MESSAGE_MAGIC.as_bytes());
    data.extend_from_slice(message.as_bytes());
    sha256d(&data)
}

/// Signs `sha256d(MESSAGE_MAGIC ‖ message)` with Ed25519
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacySigner;

impl MessageSigner for LegacySigner {
    fn sign(&self, message: &str, key: &SecretKey) -> Result<Vec<u8>, SignerError> {
        let keypair = KeyPair::from_secret(key);
        Ok(keypair.sign(message_digest(message).as_bytes()))
    }

    fn verify(&self, pubkey: &PubKey, signature: &[u8], message: &str) -> bool {
        KeyPair::verify(pubkey, message_digest(message).as_bytes(), signature).is_ok()
    }

    fn public_key(&self, key: &SecretKey) -> Result<PubKey, SignerError> {
        Ok(KeyPair::from_secret(key).public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = KeyPair::generate();
        let pub_key = keypair.public_key_hex();

        assert_eq!(pub_key.len(), 64); // 32 bytes = 64 hex chars
        assert!(keypair.public_key().is_valid());
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"test message";

        let signature = keypair.sign(message);
        let result = KeyPair::verify(&keypair.public_key(), message, &signature);

        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_signature() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"test message");
        let result = KeyPair::verify(&keypair.public_key(), b"wrong message", &signature);

        assert!(result.is_err());
    }

    #[test]
    fn test_private_key_hex_round_trip() {
        let keypair = KeyPair::generate();
        let hex = hex::encode(keypair.secret().0);
        let restored = KeyPair::from_private_key_hex(&hex).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
        assert!(KeyPair::from_private_key_hex("zz").is_err());
    }

    #[test]
    fn test_legacy_signer_message() {
        let secret = SecretKey([7u8; 32]);
        let signer = LegacySigner;
        let pubkey = signer.public_key(&secret).unwrap();

        let sig = signer.sign("10.0.0.1:235111600000000", &secret).unwrap();
        assert!(signer.verify(&pubkey, &sig, "10.0.0.1:235111600000000"));
        assert!(!signer.verify(&pubkey, &sig, "10.0.0.1:235111600000001"));
    }

    #[test]
    fn test_legacy_signer_rejects_malformed_inputs() {
        let signer = LegacySigner;
        let pubkey = signer.public_key(&SecretKey([1u8; 32])).unwrap();
        assert!(!signer.verify(&pubkey, &[0u8; 10], "msg"));
        assert!(!signer.verify(&PubKey(vec![1, 2]), &[0u8; 64], "msg"));
    }
}
