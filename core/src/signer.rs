//! Message signing capability

use crate::error::SignerError;
use crate::types::{PubKey, SecretKey};

/// Signs and verifies the string messages every governance object carries
pub trait MessageSigner: Send + Sync {
    fn sign(&self, message: &str, key: &SecretKey) -> Result<Vec<u8>, SignerError>;

    fn verify(&self, pubkey: &PubKey, signature: &[u8], message: &str) -> bool;

    fn public_key(&self, key: &SecretKey) -> Result<PubKey, SignerError>;
}
