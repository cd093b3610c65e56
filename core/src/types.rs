//! Outpoints, scripts, keys and the minimal transaction shape the
//! governance layer inspects

use crate::hash::{Hash256, HashWriter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

pub type Amount = i64;

pub const COIN: Amount = 100_000_000;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_RETURN: u8 = 0x6a;

/// Reference to a transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }

    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_null() && self.index == u32::MAX
    }

    /// `txid-index`, the form used inside signed messages
    pub fn short(&self) -> String {
        format!("{}-{}", self.txid, self.index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COutPoint({}, {})", self.txid, self.index)
    }
}

/// 160-bit key identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(pub [u8; 20]);

/// Public key bytes as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PubKey(pub Vec<u8>);

impl PubKey {
    pub const SIZE: usize = 32;

    pub fn is_valid(&self) -> bool {
        self.0.len() == Self::SIZE
    }

    pub fn key_id(&self) -> KeyId {
        let digest = Sha256::digest(&self.0);
        let mut id = [0u8; 20];
        id.copy_from_slice(&digest[..20]);
        KeyId(id)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Private key bytes. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(pub [u8; 32]);

impl SecretKey {
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes: [u8; 32] = hex::decode(s).ok()?.try_into().ok()?;
        Some(SecretKey(bytes))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

/// Locking script
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn pay_to_key_id(id: &KeyId) -> Self {
        let mut s = Vec::with_capacity(25);
        s.push(OP_DUP);
        s.push(OP_HASH160);
        s.push(20);
        s.extend_from_slice(&id.0);
        s.push(OP_EQUALVERIFY);
        s.push(OP_CHECKSIG);
        Script(s)
    }

    /// P2PKH script for a key, empty when the key is malformed
    pub fn pay_to_pubkey_hash(key: &PubKey) -> Self {
        if !key.is_valid() {
            return Script::default();
        }
        Self::pay_to_key_id(&key.key_id())
    }

    pub fn pay_to_script_hash(hash: &[u8; 20]) -> Self {
        let mut s = Vec::with_capacity(23);
        s.push(OP_HASH160);
        s.push(20);
        s.extend_from_slice(hash);
        s.push(OP_EQUAL);
        Script(s)
    }

    /// `OP_RETURN <hash>`
    pub fn op_return(hash: &Hash256) -> Self {
        let mut s = Vec::with_capacity(34);
        s.push(OP_RETURN);
        s.push(32);
        s.extend_from_slice(&hash.0);
        Script(s)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_pay_to_pubkey_hash(&self) -> bool {
        let s = &self.0;
        s.len() == 25
            && s[0] == OP_DUP
            && s[1] == OP_HASH160
            && s[2] == 20
            && s[23] == OP_EQUALVERIFY
            && s[24] == OP_CHECKSIG
    }

    pub fn is_pay_to_script_hash(&self) -> bool {
        let s = &self.0;
        s.len() == 23 && s[0] == OP_HASH160 && s[1] == 20 && s[22] == OP_EQUAL
    }

    pub fn is_normal_payment_script(&self) -> bool {
        self.is_pay_to_pubkey_hash() || self.is_pay_to_script_hash()
    }

    pub fn is_unspendable(&self) -> bool {
        self.0.first() == Some(&OP_RETURN)
    }

    pub fn key_id(&self) -> Option<KeyId> {
        if !self.is_pay_to_pubkey_hash() {
            return None;
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(&self.0[3..23]);
        Some(KeyId(id))
    }

    /// Human-readable destination
    pub fn to_address(&self) -> String {
        if let Some(id) = self.key_id() {
            format!("G{}", hex::encode(id.0))
        } else if self.is_pay_to_script_hash() {
            format!("S{}", hex::encode(&self.0[2..22]))
        } else {
            hex::encode(&self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script: Script,
}

impl TxOut {
    pub fn new(value: Amount, script: Script) -> Self {
        Self { value, script }
    }
}

/// The parts of a transaction the governance layer reads or writes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub lock_time: u32,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        let mut w = HashWriter::new();
        w.write_u32(self.lock_time);
        w.write_u32(self.outputs.len() as u32);
        for out in &self.outputs {
            w.write_i64(out.value);
            w.write_bytes(out.script.as_bytes());
        }
        w.finish()
    }

    /// Total value of all outputs
    pub fn value_out(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// An unspent output together with the height it was mined at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub output: TxOut,
    pub height: i64,
}

/// Addresses that must not be advertised to other peers
pub fn is_private_address(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        IpAddr::V6(ip) => {
            ip.is_loopback() || ip.is_unspecified() || (ip.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}
