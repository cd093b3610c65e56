//! 256-bit hashes and the double-SHA256 writer used for content addressing

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;

/// A 256-bit value stored little-endian, compared as an unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex in display order (most significant byte first)
    pub fn to_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let decoded = hex::decode(s).ok()?;
        let mut bytes: [u8; 32] = decoded.try_into().ok()?;
        bytes.reverse();
        Some(Hash256(bytes))
    }

    fn limbs(&self) -> [u64; 4] {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&self.0[i * 8..i * 8 + 8]);
            *limb = u64::from_le_bytes(chunk);
        }
        limbs
    }

    fn from_limbs(limbs: [u64; 4]) -> Self {
        let mut bytes = [0u8; 32];
        for (i, limb) in limbs.iter().enumerate() {
            bytes[i * 8..i * 8 + 8].copy_from_slice(&limb.to_le_bytes());
        }
        Hash256(bytes)
    }

    fn wrapping_sub(&self, other: &Hash256) -> Hash256 {
        let a = self.limbs();
        let b = other.limbs();
        let mut out = [0u64; 4];
        let mut borrow = false;
        for i in 0..4 {
            let (d1, o1) = a[i].overflowing_sub(b[i]);
            let (d2, o2) = d1.overflowing_sub(borrow as u64);
            out[i] = d2;
            borrow = o1 || o2;
        }
        Hash256::from_limbs(out)
    }

    /// `|self - other|` over the full 256-bit range
    pub fn abs_diff(&self, other: &Hash256) -> Hash256 {
        if self >= other {
            self.wrapping_sub(other)
        } else {
            other.wrapping_sub(self)
        }
    }

    /// Adds a small integer, wrapping at 2^256
    pub fn add_u32(&self, n: u32) -> Hash256 {
        let mut limbs = self.limbs();
        let mut carry = n as u64;
        for limb in limbs.iter_mut() {
            if carry == 0 {
                break;
            }
            let (sum, overflow) = limb.overflowing_add(carry);
            *limb = sum;
            carry = overflow as u64;
        }
        Hash256::from_limbs(limbs)
    }

    pub fn low_u64(&self) -> u64 {
        self.limbs()[0]
    }

    /// Compact ("nBits") encoding of the value
    pub fn compact(&self) -> u32 {
        let size = match self.0.iter().rposition(|b| *b != 0) {
            Some(idx) => idx + 1,
            None => return 0,
        };
        let byte_at = |i: isize| -> u32 {
            if i < 0 {
                0
            } else {
                self.0[i as usize] as u32
            }
        };
        let top = size as isize - 1;
        let mut mantissa = (byte_at(top) << 16) | (byte_at(top - 1) << 8) | byte_at(top - 2);
        let mut size = size as u32;
        if mantissa & 0x0080_0000 != 0 {
            mantissa >>= 8;
            size += 1;
        }
        (size << 24) | mantissa
    }
}

impl Ord for Hash256 {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.limbs();
        let b = other.limbs();
        for i in (0..4).rev() {
            match a[i].cmp(&b[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Hash256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

/// Double SHA-256
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&second);
    Hash256(bytes)
}

/// Accumulates fields in a fixed little-endian layout and hashes them.
///
/// Every content hash in the protocol goes through this writer so that
/// independent nodes derive identical keys for the same object.
#[derive(Default)]
pub struct HashWriter {
    buf: Vec<u8>,
}

impl HashWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_hash(&mut self, h: &Hash256) -> &mut Self {
        self.buf.extend_from_slice(&h.0);
        self
    }

    fn write_compact_size(&mut self, len: usize) {
        if len < 253 {
            self.buf.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.push(253);
            self.buf.extend_from_slice(&(len as u16).to_le_bytes());
        } else if len <= u32::MAX as usize {
            self.buf.push(254);
            self.buf.extend_from_slice(&(len as u32).to_le_bytes());
        } else {
            self.buf.push(255);
            self.buf.extend_from_slice(&(len as u64).to_le_bytes());
        }
    }

    /// Length-prefixed byte vector
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.write_compact_size(data.len());
        self.buf.extend_from_slice(data);
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes())
    }

    pub fn finish(&self) -> Hash256 {
        sha256d(&self.buf)
    }
}
