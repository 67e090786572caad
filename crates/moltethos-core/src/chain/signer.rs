//! In-process signing of EIP-155 legacy transactions.
//!
//! RLP is encoded by hand: the registrar only ever signs one transaction
//! shape, so integers, byte strings and one flat list cover it.

use std::fmt;

use k256::ecdsa::{SigningKey, VerifyingKey};

use super::{abi, ChainError};
use crate::{config::Secret, Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// RLP
// ═══════════════════════════════════════════════════════════════════════════

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// Length prefix for a string (`offset` 0x80) or list (`offset` 0xc0).
#[allow(clippy::cast_possible_truncation)]
fn rlp_header(len: usize, offset: u8) -> Vec<u8> {
    match u8::try_from(len) {
        Ok(short) if short <= 55 => vec![offset + short],
        _ => {
            let be = len.to_be_bytes();
            let digits = trim_leading_zeros(&be);
            // A usize length takes at most 8 bytes.
            let mut header = vec![offset + 55 + digits.len() as u8];
            header.extend_from_slice(digits);
            header
        }
    }
}

fn rlp_bytes(bytes: &[u8]) -> Vec<u8> {
    match bytes {
        [single] if *single < 0x80 => vec![*single],
        _ => {
            let mut out = rlp_header(bytes.len(), 0x80);
            out.extend_from_slice(bytes);
            out
        }
    }
}

fn rlp_uint(value: u128) -> Vec<u8> {
    rlp_bytes(trim_leading_zeros(&value.to_be_bytes()))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload = items.concat();
    let mut out = rlp_header(payload.len(), 0xc0);
    out.extend_from_slice(&payload);
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSACTIONS
// ═══════════════════════════════════════════════════════════════════════════

/// `0x`-prefixed 20-byte address as bytes.
pub fn parse_address(value: &str) -> std::result::Result<[u8; 20], ChainError> {
    abi::decode_hex(value)?
        .try_into()
        .map_err(|_| ChainError::Rpc(format!("{value} is not a 20-byte address")))
}

/// Pre-EIP-1559 transaction with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u128,
    pub gas_price: u128,
    pub gas_limit: u128,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp_uint(self.nonce),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit),
            rlp_bytes(&self.to),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
        ]
    }

    /// Hash signed under EIP-155: the six fields followed by `chain_id, 0, 0`.
    #[must_use]
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut fields = self.fields();
        fields.extend([rlp_uint(u128::from(chain_id)), rlp_uint(0), rlp_uint(0)]);
        abi::keccak256(&rlp_list(&fields))
    }
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl SignedTransaction {
    /// Transaction hash as the node reports it.
    #[must_use]
    pub fn hash(&self) -> String {
        abi::to_hex(&abi::keccak256(&self.raw))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SIGNER
// ═══════════════════════════════════════════════════════════════════════════

/// Ethereum address of a public key: the last 20 bytes of the keccak hash
/// of its uncompressed point.
#[must_use]
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = abi::keccak256(&point.as_bytes()[1..]);
    abi::to_hex(&hash[12..])
}

/// Account key held by the worker.
pub struct LocalSigner {
    key: SigningKey,
    address: String,
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when the key is not a valid secp256k1
    /// scalar in hex.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let bytes = abi::decode_hex(secret.expose())
            .map_err(|_| Error::InvalidConfig("chain.private_key is not hex".to_string()))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| Error::InvalidConfig("chain.private_key is not a valid secp256k1 key".to_string()))?;
        Ok(Self::new(key))
    }

    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self {
            address: address_of(key.verifying_key()),
            key,
        }
    }

    /// Lowercase `0x` address derived from the public key.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn sign(
        &self,
        tx: &LegacyTransaction,
        chain_id: u64,
    ) -> std::result::Result<SignedTransaction, ChainError> {
        let hash = tx.signing_hash(chain_id);
        let (signature, recovery) = self
            .key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| ChainError::Rpc(format!("signing failed: {e}")))?;
        let (r, s) = signature.split_bytes();
        let v = chain_id
            .checked_mul(2)
            .and_then(|doubled| doubled.checked_add(35 + u64::from(recovery.to_byte())))
            .ok_or_else(|| ChainError::Rpc(format!("chain id {chain_id} is out of range")))?;

        let mut fields = tx.fields();
        fields.extend([
            rlp_uint(u128::from(v)),
            rlp_bytes(trim_leading_zeros(&r)),
            rlp_bytes(trim_leading_zeros(&s)),
        ]);
        Ok(SignedTransaction {
            raw: rlp_list(&fields),
            v,
            r: r.into(),
            s: s.into(),
        })
    }
}
