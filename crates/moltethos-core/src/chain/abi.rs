//! Minimal Solidity ABI helpers for the identity registry.
//!
//! Covers only what the registrar needs: function selectors, event topics,
//! one dynamic `string` argument and `uint256` words.

use sha3::{Digest, Keccak256};

use super::ChainError;

const WORD: usize = 32;

#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of the keccak hash of a function signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `0x`-prefixed topic hash of an event signature.
#[must_use]
pub fn event_topic(signature: &str) -> String {
    to_hex(&keccak256(signature.as_bytes()))
}

#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Calldata for a function taking a single `string` argument.
#[must_use]
pub fn encode_string_call(signature: &str, value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded_len = bytes.len().div_ceil(WORD) * WORD;

    let mut data = Vec::with_capacity(4 + 2 * WORD + padded_len);
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(&uint_word(WORD as u128));
    data.extend_from_slice(&uint_word(bytes.len() as u128));
    data.extend_from_slice(bytes);
    data.resize(4 + 2 * WORD + padded_len, 0);
    data
}

/// Calldata for a function without arguments.
#[must_use]
pub fn encode_call(signature: &str) -> Vec<u8> {
    selector(signature).to_vec()
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>, ChainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let digits = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    hex::decode(&digits).map_err(|e| ChainError::Rpc(format!("invalid hex '{value}': {e}")))
}

/// Parse a JSON-RPC quantity (`0x`-prefixed, no leading zeros required).
pub fn parse_quantity(value: &str) -> Result<u128, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Rpc(format!("quantity without 0x prefix: '{value}'")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Rpc(format!("invalid quantity '{value}': {e}")))
}

/// Decode a 32-byte big-endian word (topic or return data) to a decimal string.
///
/// Works for the full `uint256` range.
pub fn decode_uint256(value: &str) -> Result<String, ChainError> {
    let bytes = decode_hex(value)?;
    if bytes.is_empty() || bytes.len() > WORD {
        return Err(ChainError::Rpc(format!(
            "expected a 32-byte word, got {} bytes",
            bytes.len()
        )));
    }

    // Repeated division by 10 over the big-endian byte string.
    let mut digits = Vec::new();
    let mut number = bytes;
    while number.iter().any(|b| *b != 0) {
        let mut remainder = 0u32;
        for byte in &mut number {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = u8::try_from(acc / 10).unwrap_or(u8::MAX);
            remainder = acc % 10;
        }
        digits.push(char::from(b'0' + u8::try_from(remainder).unwrap_or(0)));
    }

    if digits.is_empty() {
        Ok("0".to_string())
    } else {
        Ok(digits.iter().rev().collect())
    }
}

/// Whether a 32-byte topic encodes the zero address.
#[must_use]
pub fn is_zero_topic(topic: &str) -> bool {
    topic
        .strip_prefix("0x")
        .unwrap_or(topic)
        .chars()
        .all(|c| c == '0')
}
