//! legacy (eip-155) transaction encoding, signing and contract call data

use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::config::KeySource;
use crate::error::{LedgerError, Result};
use crate::types::TxHash;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// first four bytes of the keccak hash of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// secp256k1 key with its derived address
pub struct Signer {
    key: SigningKey,
    address: [u8; 20],
}

impl Signer {
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(key_hex.trim().trim_start_matches("0x"))
                .map_err(|e| LedgerError::KeyUnavailable(format!("key is not hex: {}", e)))?,
        );
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| LedgerError::KeyUnavailable(format!("invalid secp256k1 key: {}", e)))?;

        let point = key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);

        Ok(Self { key, address })
    }

    /// resolve key material from its source
    pub fn resolve(source: &KeySource) -> Result<Self> {
        let key_hex = source.resolve()?;
        Self::from_hex(&key_hex)
    }

    pub fn address(&self) -> [u8; 20] {
        self.address
    }

    pub fn address_hex(&self) -> String {
        format!("0x{}", hex::encode(self.address))
    }
}

/// unsigned legacy transaction
#[derive(Clone, Debug)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// signed raw bytes plus their hash
#[derive(Clone, Debug)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    pub hash: TxHash,
}

impl SignedTx {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl LegacyTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_uint(out, self.nonce as u128);
        rlp_uint(out, self.gas_price);
        rlp_uint(out, self.gas_limit as u128);
        rlp_bytes(out, &self.to);
        rlp_uint(out, self.value);
        rlp_bytes(out, &self.data);
    }

    /// hash signed over per eip-155
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut fields = Vec::new();
        self.encode_fields(&mut fields);
        rlp_uint(&mut fields, self.chain_id as u128);
        rlp_uint(&mut fields, 0);
        rlp_uint(&mut fields, 0);
        keccak256(&rlp_list(&fields))
    }

    pub fn sign(&self, signer: &Signer) -> Result<SignedTx> {
        let digest = self.signing_hash();
        let (signature, recovery_id) = signer
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| LedgerError::SigningFailed(e.to_string()))?;

        let v = recovery_id.to_byte() as u128 + 35 + 2 * self.chain_id as u128;
        let sig_bytes = signature.to_bytes();
        let (r, s) = sig_bytes.split_at(32);

        let mut fields = Vec::new();
        self.encode_fields(&mut fields);
        rlp_uint(&mut fields, v);
        rlp_bytes(&mut fields, trim_leading_zeros(r));
        rlp_bytes(&mut fields, trim_leading_zeros(s));

        let raw = rlp_list(&fields);
        let hash = TxHash::from_bytes(&keccak256(&raw));
        Ok(SignedTx { raw, hash })
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn rlp_length_prefix(out: &mut Vec<u8>, offset: u8, len: usize) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let len_bytes = (len as u64).to_be_bytes();
        let len_bytes = trim_leading_zeros(&len_bytes);
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
}

fn rlp_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        rlp_length_prefix(out, 0x80, bytes.len());
        out.extend_from_slice(bytes);
    }
}

fn rlp_uint(out: &mut Vec<u8>, value: u128) {
    let bytes = value.to_be_bytes();
    rlp_bytes(out, trim_leading_zeros(&bytes));
}

fn rlp_list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    rlp_length_prefix(&mut out, 0xc0, payload.len());
    out.extend_from_slice(payload);
    out
}

fn abi_word_address(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

fn abi_word_uint(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// `transfer(address,uint256)`
pub fn erc20_transfer_data(to: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut data = selector("transfer(address,uint256)").to_vec();
    data.extend_from_slice(&abi_word_address(to));
    data.extend_from_slice(&abi_word_uint(amount));
    data
}

/// `mintBadge(address,string)`
pub fn mint_badge_data(to: &[u8; 20], token_uri: &str) -> Vec<u8> {
    let mut data = selector("mintBadge(address,string)").to_vec();
    data.extend_from_slice(&abi_word_address(to));
    data.extend_from_slice(&abi_word_uint(0x40));
    data.extend_from_slice(&abi_word_uint(token_uri.len() as u128));
    data.extend_from_slice(token_uri.as_bytes());
    let padding = (32 - token_uri.len() % 32) % 32;
    data.extend(std::iter::repeat(0u8).take(padding));
    data
}
