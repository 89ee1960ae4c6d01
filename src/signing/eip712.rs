//! EIP-712 typed-data hashing and ECDSA signing (§4.E.1).
//!
//! No teacher analog — the source backend never signs typed data, only
//! HMAC requests. Grounded on the `alloy`+`eip712` dependency pairing used
//! by `matlinat-poly_hft_bot` in the example pack. Hashing is done by hand
//! (type hash + field encoding) rather than via `alloy_sol_types::sol!`
//! so the byte layout in §4.E is reproduced exactly and explicitly.

use crate::error::TradingError;
use alloy_primitives::{keccak256, Address, B256, U256};

/// `EIP712Domain(string name,string version,uint256 chainId[,address verifyingContract])`.
/// Domain A (auth) omits `verifyingContract`; domain B (order) includes it.
#[derive(Debug, Clone)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Option<Address>,
}

impl Eip712Domain {
    pub fn auth(chain_id: u64) -> Self {
        Self {
            name: "ClobAuthDomain".to_string(),
            version: "1".to_string(),
            chain_id,
            verifying_contract: None,
        }
    }

    pub fn order(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: "Polymarket CTF Exchange".to_string(),
            version: "1".to_string(),
            chain_id,
            verifying_contract: Some(verifying_contract),
        }
    }

    fn type_string(&self) -> &'static str {
        if self.verifying_contract.is_some() {
            "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)"
        } else {
            "EIP712Domain(string name,string version,uint256 chainId)"
        }
    }

    pub fn separator(&self) -> B256 {
        let type_hash = keccak256(self.type_string().as_bytes());
        let mut fields: Vec<u8> = Vec::with_capacity(32 * 4);
        fields.extend_from_slice(type_hash.as_slice());
        fields.extend_from_slice(keccak256(self.name.as_bytes()).as_slice());
        fields.extend_from_slice(keccak256(self.version.as_bytes()).as_slice());
        fields.extend_from_slice(&pad_u256(U256::from(self.chain_id)));
        if let Some(addr) = self.verifying_contract {
            fields.extend_from_slice(&pad_address(addr));
        }
        keccak256(&fields)
    }
}

/// `ClobAuth(address address,string timestamp,uint256 nonce)`.
pub struct ClobAuthMessage {
    pub address: Address,
    pub timestamp: String,
    pub nonce: U256,
}

impl ClobAuthMessage {
    const TYPE: &'static str = "ClobAuth(address address,string timestamp,uint256 nonce)";

    pub fn struct_hash(&self) -> B256 {
        let mut fields = Vec::with_capacity(32 * 4);
        fields.extend_from_slice(keccak256(Self::TYPE.as_bytes()).as_slice());
        fields.extend_from_slice(&pad_address(self.address));
        fields.extend_from_slice(keccak256(self.timestamp.as_bytes()).as_slice());
        fields.extend_from_slice(&pad_u256(self.nonce));
        keccak256(&fields)
    }
}

/// `Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,
///  uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,
///  uint256 feeRateBps,uint8 side,uint8 signatureType)`.
#[derive(Debug, Clone)]
pub struct OrderTypedData {
    pub salt: U256,
    pub maker: Address,
    pub signer: Address,
    pub taker: Address,
    pub token_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub expiration: U256,
    pub nonce: U256,
    pub fee_rate_bps: U256,
    pub side: u8,
    pub signature_type: u8,
}

impl OrderTypedData {
    const TYPE: &'static str = "Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)";

    pub fn struct_hash(&self) -> B256 {
        let mut fields = Vec::with_capacity(32 * 13);
        fields.extend_from_slice(keccak256(Self::TYPE.as_bytes()).as_slice());
        fields.extend_from_slice(&pad_u256(self.salt));
        fields.extend_from_slice(&pad_address(self.maker));
        fields.extend_from_slice(&pad_address(self.signer));
        fields.extend_from_slice(&pad_address(self.taker));
        fields.extend_from_slice(&pad_u256(self.token_id));
        fields.extend_from_slice(&pad_u256(self.maker_amount));
        fields.extend_from_slice(&pad_u256(self.taker_amount));
        fields.extend_from_slice(&pad_u256(self.expiration));
        fields.extend_from_slice(&pad_u256(self.nonce));
        fields.extend_from_slice(&pad_u256(self.fee_rate_bps));
        fields.extend_from_slice(&pad_u8(self.side));
        fields.extend_from_slice(&pad_u8(self.signature_type));
        keccak256(&fields)
    }
}

fn pad_u256(v: U256) -> [u8; 32] {
    v.to_be_bytes()
}

fn pad_u8(v: u8) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[31] = v;
    buf
}

fn pad_address(a: Address) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[12..].copy_from_slice(a.as_slice());
    buf
}

/// Final EIP-712 digest: `keccak256(0x19 0x01 || domain_separator || struct_hash)`.
pub fn typed_data_digest(domain_separator: B256, struct_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(2 + 32 + 32);
    buf.push(0x19);
    buf.push(0x01);
    buf.extend_from_slice(domain_separator.as_slice());
    buf.extend_from_slice(struct_hash.as_slice());
    keccak256(&buf)
}

/// 65-byte `(r || s || v)` signature, `v` normalized to `{27, 28}`.
pub fn sign_digest(digest: B256, secret_key: &secp256k1::SecretKey) -> Result<[u8; 65], TradingError> {
    let secp = secp256k1::Secp256k1::signing_only();
    let message = secp256k1::Message::from_digest(digest.0);
    let (recovery_id, sig_bytes) = secp
        .sign_ecdsa_recoverable(&message, secret_key)
        .serialize_compact();

    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig_bytes);
    let v = recovery_id.to_i32() as u8;
    out[64] = if v < 27 { v + 27 } else { v };
    Ok(out)
}

pub fn signature_to_hex(sig: &[u8; 65]) -> String {
    format!("0x{}", hex::encode(sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separator_differs_with_verifying_contract() {
        let auth = Eip712Domain::auth(137);
        let order = Eip712Domain::order(137, Address::ZERO);
        assert_ne!(auth.separator(), order.separator());
    }

    #[test]
    fn signature_v_normalized_to_27_or_28() {
        let secp = secp256k1::Secp256k1::new();
        let (secret_key, _pk) = secp.generate_keypair(&mut rand::thread_rng());
        let digest = keccak256(b"test message");
        let sig = sign_digest(digest, &secret_key).unwrap();
        assert!(sig[64] == 27 || sig[64] == 28);
        assert_eq!(sig.len(), 65);
    }

    #[test]
    fn order_struct_hash_is_deterministic() {
        let order = OrderTypedData {
            salt: U256::from(1u64),
            maker: Address::ZERO,
            signer: Address::ZERO,
            taker: Address::ZERO,
            token_id: U256::from(42u64),
            maker_amount: U256::from(1_000_000u64),
            taker_amount: U256::from(2_000_000u64),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            fee_rate_bps: U256::ZERO,
            side: 0,
            signature_type: 0,
        };
        assert_eq!(order.struct_hash(), order.struct_hash());
    }
}
