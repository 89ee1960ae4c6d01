//! Order construction (§4.E "Order construction").

use crate::model::Side;
use alloy_primitives::{Address, U256};
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Eoa = 0,
    PolyProxy = 1,
    GnosisSafe = 2,
}

#[derive(Debug, Clone)]
pub struct OrderConstructionInput {
    pub token_id: U256,
    pub side: Side,
    pub price: rust_decimal::Decimal,
    pub size: rust_decimal::Decimal,
    pub maker: Address,
    pub signer: Address,
    pub signature_type: SignatureType,
    /// Unix seconds; `None` means "never" (expiration = 0).
    pub expiration: Option<i64>,
}

/// USDC has 6 decimals.
const USDC_DECIMALS: u32 = 6;

#[derive(Debug, Clone)]
pub struct ConstructedOrder {
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
    pub side: Side,
    pub signature_type: SignatureType,
}

/// BUY: `maker_amount = round(price*size*10^6)` (USDC out), `taker_amount
/// = round(size*10^6)` (tokens in). SELL swaps the roles. `salt` is a
/// 128-bit uniform random value; `taker = 0x0`; `nonce = 0`;
/// `fee_rate_bps = 0` by default (§4.E).
pub fn build_order(input: OrderConstructionInput) -> ConstructedOrder {
    let scale = rust_decimal::Decimal::from(10u64.pow(USDC_DECIMALS));
    let notional = (input.price * input.size * scale).round();
    let token_amount = (input.size * scale).round();

    let (maker_amount, taker_amount) = match input.side {
        Side::Buy => (decimal_to_u256(notional), decimal_to_u256(token_amount)),
        Side::Sell => (decimal_to_u256(token_amount), decimal_to_u256(notional)),
    };

    ConstructedOrder {
        salt: random_u128_salt(),
        maker: input.maker,
        signer: input.signer,
        taker: Address::ZERO,
        token_id: input.token_id,
        maker_amount,
        taker_amount,
        expiration: U256::from(input.expiration.unwrap_or(0).max(0) as u64),
        nonce: U256::ZERO,
        fee_rate_bps: U256::ZERO,
        side: input.side,
        signature_type: input.signature_type,
    }
}

fn random_u128_salt() -> U256 {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    U256::from_be_bytes::<32>({
        let mut padded = [0u8; 32];
        padded[16..].copy_from_slice(&buf);
        padded
    })
}

fn decimal_to_u256(d: rust_decimal::Decimal) -> U256 {
    let as_u128: u128 = d.try_into().unwrap_or(0);
    U256::from(as_u128)
}

/// Wire representation of a constructed order (§6): all integer fields as
/// base-10 decimal strings, `side` as `"BUY"`/`"SELL"`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderPayload {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(rename = "makerAmount")]
    pub maker_amount: String,
    #[serde(rename = "takerAmount")]
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    #[serde(rename = "feeRateBps")]
    pub fee_rate_bps: String,
    pub side: String,
    #[serde(rename = "signatureType")]
    pub signature_type: u8,
}

impl From<&ConstructedOrder> for OrderPayload {
    fn from(o: &ConstructedOrder) -> Self {
        Self {
            salt: o.salt.to_string(),
            maker: format!("{:#x}", o.maker),
            signer: format!("{:#x}", o.signer),
            taker: format!("{:#x}", o.taker),
            token_id: o.token_id.to_string(),
            maker_amount: o.maker_amount.to_string(),
            taker_amount: o.taker_amount.to_string(),
            expiration: o.expiration.to_string(),
            nonce: o.nonce.to_string(),
            fee_rate_bps: o.fee_rate_bps.to_string(),
            side: match o.side {
                Side::Buy => "BUY".to_string(),
                Side::Sell => "SELL".to_string(),
            },
            signature_type: o.signature_type as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_amounts_use_notional_as_maker_amount() {
        let order = build_order(OrderConstructionInput {
            token_id: U256::from(7u64),
            side: Side::Buy,
            price: dec!(0.50),
            size: dec!(100),
            maker: Address::ZERO,
            signer: Address::ZERO,
            signature_type: SignatureType::Eoa,
            expiration: None,
        });
        assert_eq!(order.maker_amount, U256::from(50_000_000u64));
        assert_eq!(order.taker_amount, U256::from(100_000_000u64));
        assert_eq!(order.taker, Address::ZERO);
        assert_eq!(order.nonce, U256::ZERO);
    }

    #[test]
    fn sell_swaps_amount_roles() {
        let order = build_order(OrderConstructionInput {
            token_id: U256::from(7u64),
            side: Side::Sell,
            price: dec!(0.50),
            size: dec!(100),
            maker: Address::ZERO,
            signer: Address::ZERO,
            signature_type: SignatureType::Eoa,
            expiration: None,
        });
        assert_eq!(order.maker_amount, U256::from(100_000_000u64));
        assert_eq!(order.taker_amount, U256::from(50_000_000u64));
    }

    #[test]
    fn payload_side_is_uppercase_string() {
        let order = build_order(OrderConstructionInput {
            token_id: U256::from(1u64),
            side: Side::Buy,
            price: dec!(0.3),
            size: dec!(10),
            maker: Address::ZERO,
            signer: Address::ZERO,
            signature_type: SignatureType::PolyProxy,
            expiration: Some(1_800_000_000),
        });
        let payload = OrderPayload::from(&order);
        assert_eq!(payload.side, "BUY");
        assert_eq!(payload.signature_type, 1);
    }
}
