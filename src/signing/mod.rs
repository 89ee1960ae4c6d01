//! Component E — signed-order builder.
//!
//! Two independent signing paths (§4.E): EIP-712 typed-data signing for
//! L1 wallet auth and order submission, and HMAC request signing for L2
//! API-key auth. Neither path existed in the source system's own
//! `vault/execution.rs`, which only has the HMAC half — `hmac_auth`
//! below is a direct port of `sign_request`/`auth_headers` from there;
//! `eip712` is new, grounded on the `alloy`+`eip712` pairing used
//! elsewhere in the pack.

pub mod eip712;
pub mod hmac_auth;
pub mod order_builder;

pub use eip712::{Eip712Domain, OrderTypedData};
pub use hmac_auth::{auth_headers_l2, sign_request};
pub use order_builder::{build_order, OrderConstructionInput, SignatureType};
