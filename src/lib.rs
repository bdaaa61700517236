//! An [x402](https://www.x402.org) facilitator for EVM chains.
//!
//! Resource servers forward a payer's signed authorization here; the facilitator checks it
//! ([`facilitator::Facilitator::verify`]) and, on request, submits it on-chain from its own
//! account ([`facilitator::Facilitator::settle`]). Three authorization kinds are understood:
//!
//! - `exact`: an EIP-3009 `transferWithAuthorization`.
//! - permit: an EIP-2612 `permit`, followed by `transferFrom` to the payee.
//! - cross-chain: a LayerZero OFT send authorized by the payer and executed by the facilitator,
//!   guarded against slippage by the token's markup.
//!
//! Settlement does not wait for inclusion. [`tracker::SettlementTracker`] polls for receipts
//! and `GET /receipt` reports what it found.
//!
//! # Modules
//!
//! - [`digest`] builds the EIP-712 digests and [`signature`] recovers their signers.
//! - [`scheme`] decodes payloads per scheme kind and binds them to the requirements.
//! - [`facilitator_local`] is the validator and settler; [`handlers`] exposes it over HTTP.
//! - [`chain`] talks to the EVM networks listed in [`config`].
//! - [`client`] signs authorizations on the payer side.

pub mod chain;
pub mod client;
pub mod config;
pub mod digest;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod networks;
pub mod proto;
pub mod scheme;
pub mod signature;
pub mod timestamp;
pub mod tracker;
pub mod util;
