//! The operations a facilitator offers over HTTP.
//!
//! [`Facilitator::verify`] and [`Facilitator::settle`] carry the x402 protocol. The rest are
//! helpers a payer or resource server needs around it: the schemes on offer, the permit nonce
//! to sign over, the markup a cross-chain send will pay, and the status of a settlement.

use alloy_primitives::TxHash;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto;

pub trait Facilitator {
    type Error: Debug + Display;

    /// Checks a payment envelope without touching the chain state.
    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send;

    /// Re-verifies the envelope, then submits it. Returns once the transaction is broadcast;
    /// confirmation is reported by [`Facilitator::receipt`].
    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send;

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send;

    fn receipt(&self, tx: TxHash, network: &str) -> proto::ReceiptResponse;

    fn permit_nonce(
        &self,
        query: &proto::PermitNonceQuery,
    ) -> impl Future<Output = Result<proto::PermitNonceResponse, Self::Error>> + Send;

    fn markup(
        &self,
        query: &proto::MarkupQuery,
    ) -> impl Future<Output = Result<proto::MarkupResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }

    fn receipt(&self, tx: TxHash, network: &str) -> proto::ReceiptResponse {
        self.as_ref().receipt(tx, network)
    }

    fn permit_nonce(
        &self,
        query: &proto::PermitNonceQuery,
    ) -> impl Future<Output = Result<proto::PermitNonceResponse, Self::Error>> + Send {
        self.as_ref().permit_nonce(query)
    }

    fn markup(
        &self,
        query: &proto::MarkupQuery,
    ) -> impl Future<Output = Result<proto::MarkupResponse, Self::Error>> + Send {
        self.as_ref().markup(query)
    }
}
