//! HTTP endpoints of the facilitator.
//!
//! `/verify` and `/settle` accept a payment envelope. A rejected payment is still a `200`
//! carrying the reason, so resource servers can relay it to the payer; only a body that is
//! not an envelope at all is a `400`. The query endpoints follow REST conventions: `400` for
//! missing or malformed parameters, `404` for an unknown scheme or network, `500` when the
//! chain lookup fails.

use alloy_primitives::TxHash;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::str::FromStr;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::facilitator_local::FacilitatorLocalError;
use crate::proto::{
    ErrorResponse, MarkupQuery, PaymentVerificationError, PermitNonceQuery, ReceiptQuery,
    SettleRequest, SettleResponse, VerifyRequest, VerifyResponse,
};

pub fn routes<A>() -> Router<A>
where
    A: Facilitator<Error = FacilitatorLocalError> + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info).post(post_verify::<A>))
        .route("/settle", get(get_settle_info).post(post_settle::<A>))
        .route("/supported", get(get_supported::<A>))
        .route("/receipt", get(get_receipt::<A>))
        .route("/permitnonce", get(get_permit_nonce::<A>))
        .route("/markup", get(get_markup::<A>))
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Status of a failed query: unknown scheme/network is `404`, other verification failures
/// (malformed addresses) are `400`, chain failures are `500`.
fn query_error_response(error: FacilitatorLocalError) -> Response {
    let status = match &error {
        FacilitatorLocalError::Verification {
            source: PaymentVerificationError::UnsupportedNetworkOrScheme { .. },
            ..
        } => StatusCode::NOT_FOUND,
        FacilitatorLocalError::Verification { .. } => StatusCode::BAD_REQUEST,
        FacilitatorLocalError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, error.to_string())
}

/// `GET /`: a greeting, handy as a liveness check.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /verify`: describes the body `POST /verify` expects.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "x402Version": 1,
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: describes the body `POST /settle` expects.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "x402Version": 1,
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: configured (scheme, network) pairs.
#[instrument(skip_all)]
pub async fn get_supported<A>(State(facilitator): State<A>) -> Response
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    match facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(supported)).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Listing supported kinds failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// `POST /verify`: checks a payment without submitting it.
#[instrument(skip_all)]
pub async fn post_verify<A>(
    State(facilitator): State<A>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Malformed verify request");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    match facilitator.verify(&body).await {
        Ok(valid_response) => (StatusCode::OK, Json(valid_response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = %error,
                reason = %error.reason(),
                body = %serde_json::to_string(&body).unwrap_or_else(|_| "<can-not-serialize>".to_string()),
                "Verification failed"
            );
            let response = VerifyResponse::invalid(error.payer(), error.reason());
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

/// `POST /settle`: submits a verified payment and starts tracking its transaction.
#[instrument(skip_all)]
pub async fn post_settle<A>(
    State(facilitator): State<A>,
    body: Result<Json<SettleRequest>, JsonRejection>,
) -> Response
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Malformed settle request");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    match facilitator.settle(&body).await {
        Ok(valid_response) => (StatusCode::OK, Json(valid_response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = %error,
                reason = %error.reason(),
                body = %serde_json::to_string(&body).unwrap_or_else(|_| "<can-not-serialize>".to_string()),
                "Settlement failed"
            );
            let response = SettleResponse::Error {
                reason: error.reason(),
                payer: error.payer(),
                network: body.payment_payload.network.clone(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

/// `GET /receipt?network=&tx=`: settlement status of a transaction returned by `/settle`.
#[instrument(skip_all)]
pub async fn get_receipt<A>(State(facilitator): State<A>, Query(query): Query<ReceiptQuery>) -> Response
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    let (Some(network), Some(tx)) = (query.network, query.tx) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required query params: network, tx",
        );
    };
    let Ok(tx) = TxHash::from_str(tx.trim()) else {
        return error_response(StatusCode::BAD_REQUEST, format!("Malformed transaction hash: {tx}"));
    };
    (StatusCode::OK, Json(facilitator.receipt(tx, &network))).into_response()
}

/// `GET /permitnonce?network=&asset=&owner=`: the owner's current EIP-2612 nonce.
#[instrument(skip_all)]
pub async fn get_permit_nonce<A>(
    State(facilitator): State<A>,
    query: Result<Query<PermitNonceQuery>, QueryRejection>,
) -> Response
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match facilitator.permit_nonce(&query).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => query_error_response(error),
    }
}

/// `GET /markup?network=&scheme=[&dstEid=]`: markup charged by this facilitator.
#[instrument(skip_all)]
pub async fn get_markup<A>(
    State(facilitator): State<A>,
    query: Result<Query<MarkupQuery>, QueryRejection>,
) -> Response
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match facilitator.markup(&query).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => query_error_response(error),
    }
}
