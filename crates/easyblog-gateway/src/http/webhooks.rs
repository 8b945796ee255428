//! Deploy webhook — POST /deploy_api/.
//!
//! GitHub calls this on every repository event. Requests pass a fixed chain
//! of gates: secret configured, caller IP inside GitHub's hook ranges,
//! `X-Hub-Signature-256` valid. A pushed tag then starts a detached redeploy
//! of the tagged commit; the response never waits for it.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const NOT_CONFIGURED: &str = "Problem on server side!";
pub const BAD_IP: &str = "Bad IP address! Permission denied.";
pub const BAD_SIGNATURE: &str = "Bad signature! Permission denied.";
pub const UNSUPPORTED_ALGORITHM: &str = "Operation not supported!";
pub const INCORRECT_SIGNATURE: &str = "Incorrect signature! Permission denied.";
pub const PONG: &str = "pong";
pub const REDEPLOY_CALLED: &str = "redeploy called";
pub const NOT_A_TAG: &str = "Noticed, but it is not new tag to redeploy code.";
pub const INVALID_PAYLOAD: &str = "Invalid push payload.";
pub const REDEPLOY_FAILED: &str = "Redeploy could not be started.";

const TAG_PREFIX: &str = "refs/tags/";

/// Fields of a `push` event this endpoint cares about.
#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    /// Commit the ref points to after the push.
    after: String,
}

#[derive(Debug, PartialEq, Eq)]
enum SignatureError {
    Missing,
    Malformed,
    Unsupported(String),
    Mismatch,
}

pub async fn deploy_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let Some(secret) = state.secret.as_deref() else {
        error!("deploy webhook called but no webhook secret is configured");
        return (StatusCode::NOT_IMPLEMENTED, NOT_CONFIGURED);
    };

    let Some(client_ip) = forwarded_ip(&headers) else {
        warn!("deploy webhook without a usable X-Forwarded-For");
        return (StatusCode::FORBIDDEN, BAD_IP);
    };
    match state.allow_list.contains(client_ip).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(ip = %client_ip, "deploy webhook from outside the allowed ranges");
            return (StatusCode::FORBIDDEN, BAD_IP);
        }
        Err(e) => {
            warn!(ip = %client_ip, error = %e, "allow-list unavailable, rejecting webhook");
            return (StatusCode::FORBIDDEN, BAD_IP);
        }
    }

    match verify_signature(&headers, &body, secret) {
        Ok(()) => {}
        Err(SignatureError::Unsupported(algo)) => {
            warn!(ip = %client_ip, %algo, "unsupported signature algorithm");
            return (StatusCode::NOT_IMPLEMENTED, UNSUPPORTED_ALGORITHM);
        }
        Err(SignatureError::Mismatch) => {
            warn!(ip = %client_ip, "webhook signature mismatch");
            return (StatusCode::FORBIDDEN, INCORRECT_SIGNATURE);
        }
        Err(e) => {
            warn!(ip = %client_ip, reason = ?e, "webhook signature missing or malformed");
            return (StatusCode::FORBIDDEN, BAD_SIGNATURE);
        }
    }

    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("ping");
    info!(ip = %client_ip, %event, bytes = body.len(), "deploy webhook accepted");

    match event {
        "ping" => (StatusCode::OK, PONG),
        "push" => handle_push(&state, &body),
        _ => (StatusCode::NO_CONTENT, ""),
    }
}

fn handle_push(state: &AppState, body: &[u8]) -> (StatusCode, &'static str) {
    let push: PushEvent = match serde_json::from_slice(body) {
        Ok(push) => push,
        Err(e) => {
            warn!(error = %e, "push event body is not a valid payload");
            return (StatusCode::BAD_REQUEST, INVALID_PAYLOAD);
        }
    };

    if !push.git_ref.starts_with(TAG_PREFIX) {
        info!(git_ref = %push.git_ref, "push is not a tag, nothing to redeploy");
        return (StatusCode::OK, NOT_A_TAG);
    }

    if let Err(e) = easyblog_deploy::validate_reference(&push.after) {
        warn!(error = %e, "tag push with unusable commit reference");
        return (StatusCode::BAD_REQUEST, INVALID_PAYLOAD);
    }

    match state.trigger.trigger(&push.after) {
        Ok(()) => {
            info!(tag = %push.git_ref, commit = %push.after, "redeploy triggered");
            (StatusCode::OK, REDEPLOY_CALLED)
        }
        Err(e) => {
            error!(tag = %push.git_ref, commit = %push.after, error = %e, "failed to start redeploy");
            (StatusCode::INTERNAL_SERVER_ERROR, REDEPLOY_FAILED)
        }
    }
}

/// First address in `X-Forwarded-For` (the original client).
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Verify `X-Hub-Signature-256: sha256=<hex>` over the raw body.
fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), SignatureError> {
    let header = headers
        .get("x-hub-signature-256")
        .ok_or(SignatureError::Missing)?
        .to_str()
        .map_err(|_| SignatureError::Malformed)?;

    let (algo, sig_hex) = header.split_once('=').ok_or(SignatureError::Malformed)?;
    if algo != "sha256" {
        return Err(SignatureError::Unsupported(algo.to_string()));
    }

    let provided = hex::decode(sig_hex).map_err(|_| SignatureError::Mismatch)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    // Constant-time comparison.
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}
