//! `GET /session/sso_provider` and its challenge completion callback.

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::{
        header::{CACHE_CONTROL, COOKIE, LOCATION},
        HeaderMap, HeaderValue, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, instrument, warn, Instrument};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    provider::{
        action::{ActionError, ActionResponse, DiscourseConnectAction},
        directory::hash_session_token,
        identity::SessionGuardian,
        state::{ProviderState, SSO_PROVIDER_PATH},
    },
    sso::{SessionContext, SsoError},
};

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct SsoProviderQuery {
    /// Base64 payload from the trusted site.
    sso: Option<String>,
    /// Hex HMAC-SHA256 of `sso`.
    sig: Option<String>,
}

#[derive(IntoParams, Debug, Deserialize)]
#[into_params(parameter_in = Query)]
pub struct CompleteQuery {
    /// Challenge id issued with the second-factor redirect.
    challenge: Uuid,
}

/// Session state for the current request.
struct LoadedSession {
    guardian: SessionGuardian,
    context: SessionContext,
    token_hash: Option<Vec<u8>>,
}

#[utoipa::path(
    get,
    path= "/session/sso_provider",
    params(SsoProviderQuery),
    responses (
        (status = 302, description = "Redirect to the trusted site, login, or the second factor challenge"),
        (status = 400, description = "Invalid SSO request", body = String),
        (status = 403, description = "A second factor is required but none is enrolled", body = String),
        (status = 404, description = "SSO not available for this site", body = String),
    ),
    tag= "sso"
)]
#[instrument(skip_all)]
pub async fn sso_provider(
    uri: Uri,
    headers: HeaderMap,
    state: Extension<Arc<ProviderState>>,
    query: Result<Query<SsoProviderQuery>, QueryRejection>,
) -> Response {
    if !state.provider().enabled() {
        return sso_error(&SsoError::ProviderDisabled);
    }

    let (wire, signature) = match query {
        Ok(Query(SsoProviderQuery {
            sso: Some(sso),
            sig: Some(sig),
        })) => (sso, sig),
        Ok(_) => return sso_error(&SsoError::MalformedPayload),
        Err(rejection) => {
            warn!("Rejected sso_provider query: {}", rejection);
            return sso_error(&SsoError::MalformedPayload);
        }
    };

    let session = match load_session(&state, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let return_path = uri
        .path_and_query()
        .map_or(SSO_PROVIDER_PATH, |path_and_query| path_and_query.as_str());

    let action = DiscourseConnectAction::new(
        &state,
        &session.guardian,
        session.context,
        session.token_hash,
    );
    action_response(action.handle(&wire, &signature, return_path).await)
}

#[utoipa::path(
    get,
    path= "/session/sso_provider/complete",
    params(CompleteQuery),
    responses (
        (status = 302, description = "Redirect to the trusted site, or back to the challenge"),
        (status = 400, description = "Unknown or expired challenge", body = String),
        (status = 404, description = "SSO not available for this site", body = String),
    ),
    tag= "sso"
)]
#[instrument(skip_all)]
pub async fn sso_provider_complete(
    headers: HeaderMap,
    state: Extension<Arc<ProviderState>>,
    query: Result<Query<CompleteQuery>, QueryRejection>,
) -> Response {
    if !state.provider().enabled() {
        return sso_error(&SsoError::ProviderDisabled);
    }

    let challenge_id = match query {
        Ok(Query(query)) => query.challenge,
        Err(rejection) => {
            warn!("Rejected sso_provider completion query: {}", rejection);
            return sso_error(&SsoError::InvalidHandshake("missing challenge"));
        }
    };

    let session = match load_session(&state, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let action = DiscourseConnectAction::new(
        &state,
        &session.guardian,
        session.context,
        session.token_hash,
    );
    action_response(action.complete(challenge_id).await)
}

async fn load_session(
    state: &ProviderState,
    headers: &HeaderMap,
) -> Result<LoadedSession, Response> {
    let Some(token) = extract_session_token(headers, state.config().session_cookie_name()) else {
        return Ok(LoadedSession {
            guardian: SessionGuardian::anonymous(),
            context: SessionContext::default(),
            token_hash: None,
        });
    };

    let token_hash = hash_session_token(&token);
    let span = tracing::info_span!("session.lookup");
    match state
        .directory()
        .lookup(&token_hash)
        .instrument(span)
        .await
    {
        Ok(Some(snapshot)) => Ok(LoadedSession {
            guardian: SessionGuardian::new(Some(snapshot.identity)),
            context: snapshot.context,
            token_hash: Some(token_hash),
        }),
        Ok(None) => Ok(LoadedSession {
            guardian: SessionGuardian::anonymous(),
            context: SessionContext::default(),
            token_hash: None,
        }),
        Err(err) => {
            error!("Failed to lookup session: {:#}", err);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response())
        }
    }
}

fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let value = headers.get(COOKIE)?.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == cookie_name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn action_response(result: Result<ActionResponse, ActionError>) -> Response {
    match result {
        Ok(response) => redirect(&response.location()),
        Err(ActionError::Sso(err)) => sso_error(&err),
        Err(ActionError::Directory(err)) => {
            error!("Session directory failure: {:#}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(location) => (
            StatusCode::FOUND,
            [
                (LOCATION, location),
                (CACHE_CONTROL, HeaderValue::from_static("no-store")),
            ],
        )
            .into_response(),
        Err(err) => {
            error!("Failed to build redirect location: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

fn sso_error(err: &SsoError) -> Response {
    // Detail stays in the log; the client only sees the generic message.
    warn!("DiscourseConnect request rejected: {}", err);
    (err.status(), err.public_message()).into_response()
}
