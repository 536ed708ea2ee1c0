//! OAuth 2.0 wire plumbing: consent URL construction and the two
//! token-endpoint exchanges (authorization code, refresh token).
//!
//! The authorization-code flow carries a PKCE S256 challenge and a CSRF
//! `state` parameter in addition to the confidential-client secret. Every
//! token-endpoint call is bounded by the configured HTTP timeout.

use chrono::{Duration as ChronoDuration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, StandardErrorResponse,
    TokenResponse, TokenUrl,
};

use crate::config::AuthConfig;
use crate::error::{AuthError, RefreshErrorKind};
use crate::model::{Credentials, ScopeSet};
use crate::secret::Secret;

/// Fallback TTL when the token endpoint omits `expires_in`.
const DEFAULT_TTL_SECS: i64 = 3600;

/// A prepared consent request: the URL to send the user to, plus the CSRF
/// state and PKCE verifier needed to validate and complete the flow.
pub(crate) struct ConsentRequest {
    pub url: String,
    pub state: String,
    pub verifier: PkceCodeVerifier,
}

fn build_client(config: &AuthConfig) -> Result<BasicClient, AuthError> {
    // Config is validated at manager construction; a parse failure here
    // still maps to the same fatal configuration error.
    let auth_url = AuthUrl::new(config.auth_url.clone())
        .map_err(|_| AuthError::ConfigMissing { field: "auth_url" })?;
    let token_url = TokenUrl::new(config.token_url.clone())
        .map_err(|_| AuthError::ConfigMissing { field: "token_url" })?;
    let redirect_url = RedirectUrl::new(config.redirect_uri.clone()).map_err(|_| {
        AuthError::ConfigMissing {
            field: "redirect_uri",
        }
    })?;

    Ok(BasicClient::new(
        ClientId::new(config.client_id.clone()),
        Some(ClientSecret::new(config.client_secret.expose().to_string())),
        auth_url,
        Some(token_url),
    )
    .set_redirect_uri(redirect_url))
}

/// Build the consent URL with a fresh PKCE challenge and CSRF state.
pub(crate) fn consent_request(config: &AuthConfig) -> Result<ConsentRequest, AuthError> {
    let client = build_client(config)?;
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut request = client
        .authorize_url(CsrfToken::new_random)
        .set_pkce_challenge(pkce_challenge);
    for scope in config.scopes.iter() {
        request = request.add_scope(Scope::new(scope.to_string()));
    }

    let (url, csrf_state) = request.url();

    Ok(ConsentRequest {
        url: url.to_string(),
        state: csrf_state.secret().to_string(),
        verifier: pkce_verifier,
    })
}

/// Exchange an authorization code for an initial credential record.
///
/// The response must carry a refresh token; an initial grant without one
/// cannot sustain unattended operation and is rejected.
pub(crate) async fn exchange_code(
    config: &AuthConfig,
    code: &str,
    verifier: PkceCodeVerifier,
) -> Result<Credentials, AuthError> {
    let client = build_client(config)?;

    let exchange = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .set_pkce_verifier(verifier)
        .request_async(async_http_client);

    let response = match tokio::time::timeout(config.http_timeout, exchange).await {
        Err(_) => {
            return Err(AuthError::AuthExchangeFailed {
                message: format!(
                    "token endpoint did not respond within {:?}",
                    config.http_timeout
                ),
                code: None,
            });
        }
        Ok(result) => result.map_err(exchange_error)?,
    };

    credentials_from_response(response, None, &config.scopes)
}

/// Exchange a refresh token for a new credential record.
///
/// The previous refresh token is carried forward when the endpoint does
/// not rotate it; the previous scopes are carried forward when the
/// endpoint omits them.
pub(crate) async fn exchange_refresh(
    config: &AuthConfig,
    refresh_token: &Secret,
    prior_scopes: &ScopeSet,
) -> Result<Credentials, AuthError> {
    let client = build_client(config)?;
    let refresh = RefreshToken::new(refresh_token.expose().to_string());

    let exchange = client
        .exchange_refresh_token(&refresh)
        .request_async(async_http_client);

    let response = match tokio::time::timeout(config.http_timeout, exchange).await {
        Err(_) => {
            return Err(AuthError::RefreshFailed {
                kind: RefreshErrorKind::Transient,
                message: format!(
                    "token endpoint did not respond within {:?}",
                    config.http_timeout
                ),
            });
        }
        Ok(result) => result.map_err(refresh_error)?,
    };

    credentials_from_response(response, Some(refresh_token), prior_scopes)
}

fn credentials_from_response(
    response: BasicTokenResponse,
    carried_refresh: Option<&Secret>,
    fallback_scopes: &ScopeSet,
) -> Result<Credentials, AuthError> {
    let access_token = Secret::new(response.access_token().secret().to_string());

    let refresh_token = match response.refresh_token() {
        Some(token) if !token.secret().is_empty() => Secret::new(token.secret().to_string()),
        _ => match carried_refresh {
            Some(previous) => previous.clone(),
            None => {
                return Err(AuthError::AuthExchangeFailed {
                    message: "token response carried no refresh token".to_string(),
                    code: None,
                });
            }
        },
    };

    let ttl = response
        .expires_in()
        .map(|d| {
            ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::seconds(DEFAULT_TTL_SECS))
        })
        .unwrap_or_else(|| ChronoDuration::seconds(DEFAULT_TTL_SECS));
    let expires_at = Utc::now() + ttl;

    let scopes = response
        .scopes()
        .map(|granted| ScopeSet::new(granted.iter().map(|s| s.to_string())))
        .filter(|granted| !granted.is_empty())
        .unwrap_or_else(|| fallback_scopes.clone());

    Ok(Credentials {
        access_token,
        refresh_token,
        expires_at,
        scopes,
    })
}

fn error_code(error: &BasicErrorResponseType) -> String {
    match error {
        BasicErrorResponseType::InvalidClient => "invalid_client".to_string(),
        BasicErrorResponseType::InvalidGrant => "invalid_grant".to_string(),
        BasicErrorResponseType::InvalidRequest => "invalid_request".to_string(),
        BasicErrorResponseType::InvalidScope => "invalid_scope".to_string(),
        BasicErrorResponseType::UnauthorizedClient => "unauthorized_client".to_string(),
        BasicErrorResponseType::UnsupportedGrantType => "unsupported_grant_type".to_string(),
        BasicErrorResponseType::Extension(code) => code.clone(),
    }
}

fn describe(response: &StandardErrorResponse<BasicErrorResponseType>) -> String {
    match response.error_description() {
        Some(description) => format!("{}: {}", error_code(response.error()), description),
        None => error_code(response.error()),
    }
}

fn exchange_error<RE>(
    err: RequestTokenError<RE, StandardErrorResponse<BasicErrorResponseType>>,
) -> AuthError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => AuthError::AuthExchangeFailed {
            message: format!("token endpoint rejected the code: {}", describe(&response)),
            code: Some(error_code(response.error())),
        },
        RequestTokenError::Request(e) => AuthError::AuthExchangeFailed {
            message: format!("code exchange transport error: {}", e),
            code: None,
        },
        other => AuthError::AuthExchangeFailed {
            message: format!("code exchange failed: {}", other),
            code: None,
        },
    }
}

/// Classify a refresh failure.
///
/// A structured error response with an RFC 6749 error code is a 400/401-class
/// rejection of the grant itself: revocation, not retryable. Extension codes
/// (e.g. `temporarily_unavailable`), transport errors, and unparseable
/// responses are transient.
fn refresh_error<RE>(
    err: RequestTokenError<RE, StandardErrorResponse<BasicErrorResponseType>>,
) -> AuthError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => match response.error() {
            BasicErrorResponseType::Extension(_) => AuthError::RefreshFailed {
                kind: RefreshErrorKind::Transient,
                message: format!("token endpoint returned {}", describe(&response)),
            },
            _ => AuthError::RefreshFailed {
                kind: RefreshErrorKind::Revoked,
                message: format!(
                    "token endpoint rejected the refresh token: {}",
                    describe(&response)
                ),
            },
        },
        RequestTokenError::Request(e) => AuthError::RefreshFailed {
            kind: RefreshErrorKind::Transient,
            message: format!("refresh transport error: {}", e),
        },
        other => AuthError::RefreshFailed {
            kind: RefreshErrorKind::Transient,
            message: format!("token refresh failed: {}", other),
        },
    }
}
