use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System};
use chrono::{DateTime, Utc};
use reqwest::{header, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::{
    assertion::AssertionError,
    oauth2::{TokenManager, TokenRequestError},
    score::TimestampClock,
    ClientCredentialsConfig, TokenLifetimeConfig, TokenWithLifetime,
};

/// An error from a single request against a platform service endpoint
///
/// The platform gives no signal richer than the HTTP status, so callers that
/// need to tell failures apart should use [`status()`][Self::status()].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unable to send the request to the platform
    #[error("error sending request to {url}")]
    RequestSend {
        /// The URL the request was sent to
        url: Url,
        /// The underlying request error
        source: reqwest::Error,
    },
    /// The platform responded with an error status
    #[error("{url} responded with {status}: {body}")]
    ErrorWithBody {
        /// The URL the request was sent to
        url: Url,
        /// The status returned by the platform
        status: StatusCode,
        /// The body of the error
        body: String,
        /// The underlying request error
        source: reqwest::Error,
    },
    /// Unable to read the response
    #[error("error reading response body from {url}")]
    BodyReadError {
        /// The URL the request was sent to
        url: Url,
        /// The underlying request error
        source: reqwest::Error,
    },
    /// Unable to deserialize the response
    #[error("error deserializing response body from {url}")]
    BodyError {
        /// The URL the request was sent to
        url: Url,
        /// The underlying deserialization error
        source: serde_json::Error,
    },
}

impl ServiceError {
    /// The URL of the failed request
    pub fn url(&self) -> &Url {
        match self {
            Self::RequestSend { url, .. }
            | Self::ErrorWithBody { url, .. }
            | Self::BodyReadError { url, .. }
            | Self::BodyError { url, .. } => url,
        }
    }

    /// The HTTP status returned by the platform, if a response was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ErrorWithBody { status, .. } => Some(*status),
            Self::RequestSend { source, .. } | Self::BodyReadError { source, .. } => {
                source.status()
            }
            Self::BodyError { .. } => None,
        }
    }

    /// Whether the platform reported a conflict with an existing resource
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }
}

/// A client for the Assignment and Grading Services of a single platform deployment
///
/// The client owns the access token cache for its registration. Clones of the
/// underlying [`reqwest::Client`] may be shared freely, but tokens are never
/// shared between `AgsClient` instances.
pub struct AgsClient<C = System> {
    http: reqwest::Client,
    tokens: TokenManager<C>,
}

impl AgsClient<System> {
    /// Constructs a new client using a default HTTP client
    ///
    /// # Errors
    ///
    /// Returns an error if the configured private key cannot be used to sign assertions.
    pub fn new(config: &ClientCredentialsConfig) -> Result<Self, AssertionError> {
        Self::with_http_client(reqwest::Client::default(), config)
    }

    /// Constructs a new client using the provided HTTP client
    ///
    /// # Errors
    ///
    /// Returns an error if the configured private key cannot be used to sign assertions.
    pub fn with_http_client(
        http: reqwest::Client,
        config: &ClientCredentialsConfig,
    ) -> Result<Self, AssertionError> {
        let tokens = TokenManager::new(http.clone(), config)?;

        tracing::debug!(
            issuer = %config.issuer,
            client_id = %config.client_id,
            deployment_id = %config.deployment_id,
            token_url = %config.auth_server_url,
            "configured assignment and grading services client"
        );

        Ok(Self { http, tokens })
    }
}

impl<C> AgsClient<C> {
    /// Replaces the token lifetime configuration, including the clock
    pub fn with_lifetime_config<D>(self, lifetime_config: TokenLifetimeConfig<D>) -> AgsClient<D> {
        AgsClient {
            http: self.http,
            tokens: self.tokens.with_lifetime_config(lifetime_config),
        }
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> AgsClient<D> {
        let lifetime_config =
            TokenLifetimeConfig::new(self.tokens.lifetime_config().validity_window())
                .with_clock(clock);
        self.with_lifetime_config(lifetime_config)
    }

    /// The token manager backing this client
    pub fn token_manager(&self) -> &TokenManager<C> {
        &self.tokens
    }

    /// The currently cached token, if any, without checking freshness
    pub fn cached_token(&self) -> Option<Arc<TokenWithLifetime>> {
        self.tokens.cached_token()
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

impl<C: Clock + Send + Sync> AgsClient<C> {
    /// Returns a fresh access token, requesting a new one only when required
    ///
    /// # Errors
    ///
    /// Returns an error if no fresh token is cached and a new token cannot be obtained.
    pub async fn ensure_access_token(&self) -> Result<Arc<TokenWithLifetime>, TokenRequestError> {
        self.tokens.ensure_access_token().await
    }
}

impl<C: TimestampClock> AgsClient<C> {
    pub(crate) fn timestamp(&self) -> DateTime<Utc> {
        self.tokens.lifetime_config().clock().timestamp()
    }
}

impl<C> fmt::Debug for AgsClient<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AgsClient")
            .field("tokens", &self.tokens)
            .finish()
    }
}

/// Sends an authorized request and fails on any non-success status
pub(crate) async fn send_authorized(
    token: &TokenWithLifetime,
    request: RequestBuilder,
    url: &Url,
) -> Result<Response, ServiceError> {
    let resp = request
        .header(header::AUTHORIZATION, token.authorization().clone())
        .send()
        .await
        .map_err(|source| ServiceError::RequestSend {
            url: url.clone(),
            source,
        })?;

    tracing::debug!(
        url = %url,
        response.status = resp.status().as_u16(),
        "received response from platform"
    );

    if let Err(source) = resp.error_for_status_ref() {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|source| ServiceError::BodyReadError {
                url: url.clone(),
                source,
            })?;
        return Err(ServiceError::ErrorWithBody {
            url: url.clone(),
            status,
            body,
            source,
        });
    }

    Ok(resp)
}

/// Sends an authorized request and deserializes a JSON response body
pub(crate) async fn send_authorized_json<T: DeserializeOwned>(
    token: &TokenWithLifetime,
    request: RequestBuilder,
    url: &Url,
) -> Result<T, ServiceError> {
    let resp = send_authorized(token, request, url).await?;

    let body = resp
        .bytes()
        .await
        .map_err(|source| ServiceError::BodyReadError {
            url: url.clone(),
            source,
        })?;

    serde_json::from_slice(&body).map_err(|source| ServiceError::BodyError {
        url: url.clone(),
        source,
    })
}
