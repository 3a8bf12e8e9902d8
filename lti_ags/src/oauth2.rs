//! Access tokens obtained from the platform's OAuth2 authority
//!
//! The [`TokenManager`] holds at most one token per client. A cached token is
//! handed out until its validity window passes, after which the next caller
//! signs a new client assertion and exchanges it for a new token. Concurrent
//! callers that observe a stale token may each request a replacement; the last
//! token received wins.

use std::{fmt, sync::Arc};

use aliri_clock::{Clock, DurationSecs, System};
use arc_swap::ArcSwapOption;
use reqwest::{header::InvalidHeaderValue, StatusCode};
use thiserror::Error;
use url::Url;

use crate::{
    assertion::{AssertionError, ClientAssertionBuilder},
    ClientCredentialsConfig, ClientId, TokenLifetimeConfig, TokenWithLifetime,
};

pub mod dto;

/// The scopes requested for every token: lineitem management and score submission
pub const AGS_SCOPES: &str = "https://purl.imsglobal.org/spec/lti-ags/scope/lineitem https://purl.imsglobal.org/spec/lti-ags/scope/score";

/// An error while attempting to request a new token from the authority
///
/// A token request that fails with this error leaves the client without a usable
/// token. No further service call can succeed until a later request succeeds.
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// A client assertion could not be produced
    #[error("unable to prepare client assertion")]
    Assertion(#[from] AssertionError),
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(reqwest::Error),
    /// The authority issued a token that cannot be sent in an `Authorization` header
    #[error("authority issued an unusable token")]
    InvalidToken(#[from] InvalidHeaderValue),
}

impl TokenRequestError {
    /// The HTTP status returned by the authority, if one was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ErrorWithBody { source, .. } => source.status(),
            Self::RequestSend(source) | Self::BodyReadError(source) => source.status(),
            _ => None,
        }
    }
}

/// Obtains and caches access tokens for a single tool registration
pub struct TokenManager<C = System> {
    client: reqwest::Client,
    token_url: Url,
    client_id: ClientId,
    assertion: ClientAssertionBuilder,
    lifetime_config: TokenLifetimeConfig<C>,
    cached: ArcSwapOption<TokenWithLifetime>,
}

impl TokenManager<System> {
    /// Constructs a new token manager
    ///
    /// # Errors
    ///
    /// Returns an error if the configured private key cannot be used to sign assertions.
    pub fn new(
        client: reqwest::Client,
        config: &ClientCredentialsConfig,
    ) -> Result<Self, AssertionError> {
        Ok(Self {
            client,
            token_url: config.auth_server_url.clone(),
            client_id: config.client_id.clone(),
            assertion: ClientAssertionBuilder::from_config(config)?,
            lifetime_config: TokenLifetimeConfig::default(),
            cached: ArcSwapOption::empty(),
        })
    }
}

impl<C> TokenManager<C> {
    /// Replaces the lifetime configuration, including the clock
    pub fn with_lifetime_config<D>(self, lifetime_config: TokenLifetimeConfig<D>) -> TokenManager<D> {
        TokenManager {
            client: self.client,
            token_url: self.token_url,
            client_id: self.client_id,
            assertion: self.assertion,
            lifetime_config,
            cached: self.cached,
        }
    }

    /// The lifetime configuration in use
    pub fn lifetime_config(&self) -> &TokenLifetimeConfig<C> {
        &self.lifetime_config
    }

    /// The authority's token endpoint
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The currently cached token, if any, regardless of freshness
    pub fn cached_token(&self) -> Option<Arc<TokenWithLifetime>> {
        self.cached.load_full()
    }
}

impl<C: Clock + Send + Sync> TokenManager<C> {
    /// Returns a fresh access token, requesting a new one only when required
    ///
    /// # Errors
    ///
    /// Returns an error if no fresh token is cached and a new token cannot be obtained.
    pub async fn ensure_access_token(&self) -> Result<Arc<TokenWithLifetime>, TokenRequestError> {
        let now = self.lifetime_config.now();

        if let Some(token) = self.cached.load_full() {
            if token.is_fresh_at(now) {
                tracing::trace!(
                    token.issued = token.issued().0,
                    token.until_stale = token.until_stale_at(now).0,
                    "reusing cached access token"
                );
                return Ok(token);
            }

            tracing::debug!(
                token.issued = token.issued().0,
                token.stale = token.stale().0,
                "cached access token is stale"
            );
        }

        self.refresh().await
    }

    /// Unconditionally requests a new token and replaces the cached token with it
    ///
    /// On failure the cached token is left as it was.
    ///
    /// # Errors
    ///
    /// Returns an error if a new token cannot be obtained.
    pub async fn refresh(&self) -> Result<Arc<TokenWithLifetime>, TokenRequestError> {
        let token = request_token(
            &self.client,
            &self.token_url,
            &self.client_id,
            &self.assertion,
            &self.lifetime_config,
        )
        .await
        .map(Arc::new)?;

        self.cached.store(Some(Arc::clone(&token)));

        Ok(token)
    }
}

impl<C> fmt::Debug for TokenManager<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("assertion", &self.assertion)
            .field("lifetime_config", &self.lifetime_config)
            .field("cached", &self.cached.load().as_deref())
            .finish()
    }
}

fn maybe_value<'a, T: tracing::Value + 'a>(v: &'a Option<T>) -> &'a dyn tracing::Value {
    if let Some(v) = v {
        v
    } else {
        &tracing::field::Empty
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, client_id, assertion, lifetime_config),
    fields(
        token_url = %token_url,
        credentials.grant_type = dto::CLIENT_CREDENTIALS,
        credentials.client_id = %client_id,
    ),
)]
async fn request_token<C: Clock>(
    client: &reqwest::Client,
    token_url: &Url,
    client_id: &ClientId,
    assertion: &ClientAssertionBuilder,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<TokenWithLifetime, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let client_assertion = assertion.sign_at(lifetime_config.now())?;
    let payload = dto::ClientCredentialsRequest::new(&client_assertion, AGS_SCOPES);

    let resp = client
        .post(token_url.clone())
        .form(&payload)
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    let token = lifetime_config.create_token(
        resp.token_type,
        resp.access_token,
        resp.scope.unwrap_or_default(),
        resp.expires_in.map(DurationSecs),
    )?;

    tracing::info!(
        token_type = token.token_type(),
        scope = token.scope(),
        expires_in = maybe_value(&token.expires_in().map(|e| e.0)),
        issued = token.issued().0,
        stale = token.stale().0,
        "received new access token"
    );

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_lineitem_and_score_scopes() {
        let scopes: Vec<_> = AGS_SCOPES.split(' ').collect();

        assert_eq!(
            scopes,
            [
                "https://purl.imsglobal.org/spec/lti-ags/scope/lineitem",
                "https://purl.imsglobal.org/spec/lti-ags/scope/score",
            ]
        );
    }
}
