//! Signed JWT client assertions for the client credentials grant
//!
//! LTI Advantage services do not use a client secret. Instead, the tool
//! authenticates to the platform's token endpoint with a short-lived JWT
//! signed by its registered private key ([RFC7523][]). The platform verifies
//! the signature against the public key registered for the tool.
//!
//! [RFC7523]: https://tools.ietf.org/html/rfc7523

use aliri::{
    jwa, jwk,
    jwt::{self, CoreClaims},
    Jwk, Jwt,
};
use aliri_clock::UnixTime;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ClientCredentialsConfig, ClientId, DeploymentId};

/// How far back the `iat` claim is placed to absorb clock skew with the platform
pub const ISSUED_AT_SKEW_SECS: u64 = 5;

/// How long a client assertion remains valid
pub const ASSERTION_LIFETIME_SECS: u64 = 60;

const JTI_PREFIX: &str = "lti-service-token";
const JTI_RANDOM_LEN: usize = 25;

/// An error while preparing or signing a client assertion
///
/// These errors indicate a configuration problem and are never retried.
#[derive(Debug, Error)]
pub enum AssertionError {
    /// The configured private key could not be used
    #[error("private key rejected")]
    KeyRejected(#[from] aliri::error::KeyRejected),
    /// The assertion could not be signed
    #[error("unable to sign client assertion")]
    Signing(#[from] aliri::error::JwtSigningError),
}

/// The claims carried by a client assertion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    iss: jwt::Issuer,
    sub: jwt::Subject,
    aud: jwt::Audiences,
    iat: UnixTime,
    exp: UnixTime,
    jti: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    deployment_id: DeploymentId,
}

impl AssertionClaims {
    /// The time at which the assertion claims to have been issued
    pub fn iat(&self) -> UnixTime {
        self.iat
    }

    /// The unique identifier of this assertion
    pub fn jti(&self) -> &str {
        &self.jti
    }

    /// The deployment the assertion was issued for
    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }
}

impl CoreClaims for AssertionClaims {
    fn nbf(&self) -> Option<UnixTime> {
        None
    }

    fn exp(&self) -> Option<UnixTime> {
        Some(self.exp)
    }

    fn aud(&self) -> &jwt::Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&jwt::IssuerRef> {
        Some(&self.iss)
    }

    fn sub(&self) -> Option<&jwt::SubjectRef> {
        Some(&self.sub)
    }
}

/// Produces signed client assertions for a single tool registration
#[derive(Debug)]
pub struct ClientAssertionBuilder {
    client_id: ClientId,
    deployment_id: DeploymentId,
    audience: jwt::Audience,
    headers: jwt::BasicHeaders,
    key: Jwk,
}

impl ClientAssertionBuilder {
    /// Prepares an assertion builder from the tool's registration
    ///
    /// # Errors
    ///
    /// Returns an error if the configured private key is not a valid RSA private key.
    pub fn from_config(config: &ClientCredentialsConfig) -> Result<Self, AssertionError> {
        let rsa = jwa::Rsa::private_key_from_pem(config.private_key.as_str())?;
        let key = Jwk::from(rsa)
            .with_algorithm(jwa::Algorithm::RS256)
            .with_key_id(config.key_id.clone());

        Ok(Self {
            client_id: config.client_id.clone(),
            deployment_id: config.deployment_id.clone(),
            audience: jwt::Audience::from(config.auth_server_url.as_str()),
            headers: jwt::BasicHeaders::with_key_id(
                jwa::Algorithm::RS256,
                config.key_id.clone(),
            ),
            key,
        })
    }

    /// The key ID placed in the header of every assertion
    pub fn key_id(&self) -> Option<&jwk::KeyIdRef> {
        self.key.key_id()
    }

    /// Constructs the claims for an assertion issued at `now`
    ///
    /// Both `iss` and `sub` carry the client ID. Every call produces a new `jti`.
    pub fn claims_at(&self, now: UnixTime) -> AssertionClaims {
        AssertionClaims {
            iss: jwt::Issuer::from(self.client_id.as_str()),
            sub: jwt::Subject::from(self.client_id.as_str()),
            aud: jwt::Audiences::single(self.audience.clone()),
            iat: UnixTime(now.0.saturating_sub(ISSUED_AT_SKEW_SECS)),
            exp: UnixTime(now.0 + ASSERTION_LIFETIME_SECS),
            jti: generate_jti(),
            deployment_id: self.deployment_id.clone(),
        }
    }

    /// Signs a fresh assertion issued at `now`
    ///
    /// # Errors
    ///
    /// Returns an error if the assertion cannot be signed with the configured key.
    pub fn sign_at(&self, now: UnixTime) -> Result<Jwt, AssertionError> {
        let claims = self.claims_at(now);
        let assertion = Jwt::try_from_parts_with_signature(&self.headers, &claims, &self.key)?;

        tracing::trace!(
            jti = %claims.jti,
            iat = claims.iat.0,
            exp = claims.exp.0,
            "signed client assertion"
        );

        Ok(assertion)
    }
}

fn generate_jti() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(JTI_RANDOM_LEN)
        .map(char::from)
        .collect();

    format!("{}{}", JTI_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use aliri_clock::{Clock, System};
    use color_eyre::Result;
    use url::Url;

    use super::*;
    use crate::test_util;

    fn builder() -> Result<ClientAssertionBuilder> {
        let config = test_util::config(Url::parse("https://lms.example.com/oauth2/token")?);
        Ok(ClientAssertionBuilder::from_config(&config)?)
    }

    #[test]
    fn claims_follow_the_lti_token_endpoint_profile() -> Result<()> {
        let claims = builder()?.claims_at(UnixTime(1_000));

        assert_eq!(claims.iss.as_str(), test_util::CLIENT_ID);
        assert_eq!(claims.sub.as_str(), test_util::CLIENT_ID);
        assert_eq!(
            claims.aud.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            vec!["https://lms.example.com/oauth2/token"]
        );
        assert_eq!(claims.iat, UnixTime(995));
        assert_eq!(claims.exp, UnixTime(1_060));
        assert_eq!(claims.deployment_id.as_str(), test_util::DEPLOYMENT_ID);
        assert!(claims.jti.starts_with(JTI_PREFIX));

        Ok(())
    }

    #[test]
    fn every_assertion_gets_a_new_jti() -> Result<()> {
        let builder = builder()?;

        let first = builder.claims_at(UnixTime(1_000));
        let second = builder.claims_at(UnixTime(1_000));

        assert_ne!(first.jti, second.jti);
        assert_eq!(first.jti.len(), JTI_PREFIX.len() + JTI_RANDOM_LEN);

        Ok(())
    }

    #[test]
    fn deployment_id_uses_the_lti_claim_name() -> Result<()> {
        let claims = builder()?.claims_at(UnixTime(1_000));

        let value = serde_json::to_value(&claims)?;

        assert_eq!(
            value["https://purl.imsglobal.org/spec/lti/claim/deployment_id"],
            test_util::DEPLOYMENT_ID
        );
        assert_eq!(value["aud"], "https://lms.example.com/oauth2/token");

        Ok(())
    }

    #[test]
    fn signed_assertion_verifies_against_the_tool_key() -> Result<()> {
        let builder = builder()?;
        let token = builder.sign_at(System.now())?;

        let validator = jwt::CoreValidator::default()
            .add_approved_algorithm(jwa::Algorithm::RS256)
            .add_allowed_audience(jwt::Audience::from_static(
                "https://lms.example.com/oauth2/token",
            ))
            .require_issuer(jwt::Issuer::from_static(test_util::CLIENT_ID));

        let verified: jwt::Validated<AssertionClaims, jwt::BasicHeaders> =
            token.verify(&builder.key, &validator)?;

        assert_eq!(verified.claims().sub.as_str(), test_util::CLIENT_ID);
        assert_eq!(
            verified.headers(),
            &jwt::BasicHeaders::with_key_id(jwa::Algorithm::RS256, test_util::KEY_ID)
        );

        Ok(())
    }

    #[test]
    fn malformed_private_key_is_rejected() -> Result<()> {
        let mut config = test_util::config(Url::parse("https://lms.example.com/oauth2/token")?);
        config.private_key = "not a private key".into();

        let result = ClientAssertionBuilder::from_config(&config);

        assert!(matches!(result, Err(AssertionError::KeyRejected(_))));

        Ok(())
    }
}
