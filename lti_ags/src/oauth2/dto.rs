//! DTOs for interacting with the platform's OAuth2 token endpoint

use aliri::JwtRef;
use serde::{Deserialize, Serialize};

use crate::AccessToken;

/// The grant used by LTI Advantage services
pub const CLIENT_CREDENTIALS: &str = "client_credentials";

/// The assertion type for a signed JWT client assertion
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Client credentials request authenticated with a signed assertion
#[derive(Debug, Serialize)]
pub(super) struct ClientCredentialsRequest<'a> {
    pub grant_type: &'static str,
    pub client_assertion_type: &'static str,
    pub client_assertion: &'a JwtRef,
    pub scope: &'a str,
}

impl<'a> ClientCredentialsRequest<'a> {
    pub fn new(client_assertion: &'a JwtRef, scope: &'a str) -> Self {
        Self {
            grant_type: CLIENT_CREDENTIALS,
            client_assertion_type: JWT_BEARER_ASSERTION_TYPE,
            client_assertion,
            scope,
        }
    }
}

fn default_token_type() -> String {
    String::from("Bearer")
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub access_token: AccessToken,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn response_defaults_missing_optional_fields() -> Result<()> {
        let resp: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#)?;

        assert_eq!(resp.token_type, "Bearer");
        assert_eq!(resp.access_token.as_str(), "abc");
        assert_eq!(resp.expires_in, None);
        assert_eq!(resp.scope, None);

        Ok(())
    }
}
