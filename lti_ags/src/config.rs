//! Client registration details for an LMS deployment

use aliri::{jwk, jwt};
use serde::Deserialize;
use url::Url;

use crate::{ClientId, DeploymentId, PrivateKeyPem};

fn default_key_id() -> jwk::KeyId {
    jwk::KeyId::from_static("1")
}

/// The registration of this tool with a single LMS deployment
///
/// One configuration maps to one [`AgsClient`][crate::AgsClient]. Tools that
/// serve several platforms construct one client per configuration so that
/// cached tokens never cross deployments.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCredentialsConfig {
    /// The platform issuer
    pub issuer: jwt::Issuer,

    /// The client ID registered for the tool
    pub client_id: ClientId,

    /// The deployment ID of the tool
    pub deployment_id: DeploymentId,

    /// The platform's OAuth2 token endpoint
    pub auth_server_url: Url,

    /// The ID of the key used to sign client assertions
    #[serde(default = "default_key_id")]
    pub key_id: jwk::KeyId,

    /// The RSA private key used to sign client assertions
    pub private_key: PrivateKeyPem,
}

impl ClientCredentialsConfig {
    /// Constructs a new configuration using the default key ID of `1`
    pub fn new(
        issuer: impl Into<jwt::Issuer>,
        client_id: impl Into<ClientId>,
        deployment_id: impl Into<DeploymentId>,
        auth_server_url: Url,
        private_key: impl Into<PrivateKeyPem>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            deployment_id: deployment_id.into(),
            auth_server_url,
            key_id: default_key_id(),
            private_key: private_key.into(),
        }
    }

    /// Sets the ID of the key used to sign client assertions
    pub fn with_key_id(self, key_id: impl Into<jwk::KeyId>) -> Self {
        Self {
            key_id: key_id.into(),
            ..self
        }
    }
}
