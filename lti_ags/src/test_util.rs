use url::Url;

use crate::ClientCredentialsConfig;

pub const ISSUER: &str = "https://lms.example.com";
pub const CLIENT_ID: &str = "tool-client";
pub const DEPLOYMENT_ID: &str = "deployment-1";
pub const KEY_ID: &str = "tool-key-1";

#[path = "../tests/common/key.rs"]
mod key;

use key::private_key_pem;

pub fn config(auth_server_url: Url) -> ClientCredentialsConfig {
    ClientCredentialsConfig::new(
        ISSUER,
        CLIENT_ID,
        DEPLOYMENT_ID,
        auth_server_url,
        private_key_pem(),
    )
    .with_key_id(KEY_ID)
}
