#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use aliri_clock::{Clock, UnixTime};
use lti_ags::{AgsClient, ClientCredentialsConfig, TimestampClock};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const TOKEN_PATH: &str = "/login/oauth2/token";
pub const ACCESS_TOKEN: &str = "test-access-token";
pub const BEARER: &str = "Bearer test-access-token";
pub const START: u64 = 1_700_000_000;

mod key;

pub use key::private_key_pem;

/// A clock shared between a test and the client under test
#[derive(Clone, Debug)]
pub struct SharedClock(Arc<AtomicU64>);

impl SharedClock {
    pub fn new(time: u64) -> Self {
        Self(Arc::new(AtomicU64::new(time)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for SharedClock {
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::SeqCst))
    }
}

impl TimestampClock for SharedClock {}

pub fn url(server: &MockServer, path: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), path)).expect("valid mock server URL")
}

pub fn config(server: &MockServer) -> ClientCredentialsConfig {
    ClientCredentialsConfig::new(
        "https://lms.example.com",
        "tool-client",
        "deployment-1",
        url(server, TOKEN_PATH),
        private_key_pem(),
    )
    .with_key_id("tool-key-1")
}

pub fn client(server: &MockServer, clock: &SharedClock) -> AgsClient<SharedClock> {
    AgsClient::new(&config(server))
        .expect("test key is accepted")
        .with_clock(clock.clone())
}

pub fn token_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": ACCESS_TOKEN,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "https://purl.imsglobal.org/spec/lti-ags/scope/lineitem https://purl.imsglobal.org/spec/lti-ags/scope/score",
    }))
}

/// Mounts a token endpoint that must be called exactly `times` times
pub async fn mount_token_endpoint(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response())
        .expect(times)
        .mount(server)
        .await;
}
