//! A client for the LTI Advantage Assignment and Grading Services
//!
//! An external tool uses this library to report grades back to a learning
//! platform. The tool authenticates as itself with the OAuth2 _client
//! credentials_ grant, presenting a short-lived JWT signed with its registered
//! RSA key. The access token obtained this way is reused for an hour and then
//! transparently replaced.
//!
//! The main entry point is [`AgsClient::post_score`], which makes sure a score
//! is recorded even if the platform has not yet created the lineitem the tool
//! was told to use:
//!
//! 1. The score is posted to the grade outcome URL from the launch.
//! 2. If that fails, a lineitem is created for the resource and the score is
//!    posted to it.
//! 3. If creation fails, the lineitem is assumed to exist, is looked up by
//!    resource ID, and the score is posted to it.
//!
//! ```no_run
//! use lti_ags::{AgsClient, ClientCredentialsConfig, StudentAttempt};
//! use url::Url;
//!
//! # async fn run(private_key: String) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientCredentialsConfig::new(
//!     "https://lms.example.com",
//!     "tool-client",
//!     "deployment-1",
//!     Url::parse("https://lms.example.com/login/oauth2/token")?,
//!     private_key,
//! );
//!
//! let client = AgsClient::new(&config)?;
//!
//! let attempt = StudentAttempt {
//!     points_earned: 8.0,
//!     points_available: 10.0,
//!     complete: true,
//!     grade_outcome_url: Url::parse("https://lms.example.com/api/lti/courses/1/line_items/7")?,
//!     resource_id: "quiz-7".to_owned(),
//!     resource_name: "Quiz 7".to_owned(),
//! };
//!
//! let outcome = client.post_score("resource-link-1", &attempt, "learner-42").await?;
//!
//! if let Some(score_url) = outcome.updated_score_url {
//!     tracing::info!(%score_url, "remember this endpoint for the attempt");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Tokens are scoped to a single client. A tool serving several platforms or
//! deployments builds one [`AgsClient`] per [`ClientCredentialsConfig`].
//!
//! # Features
//!
//! * `default-tls`: Uses the platform's native TLS implementation for requests.
//! * `rustls-tls`: Uses `rustls` for requests.
//!
//! One of these should be enabled for platforms served over HTTPS.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod assertion;
mod braids;
mod client;
mod config;
pub mod lineitem;
pub mod media_type;
pub mod oauth2;
pub mod passback;
pub mod score;
mod tokens;

#[cfg(test)]
mod test_util;

pub use braids::*;
pub use client::{AgsClient, ServiceError};
pub use config::ClientCredentialsConfig;
pub use lineitem::{LineItem, LineItemError, LineItemFilter, NewLineItem};
pub use passback::{PassbackError, PassbackOutcome, StudentAttempt};
pub use score::{
    ActivityProgress, GradingProgress, ScoreError, ScoreInput, ScorePayload, TimestampClock,
};
pub use tokens::{
    within_validity_window, TokenLifetimeConfig, TokenWithLifetime, DEFAULT_VALIDITY_WINDOW,
};
