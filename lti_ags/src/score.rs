//! Score payloads and score submission
//!
//! Scores are posted to the `scores` sub-resource of a lineitem. Platforms may
//! attach contextual query parameters to lineitem URLs, and those parameters
//! must be carried along on every sub-resource request, so sub-resource URLs
//! are derived by extending the path and leaving the query in place:
//!
//! ```
//! use lti_ags::score;
//! use url::Url;
//!
//! let lineitem = Url::parse("https://lms.example.com/li/42?ctx=1").unwrap();
//!
//! assert_eq!(
//!     score::score_url(&lineitem).as_str(),
//!     "https://lms.example.com/li/42/scores?ctx=1"
//! );
//! ```

use aliri_clock::{Clock, System, TestClock, UnixTime};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    client::{self, ServiceError},
    media_type,
    oauth2::TokenRequestError,
    AgsClient, TokenWithLifetime,
};

const SCORES_SEGMENT: &str = "scores";
const RESULTS_SEGMENT: &str = "results";

/// The learner's progress on the activity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityProgress {
    /// The learner has not started the activity
    Initialized,
    /// The learner has started the activity
    Started,
    /// The learner is working on the activity
    InProgress,
    /// The learner has submitted the activity
    Submitted,
    /// The learner has completed the activity
    Completed,
}

/// The state of the grading process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradingProgress {
    /// Grading is complete and the score is final
    FullyGraded,
    /// Final grading is pending but does not need human intervention
    Pending,
    /// Final grading is pending and requires human intervention
    PendingManual,
    /// Grading could not complete
    Failed,
    /// There is no grading process for this score
    NotReady,
}

/// A grade result to be reported for a learner
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreInput {
    /// The score earned
    pub score_given: f64,
    /// The maximum possible score
    ///
    /// Expected to be greater than zero. Any other value, including `NaN`, is
    /// reported as full credit out of one.
    pub score_maximum: f64,
    /// The learner's progress
    pub activity_progress: ActivityProgress,
    /// The grading status
    pub grading_progress: GradingProgress,
    /// The platform's identifier for the learner
    pub user_id: String,
    /// A comment visible to the learner
    pub comment: Option<String>,
    /// The platform's identifier for the user that scored the activity
    pub scoring_user_id: Option<String>,
}

impl ScoreInput {
    /// A fully graded, completed score for `user_id`
    pub fn new(user_id: impl Into<String>, score_given: f64, score_maximum: f64) -> Self {
        Self {
            score_given,
            score_maximum,
            activity_progress: ActivityProgress::Completed,
            grading_progress: GradingProgress::FullyGraded,
            user_id: user_id.into(),
            comment: None,
            scoring_user_id: None,
        }
    }

    /// Sets the learner's progress
    pub fn with_activity_progress(self, activity_progress: ActivityProgress) -> Self {
        Self {
            activity_progress,
            ..self
        }
    }

    /// Sets the grading status
    pub fn with_grading_progress(self, grading_progress: GradingProgress) -> Self {
        Self {
            grading_progress,
            ..self
        }
    }

    /// Attaches a comment
    pub fn with_comment(self, comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..self
        }
    }

    /// Attaches the identifier of the user that scored the activity
    pub fn with_scoring_user_id(self, scoring_user_id: impl Into<String>) -> Self {
        Self {
            scoring_user_id: Some(scoring_user_id.into()),
            ..self
        }
    }
}

/// A score as sent to the platform
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    /// The score earned
    pub score_given: f64,
    /// The maximum possible score, always greater than zero
    pub score_maximum: f64,
    /// The learner's progress
    pub activity_progress: ActivityProgress,
    /// The grading status
    pub grading_progress: GradingProgress,
    /// When the score was produced, in ISO-8601 format
    pub timestamp: String,
    /// The platform's identifier for the learner
    pub user_id: String,
    /// A comment visible to the learner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// The platform's identifier for the user that scored the activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_user_id: Option<String>,
}

/// A score payload along with the endpoint it is to be posted to
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreSubmission {
    /// The `scores` endpoint of the lineitem
    pub score_url: Url,
    /// The score to be posted
    pub payload: ScorePayload,
}

/// Builds the score payload and score endpoint for a lineitem
///
/// Platforms reject a maximum score of zero. When the maximum is not greater
/// than zero, the score is reported as full credit with both the given and
/// maximum score set to one. A `NaN` maximum is treated the same way. Empty
/// comments and scoring user IDs are omitted.
pub fn build_score_submission(
    lineitem_url: &Url,
    input: ScoreInput,
    timestamp: DateTime<Utc>,
) -> ScoreSubmission {
    let (score_given, score_maximum) = if input.score_maximum > 0.0 {
        (input.score_given, input.score_maximum)
    } else {
        (1.0, 1.0)
    };

    let payload = ScorePayload {
        score_given,
        score_maximum,
        activity_progress: input.activity_progress,
        grading_progress: input.grading_progress,
        timestamp: format_timestamp(timestamp),
        user_id: input.user_id,
        comment: input.comment.filter(|c| !c.is_empty()),
        scoring_user_id: input.scoring_user_id.filter(|u| !u.is_empty()),
    };

    ScoreSubmission {
        score_url: score_url(lineitem_url),
        payload,
    }
}

/// The `scores` endpoint of a lineitem
pub fn score_url(lineitem_url: &Url) -> Url {
    sub_resource_url(lineitem_url, SCORES_SEGMENT)
}

/// The `results` endpoint of a lineitem
pub fn results_url(lineitem_url: &Url) -> Url {
    sub_resource_url(lineitem_url, RESULTS_SEGMENT)
}

/// The lineitem URL for a `scores` endpoint
///
/// URLs that do not end in a `scores` segment are returned unchanged.
pub fn lineitem_url_for_scores(score_url: &Url) -> Url {
    let mut url = score_url.clone();

    let ends_with_scores = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        == Some(SCORES_SEGMENT);

    if ends_with_scores {
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop();
        }
    }

    url
}

fn sub_resource_url(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(segment);
    }
    url
}

/// Formats a timestamp as ISO-8601 with millisecond precision
pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A clock that also stamps scores and lineitems
///
/// Platforms order scores by their timestamp, so the system clock reports
/// milliseconds. Clocks that only count whole seconds can rely on the
/// default, which converts [`Clock::now()`].
pub trait TimestampClock: Clock {
    /// The current time as a UTC timestamp
    fn timestamp(&self) -> DateTime<Utc> {
        timestamp_at(self.now())
    }
}

impl TimestampClock for System {
    fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl TimestampClock for TestClock {}

/// Converts a whole-second clock reading into a UTC timestamp
pub fn timestamp_at(time: UnixTime) -> DateTime<Utc> {
    i64::try_from(time.0)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

/// An error while submitting scores or reading results
#[derive(Debug, Error)]
pub enum ScoreError {
    /// No access token could be obtained
    #[error("unable to obtain an access token")]
    Token(#[from] TokenRequestError),
    /// The platform did not accept the score
    #[error("error submitting score")]
    Submission(#[source] ServiceError),
    /// The results could not be fetched
    #[error("error fetching results")]
    Results(#[source] ServiceError),
}

impl ScoreError {
    /// The HTTP status returned by the platform, if a response was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Token(error) => error.status(),
            Self::Submission(error) | Self::Results(error) => error.status(),
        }
    }
}

impl<C: Clock + Send + Sync> AgsClient<C> {
    /// Posts a score to a lineitem's `scores` endpoint
    ///
    /// Returns the HTTP status of the accepted submission.
    ///
    /// # Errors
    ///
    /// Returns an error if no access token is available or the platform does not
    /// accept the score.
    pub async fn submit_score(
        &self,
        score_url: &Url,
        payload: &ScorePayload,
    ) -> Result<StatusCode, ScoreError> {
        let token = self.ensure_access_token().await?;
        self.submit_score_with(&token, score_url, payload)
            .await
            .map_err(ScoreError::Submission)
    }

    /// Fetches the results recorded for a lineitem as raw JSON
    ///
    /// `params` are passed through as query parameters, for example `user_id` or `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if no access token is available or the results cannot be fetched.
    pub async fn fetch_results<P: Serialize + ?Sized>(
        &self,
        lineitem_url: &Url,
        params: &P,
    ) -> Result<serde_json::Value, ScoreError> {
        let token = self.ensure_access_token().await?;
        let url = results_url(lineitem_url);

        let request = self
            .http()
            .get(url.clone())
            .header(header::ACCEPT, media_type::RESULT_CONTAINER)
            .query(params);

        client::send_authorized_json(&token, request, &url)
            .await
            .map_err(ScoreError::Results)
    }

    #[tracing::instrument(
        skip(self, token, score_url, payload),
        fields(score_url = %score_url, user_id = %payload.user_id),
    )]
    pub(crate) async fn submit_score_with(
        &self,
        token: &TokenWithLifetime,
        score_url: &Url,
        payload: &ScorePayload,
    ) -> Result<StatusCode, ServiceError> {
        let request = self
            .http()
            .post(score_url.clone())
            .header(header::CONTENT_TYPE, media_type::SCORE)
            .json(payload);

        let resp = client::send_authorized(token, request, score_url).await?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "score accepted by platform"
        );

        Ok(resp.status())
    }
}
