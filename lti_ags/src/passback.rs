//! Grade passback
//!
//! Posting a score succeeds directly when the platform already holds a
//! lineitem at the grade outcome URL. When it does not, the lineitem is created
//! and the score is posted to it. When creation fails, the lineitem is assumed
//! to exist already, so it is looked up by resource ID and the score is posted
//! there instead. Each of these steps runs at most once per call.
//!
//! When the score lands somewhere other than the grade outcome URL, the
//! outcome carries the new `scores` endpoint. Callers should keep it and use it
//! for later passbacks for the same attempt, since calling [`post_score`]
//! again from scratch may create a duplicate lineitem on platforms that do not
//! enforce uniqueness by resource ID.
//!
//! [`post_score`]: crate::AgsClient::post_score

use std::error;

use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

use crate::{
    client::ServiceError,
    lineitem::{self, LineItemError, LineItemFilter, NewLineItem},
    oauth2::TokenRequestError,
    score::{self, ActivityProgress, ScoreInput, TimestampClock},
    AgsClient,
};

/// One learner submission to be graded
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttempt {
    /// The score earned
    pub points_earned: f64,
    /// The maximum possible score
    pub points_available: f64,
    /// Whether the learner has finished the activity
    ///
    /// Accepts a number when deserializing, where any nonzero value is finished.
    #[serde(deserialize_with = "bool_or_number")]
    pub complete: bool,
    /// The lineitem URL provided by the platform at launch
    pub grade_outcome_url: Url,
    /// The tool's identifier for the graded resource
    pub resource_id: String,
    /// The tool's name for the graded resource, used as the lineitem label
    pub resource_name: String,
}

fn bool_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => flag,
        Flag::Number(n) => n != 0.0,
    })
}

impl StudentAttempt {
    /// The score to report for `user_id`
    ///
    /// Finished attempts are reported as completed; all others as in progress.
    /// Scores are always reported as fully graded.
    pub fn score_input(&self, user_id: impl Into<String>) -> ScoreInput {
        let activity_progress = if self.complete {
            ActivityProgress::Completed
        } else {
            ActivityProgress::InProgress
        };

        ScoreInput::new(user_id, self.points_earned, self.points_available)
            .with_activity_progress(activity_progress)
    }
}

/// The result of a successful passback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassbackOutcome {
    /// The status returned by the platform for the accepted score
    pub status: StatusCode,
    /// The `scores` endpoint that accepted the score, when it is not the one
    /// derived from the grade outcome URL
    pub updated_score_url: Option<Url>,
}

/// An error that ended a passback
#[derive(Debug, Error)]
pub enum PassbackError {
    /// No access token could be obtained
    #[error("unable to obtain an access token")]
    Token(#[from] TokenRequestError),
    /// A lineitem was created, but the score could not be posted to it
    #[error("error posting score to newly created lineitem at {score_url}")]
    GradingCreatedLineItem {
        /// The `scores` endpoint of the created lineitem
        score_url: Url,
        /// The underlying submission error
        source: ServiceError,
    },
    /// An existing lineitem was found, but the score could not be posted to it
    #[error("error posting score to existing lineitem at {score_url}")]
    GradingFetchedLineItem {
        /// The `scores` endpoint of the found lineitem
        score_url: Url,
        /// The underlying submission error
        source: ServiceError,
    },
    /// The lineitem could neither be created nor found
    #[error("lineitem for resource {resource_id} does not exist and could not be created")]
    LineItemDoesNotExist {
        /// The resource the lineitem was for
        resource_id: String,
        /// Why the lineitem could not be created
        creation: Box<LineItemError>,
        /// Why the lineitem could not be found
        source: Box<LineItemError>,
    },
}

impl PassbackError {
    /// The HTTP status of the last failed request, if a response was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Token(error) => error.status(),
            Self::GradingCreatedLineItem { source, .. }
            | Self::GradingFetchedLineItem { source, .. } => source.status(),
            Self::LineItemDoesNotExist { source, .. } => source.status(),
        }
    }
}

enum PassbackState {
    SubmitDirect,
    CreateLineItem,
    SubmitToCreated { score_url: Url },
    FetchExisting { creation: LineItemError },
    SubmitToExisting { score_url: Url },
}

impl<C: TimestampClock + Send + Sync> AgsClient<C> {
    /// Posts a learner's score, creating or finding the lineitem when necessary
    ///
    /// A single access token is obtained up front and used for every request
    /// made by this call.
    ///
    /// # Errors
    ///
    /// Returns an error naming the step that failed when no access token is
    /// available or the score could not be recorded by any route.
    #[tracing::instrument(
        skip(self, attempt),
        fields(
            grade_outcome_url = %attempt.grade_outcome_url,
            resource_id = %attempt.resource_id,
        ),
    )]
    pub async fn post_score(
        &self,
        resource_link_id: &str,
        attempt: &StudentAttempt,
        user_id: &str,
    ) -> Result<PassbackOutcome, PassbackError> {
        let submission = score::build_score_submission(
            &attempt.grade_outcome_url,
            attempt.score_input(user_id),
            self.timestamp(),
        );
        let score_url = &submission.score_url;
        let payload = &submission.payload;
        let collection_url = score::lineitem_url_for_scores(score_url);

        let token = self.ensure_access_token().await?;

        let mut state = PassbackState::SubmitDirect;
        loop {
            state = match state {
                PassbackState::SubmitDirect => {
                    match self.submit_score_with(&token, score_url, payload).await {
                        Ok(status) => {
                            return Ok(PassbackOutcome {
                                status,
                                updated_score_url: None,
                            })
                        }
                        Err(error) => {
                            tracing::warn!(
                                error = (&error as &dyn error::Error),
                                "direct score submission failed, creating lineitem"
                            );
                            PassbackState::CreateLineItem
                        }
                    }
                }
                PassbackState::CreateLineItem => {
                    let new_lineitem = NewLineItem {
                        score_maximum: attempt.points_available,
                        label: attempt.resource_name.clone(),
                        tag: lineitem::GRADE_TAG.to_owned(),
                        resource_id: attempt.resource_id.clone(),
                        resource_link_id: resource_link_id.to_owned(),
                    };

                    match self
                        .create_lineitem_with(&token, &collection_url, &new_lineitem)
                        .await
                    {
                        Ok(lineitem_url) => PassbackState::SubmitToCreated {
                            score_url: score::score_url(&lineitem_url),
                        },
                        Err(creation) => {
                            if creation.is_conflict() {
                                tracing::warn!("lineitem already exists, looking it up");
                            } else {
                                tracing::warn!(
                                    error = (&creation as &dyn error::Error),
                                    "lineitem creation failed, looking up existing lineitem"
                                );
                            }
                            PassbackState::FetchExisting { creation }
                        }
                    }
                }
                PassbackState::SubmitToCreated { score_url: created } => {
                    return match self.submit_score_with(&token, &created, payload).await {
                        Ok(status) => Ok(outcome_at(status, score_url, created)),
                        Err(source) => Err(PassbackError::GradingCreatedLineItem {
                            score_url: created,
                            source,
                        }),
                    };
                }
                PassbackState::FetchExisting { creation } => {
                    let filter = LineItemFilter::by_resource_id(attempt.resource_id.as_str());

                    let found = self
                        .fetch_lineitem_with(&token, &collection_url, &filter)
                        .await
                        .and_then(|lineitem| lineitem.score_url());

                    match found {
                        Ok(score_url) => PassbackState::SubmitToExisting { score_url },
                        Err(source) => {
                            return Err(PassbackError::LineItemDoesNotExist {
                                resource_id: attempt.resource_id.clone(),
                                creation: Box::new(creation),
                                source: Box::new(source),
                            })
                        }
                    }
                }
                PassbackState::SubmitToExisting { score_url: existing } => {
                    return match self.submit_score_with(&token, &existing, payload).await {
                        Ok(status) => Ok(outcome_at(status, score_url, existing)),
                        Err(source) => Err(PassbackError::GradingFetchedLineItem {
                            score_url: existing,
                            source,
                        }),
                    };
                }
            };
        }
    }
}

fn outcome_at(status: StatusCode, original: &Url, accepted_at: Url) -> PassbackOutcome {
    let updated_score_url = (accepted_at != *original).then_some(accepted_at);

    if let Some(url) = &updated_score_url {
        tracing::info!(score_url = %url, "score accepted at updated endpoint");
    }

    PassbackOutcome {
        status,
        updated_score_url,
    }
}
