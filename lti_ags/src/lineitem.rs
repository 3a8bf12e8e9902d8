//! Lineitems, the gradebook columns that scores are posted to

use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    client::{self, ServiceError},
    media_type,
    oauth2::TokenRequestError,
    score::{self, TimestampClock},
    AgsClient, TokenWithLifetime,
};

/// The tag used for lineitems created to hold grades
pub const GRADE_TAG: &str = "grade";

/// A gradebook column as reported by the platform
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// The lineitem's URL
    #[serde(default)]
    pub id: Option<String>,
    /// When the activity opens
    #[serde(default, alias = "startDate", skip_serializing_if = "Option::is_none")]
    pub start_date_time: Option<String>,
    /// When the activity closes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date_time: Option<String>,
    /// The maximum score for the column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_maximum: Option<f64>,
    /// The column label
    #[serde(default)]
    pub label: String,
    /// The tool's tag for the column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// The tool's identifier for the graded resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// The resource link the column is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_link_id: Option<String>,
}

impl LineItem {
    /// The lineitem's URL
    ///
    /// # Errors
    ///
    /// Returns an error if the platform did not supply an `id` or the `id` is not a URL.
    pub fn url(&self) -> Result<Url, LineItemError> {
        let id = self
            .id
            .as_deref()
            .ok_or_else(|| LineItemError::MissingId {
                resource_id: self.resource_id.clone(),
            })?;

        Url::parse(id).map_err(|source| LineItemError::InvalidId {
            id: id.to_owned(),
            source,
        })
    }

    /// The `scores` endpoint of this lineitem
    ///
    /// # Errors
    ///
    /// Returns an error if the lineitem has no usable URL.
    pub fn score_url(&self) -> Result<Url, LineItemError> {
        self.url().map(|url| score::score_url(&url))
    }
}

/// A lineitem to be created
#[derive(Clone, Debug, PartialEq)]
pub struct NewLineItem {
    /// The maximum score for the column
    pub score_maximum: f64,
    /// The column label
    pub label: String,
    /// The tool's tag for the column
    pub tag: String,
    /// The tool's identifier for the graded resource
    pub resource_id: String,
    /// The resource link the column is attached to
    pub resource_link_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLineItemRequest<'a> {
    start_date_time: &'a str,
    end_date_time: &'a str,
    score_maximum: f64,
    label: &'a str,
    tag: &'a str,
    resource_id: &'a str,
    resource_link_id: &'a str,
}

/// Query filters for lineitem lookups
///
/// Unset filters are not sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LineItemFilter {
    /// Only lineitems for this resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Only lineitems attached to this resource link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_link_id: Option<String>,
    /// Only lineitems with this tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Page size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl LineItemFilter {
    /// A filter matching a single resource
    pub fn by_resource_id(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            ..Self::default()
        }
    }

    /// Restricts the filter to a resource link
    pub fn with_resource_link_id(self, resource_link_id: impl Into<String>) -> Self {
        Self {
            resource_link_id: Some(resource_link_id.into()),
            ..self
        }
    }

    /// Restricts the filter to a tag
    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..self
        }
    }

    /// Limits the page size
    pub fn with_limit(self, limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..self
        }
    }
}

/// Platforms answer a filtered lookup with either a container or a bare lineitem
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

/// An error while managing lineitems
#[derive(Debug, Error)]
pub enum LineItemError {
    /// No access token could be obtained
    #[error("unable to obtain an access token")]
    Token(#[from] TokenRequestError),
    /// The platform refused to create the lineitem
    #[error("error creating lineitem at {}", .0.url())]
    Creation(#[source] ServiceError),
    /// The lineitem lookup request failed
    #[error("error looking up lineitem at {}", .0.url())]
    Lookup(#[source] ServiceError),
    /// No lineitem in the response matched the requested resource
    #[error("no lineitem at {url} matches resource {resource_id}")]
    NoMatch {
        /// The collection searched
        url: Url,
        /// The resource ID searched for
        resource_id: String,
    },
    /// The platform returned no lineitems
    #[error("no lineitems returned from {url}")]
    Empty {
        /// The collection searched
        url: Url,
    },
    /// Several lineitems matched and none could be preferred
    #[error("{count} lineitems returned from {url} without a resource to select by")]
    Ambiguous {
        /// The collection searched
        url: Url,
        /// The number of lineitems returned
        count: usize,
    },
    /// The lineitem listing request failed
    #[error("error listing lineitems at {}", .0.url())]
    Listing(#[source] ServiceError),
    /// The platform returned a lineitem without an `id`
    #[error("lineitem has no id")]
    MissingId {
        /// The resource ID of the lineitem, if reported
        resource_id: Option<String>,
    },
    /// The platform returned a lineitem `id` that is not a URL
    #[error("lineitem id {id} is not a valid URL")]
    InvalidId {
        /// The reported `id`
        id: String,
        /// The parse error
        source: url::ParseError,
    },
}

impl LineItemError {
    /// The HTTP status returned by the platform, if a response was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Token(error) => error.status(),
            Self::Creation(error) | Self::Lookup(error) | Self::Listing(error) => error.status(),
            _ => None,
        }
    }

    /// Whether the platform reported that the lineitem already exists
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }
}

/// Picks the lineitem for `resource_id` out of a lookup response
///
/// When a resource ID is given, only an exact match is accepted, wherever it
/// appears in the response. Without one, the response must hold exactly one
/// lineitem.
fn select_lineitem(
    items: Vec<LineItem>,
    resource_id: Option<&str>,
    url: &Url,
) -> Result<LineItem, LineItemError> {
    if let Some(resource_id) = resource_id {
        return items
            .into_iter()
            .find(|item| item.resource_id.as_deref() == Some(resource_id))
            .ok_or_else(|| LineItemError::NoMatch {
                url: url.clone(),
                resource_id: resource_id.to_owned(),
            });
    }

    let count = items.len();
    let mut items = items.into_iter();
    match (items.next(), count) {
        (Some(item), 1) => Ok(item),
        (None, _) => Err(LineItemError::Empty { url: url.clone() }),
        _ => Err(LineItemError::Ambiguous {
            url: url.clone(),
            count,
        }),
    }
}

impl<C: TimestampClock + Send + Sync> AgsClient<C> {
    /// Creates a lineitem in a lineitem collection
    ///
    /// Returns the URL the platform assigned to the new lineitem.
    ///
    /// # Errors
    ///
    /// Returns an error if no access token is available or the platform refuses
    /// the lineitem. A lineitem that already exists is reported as a
    /// [`Creation`][LineItemError::Creation] error with a `409` status.
    pub async fn create_lineitem(
        &self,
        collection_url: &Url,
        lineitem: &NewLineItem,
    ) -> Result<Url, LineItemError> {
        let token = self.ensure_access_token().await?;
        self.create_lineitem_with(&token, collection_url, lineitem)
            .await
    }

    /// Looks up a single lineitem in a lineitem collection
    ///
    /// # Errors
    ///
    /// Returns an error if no access token is available, the lookup fails, or no
    /// lineitem in the response matches the filter's resource ID.
    pub async fn fetch_lineitem(
        &self,
        collection_url: &Url,
        filter: &LineItemFilter,
    ) -> Result<LineItem, LineItemError> {
        let token = self.ensure_access_token().await?;
        self.fetch_lineitem_with(&token, collection_url, filter)
            .await
    }

    /// Lists the lineitems in a lineitem collection as raw JSON
    ///
    /// # Errors
    ///
    /// Returns an error if no access token is available or the listing fails.
    pub async fn fetch_all_lineitems(
        &self,
        collection_url: &Url,
        filter: &LineItemFilter,
    ) -> Result<serde_json::Value, LineItemError> {
        let token = self.ensure_access_token().await?;

        let request = self
            .http()
            .get(collection_url.clone())
            .header(header::ACCEPT, media_type::LINEITEM_CONTAINER)
            .query(filter);

        client::send_authorized_json(&token, request, collection_url)
            .await
            .map_err(LineItemError::Listing)
    }

    #[tracing::instrument(
        skip(self, token, collection_url, lineitem),
        fields(
            collection_url = %collection_url,
            resource_id = %lineitem.resource_id,
        ),
    )]
    pub(crate) async fn create_lineitem_with(
        &self,
        token: &TokenWithLifetime,
        collection_url: &Url,
        lineitem: &NewLineItem,
    ) -> Result<Url, LineItemError> {
        let now = score::format_timestamp(self.timestamp());

        let body = CreateLineItemRequest {
            start_date_time: &now,
            end_date_time: &now,
            score_maximum: lineitem.score_maximum,
            label: &lineitem.label,
            tag: &lineitem.tag,
            resource_id: &lineitem.resource_id,
            resource_link_id: &lineitem.resource_link_id,
        };

        let request = self
            .http()
            .post(collection_url.clone())
            .header(header::CONTENT_TYPE, media_type::LINEITEM)
            .header(header::ACCEPT, media_type::LINEITEM)
            .json(&body);

        let created: LineItem = client::send_authorized_json(token, request, collection_url)
            .await
            .map_err(LineItemError::Creation)?;

        let url = created.url()?;

        tracing::info!(lineitem_url = %url, "created lineitem");

        Ok(url)
    }

    #[tracing::instrument(
        skip(self, token, collection_url, filter),
        fields(
            collection_url = %collection_url,
            resource_id = filter.resource_id.as_deref().unwrap_or_default(),
        ),
    )]
    pub(crate) async fn fetch_lineitem_with(
        &self,
        token: &TokenWithLifetime,
        collection_url: &Url,
        filter: &LineItemFilter,
    ) -> Result<LineItem, LineItemError> {
        let request = self
            .http()
            .get(collection_url.clone())
            .header(header::ACCEPT, media_type::LINEITEM_CONTAINER)
            .query(filter);

        let found: OneOrMany<LineItem> =
            client::send_authorized_json(token, request, collection_url)
                .await
                .map_err(LineItemError::Lookup)?;

        let items = found.into_vec();
        tracing::debug!(count = items.len(), "received lineitems");

        select_lineitem(items, filter.resource_id.as_deref(), collection_url)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    fn collection() -> Url {
        Url::parse("https://lms/ctx/7/lineitems").unwrap()
    }

    fn item(id: &str, resource_id: &str) -> LineItem {
        LineItem {
            id: Some(id.to_owned()),
            resource_id: Some(resource_id.to_owned()),
            ..LineItem::default()
        }
    }

    mod when_parsing {
        use super::*;

        #[test]
        fn accepts_a_bare_lineitem() -> Result<()> {
            let found: OneOrMany<LineItem> = serde_json::from_str(
                r#"{"id":"https://lms/li/1","label":"Quiz","resourceId":"quiz-1","scoreMaximum":10}"#,
            )?;

            let items = found.into_vec();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].resource_id.as_deref(), Some("quiz-1"));
            assert_eq!(items[0].score_maximum, Some(10.0));

            Ok(())
        }

        #[test]
        fn accepts_a_container() -> Result<()> {
            let found: OneOrMany<LineItem> = serde_json::from_str(
                r#"[{"id":"https://lms/li/1","resourceId":"a"},{"id":"https://lms/li/2","resourceId":"b"}]"#,
            )?;

            assert_eq!(found.into_vec().len(), 2);

            Ok(())
        }

        #[test]
        fn empty_container_has_no_items() -> Result<()> {
            let found: OneOrMany<LineItem> = serde_json::from_str("[]")?;

            assert!(found.into_vec().is_empty());

            Ok(())
        }

        #[test]
        fn accepts_legacy_start_date() -> Result<()> {
            let item: LineItem = serde_json::from_str(
                r#"{"id":"https://lms/li/1","startDate":"2024-01-01T00:00:00Z"}"#,
            )?;

            assert_eq!(item.start_date_time.as_deref(), Some("2024-01-01T00:00:00Z"));

            Ok(())
        }

        #[test]
        fn derives_score_url_from_id() -> Result<()> {
            let item = item("https://lms/li/1?ctx=9", "a");

            assert_eq!(item.score_url()?.as_str(), "https://lms/li/1/scores?ctx=9");

            Ok(())
        }

        #[test]
        fn missing_id_is_an_error() {
            let item = LineItem::default();

            assert!(matches!(item.url(), Err(LineItemError::MissingId { .. })));
        }

        #[test]
        fn non_url_id_is_an_error() {
            let item = item("not a url", "a");

            assert!(matches!(item.url(), Err(LineItemError::InvalidId { .. })));
        }
    }

    mod when_selecting {
        use super::*;

        #[test]
        fn matches_resource_id_not_position() -> Result<()> {
            let items = vec![
                item("https://lms/li/1", "other"),
                item("https://lms/li/2", "wanted"),
                item("https://lms/li/3", "another"),
            ];

            let selected = select_lineitem(items, Some("wanted"), &collection())?;

            assert_eq!(selected.id.as_deref(), Some("https://lms/li/2"));

            Ok(())
        }

        #[test]
        fn single_object_must_still_match() {
            let items = vec![item("https://lms/li/1", "other")];

            let result = select_lineitem(items, Some("wanted"), &collection());

            assert!(matches!(result, Err(LineItemError::NoMatch { .. })));
        }

        #[test]
        fn matching_is_exact() {
            let items = vec![
                item("https://lms/li/1", "Wanted"),
                item("https://lms/li/2", "wanted-2"),
            ];

            let result = select_lineitem(items, Some("wanted"), &collection());

            assert!(matches!(result, Err(LineItemError::NoMatch { .. })));
        }

        #[test]
        fn without_resource_accepts_exactly_one() -> Result<()> {
            let items = vec![item("https://lms/li/1", "a")];

            let selected = select_lineitem(items, None, &collection())?;

            assert_eq!(selected.id.as_deref(), Some("https://lms/li/1"));

            Ok(())
        }

        #[test]
        fn without_resource_rejects_empty() {
            let result = select_lineitem(Vec::new(), None, &collection());

            assert!(matches!(result, Err(LineItemError::Empty { .. })));
        }

        #[test]
        fn without_resource_rejects_many() {
            let items = vec![item("https://lms/li/1", "a"), item("https://lms/li/2", "b")];

            let result = select_lineitem(items, None, &collection());

            assert!(matches!(result, Err(LineItemError::Ambiguous { count: 2, .. })));
        }
    }

    #[test]
    fn filter_omits_unset_fields() -> Result<()> {
        let filter = LineItemFilter::by_resource_id("quiz-1").with_limit(5);

        assert_eq!(
            serde_json::to_value(&filter)?,
            serde_json::json!({ "resource_id": "quiz-1", "limit": 5 })
        );

        Ok(())
    }

    #[test]
    fn create_request_uses_camel_case() -> Result<()> {
        let body = CreateLineItemRequest {
            start_date_time: "2024-01-01T00:00:00.000Z",
            end_date_time: "2024-01-01T00:00:00.000Z",
            score_maximum: 10.0,
            label: "Quiz",
            tag: GRADE_TAG,
            resource_id: "quiz-1",
            resource_link_id: "link-1",
        };

        assert_eq!(
            serde_json::to_value(&body)?,
            serde_json::json!({
                "startDateTime": "2024-01-01T00:00:00.000Z",
                "endDateTime": "2024-01-01T00:00:00.000Z",
                "scoreMaximum": 10.0,
                "label": "Quiz",
                "tag": "grade",
                "resourceId": "quiz-1",
                "resourceLinkId": "link-1",
            })
        );

        Ok(())
    }
}
