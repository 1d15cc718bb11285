//! Backend collaborators and their HTTP implementation.
//!
//! Components hold these as `Arc<dyn ...>` handles created once at startup,
//! so tests can swap in scripted services without touching the network.

use crate::config::ApiConfig;
use crate::error::{LookupError, SearchError, VisitError};
use crate::geo::Coordinate;
use crate::models::{
    AreaQuery, NearbyResponse, SearchPage, SearchResult, SuggestionResponse, VenueId, VisitDraft,
    VisitRecord,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Area search and text suggestions. Both calls must tolerate being
/// dropped mid-flight.
#[async_trait]
pub trait AreaSearchService: Send + Sync {
    async fn search(&self, query: &AreaQuery) -> Result<SearchPage, SearchError>;

    async fn suggest(
        &self,
        text: &str,
        near: Option<Coordinate>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// Creates visits. The server re-checks distance on its own.
#[async_trait]
pub trait VisitService: Send + Sync {
    async fn create_visit(&self, draft: &VisitDraft) -> Result<VisitRecord, VisitError>;
}

/// Lists the current user's visits to a venue on a given day.
#[async_trait]
pub trait VisitLookupService: Send + Sync {
    async fn list_visits(
        &self,
        venue_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<VisitRecord>, LookupError>;
}

/// Largest page the nearby endpoint accepts.
pub const MAX_NEARBY_LIMIT: usize = 100;

const RATING_FIELDS: [&str; 5] = [
    "wfc_rating",
    "wifi_quality",
    "power_outlets_rating",
    "seating_comfort",
    "noise_level",
];

pub struct ApiClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl AreaSearchService for ApiClient {
    async fn search(&self, query: &AreaQuery) -> Result<SearchPage, SearchError> {
        let mut params = vec![
            ("latitude", degrees(query.center.latitude)),
            ("longitude", degrees(query.center.longitude)),
            ("radius_km", format!("{:.2}", query.radius_km)),
            ("limit", query.limit.clamp(1, MAX_NEARBY_LIMIT).to_string()),
        ];
        if let Some(text) = &query.text {
            params.push(("q", text.clone()));
        }

        let res = self
            .authorize(self.client.get(self.url("cafes/nearby/")).query(&params))
            .send()
            .await?
            .error_for_status()?
            .json::<NearbyResponse>()
            .await?;

        let page = SearchPage::from(res);
        debug!(
            "Nearby search returned {} venues (total {})",
            page.venues.len(),
            page.total_count
        );
        Ok(page)
    }

    async fn suggest(
        &self,
        text: &str,
        near: Option<Coordinate>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut params = vec![("q", text.to_string()), ("limit", limit.to_string())];
        if let Some(c) = near {
            params.push(("latitude", degrees(c.latitude)));
            params.push(("longitude", degrees(c.longitude)));
        }

        let res = self
            .authorize(self.client.get(self.url("cafes/search/")).query(&params))
            .send()
            .await?
            .error_for_status()?
            .json::<SuggestionResponse>()
            .await?;

        let results = res
            .results
            .into_iter()
            .filter_map(|record| match SearchResult::try_from(record) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Dropping malformed search result: {}", e);
                    None
                }
            })
            .take(limit)
            .collect();
        Ok(results)
    }
}

/// Body of `POST visits/create-with-review/`. Registered venues go by id;
/// unregistered ones carry enough detail for the backend to register them.
#[derive(Debug, Serialize)]
struct VisitPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    cafe_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    google_place_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cafe_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cafe_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cafe_latitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cafe_longitude: Option<String>,
    visit_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount_spent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    currency: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visit_time: Option<crate::models::VisitTime>,
    check_in_latitude: String,
    check_in_longitude: String,
    include_review: bool,
    #[serde(flatten)]
    review: Option<&'a crate::models::ReviewPayload>,
}

/// Decimal fields are sent as fixed-point strings to match the backend's
/// decimal columns.
fn degrees(value: f64) -> String {
    format!("{value:.8}")
}

impl<'a> From<&'a VisitDraft> for VisitPayload<'a> {
    fn from(draft: &'a VisitDraft) -> Self {
        let venue = &draft.venue;
        let (cafe_id, google_place_id) = match &venue.id {
            VenueId::Registered(id) => (Some(id.as_str()), None),
            VenueId::External(place) => (None, Some(place.as_str())),
        };
        let unregistered = google_place_id.is_some();

        Self {
            cafe_id,
            google_place_id,
            cafe_name: unregistered.then_some(venue.name.as_str()),
            cafe_address: if unregistered {
                Some(venue.address.as_deref().unwrap_or(""))
            } else {
                None
            },
            cafe_latitude: unregistered.then(|| degrees(venue.coordinate.latitude)),
            cafe_longitude: unregistered.then(|| degrees(venue.coordinate.longitude)),
            visit_date: draft.visit_date,
            amount_spent: draft.amount_spent.map(|a| format!("{a:.2}")),
            currency: draft.currency.as_deref(),
            visit_time: draft.visit_time,
            check_in_latitude: degrees(draft.check_in.latitude),
            check_in_longitude: degrees(draft.check_in.longitude),
            include_review: draft.review.is_some(),
            review: draft.review.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreatedVisit {
    Wrapped { visit: VisitRecord },
    Bare(VisitRecord),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VisitList {
    Paginated { results: Vec<VisitRecord> },
    Plain(Vec<VisitRecord>),
}

/// Maps a DRF-style `{field: [messages]}` body onto [`VisitError`].
pub fn classify_rejection(body: &Value) -> VisitError {
    let fields: BTreeMap<String, String> = match body.as_object() {
        Some(map) => map
            .iter()
            .filter_map(|(field, value)| first_message(value).map(|m| (field.clone(), m)))
            .collect(),
        None => BTreeMap::new(),
    };

    for key in ["check_in_latitude", "check_in_longitude"] {
        if let Some(message) = fields.get(key) {
            return VisitError::DistanceMismatch(message.clone());
        }
    }
    for key in RATING_FIELDS {
        if let Some(message) = fields.get(key) {
            return VisitError::RatingRange {
                field: key.to_string(),
                message: message.clone(),
            };
        }
    }
    if let Some(message) = fields.get("visit_date") {
        return VisitError::DuplicateVisit(message.clone());
    }
    if let Some(message) = fields.get("non_field_errors").or_else(|| fields.get("detail")) {
        if message.contains("already logged") {
            return VisitError::DuplicateVisit(message.clone());
        }
        return VisitError::Field {
            field: "non_field_errors".to_string(),
            message: message.clone(),
        };
    }
    match fields.into_iter().next() {
        Some((field, message)) => VisitError::Field { field, message },
        None => VisitError::Field {
            field: "non_field_errors".to_string(),
            message: "The visit could not be saved.".to_string(),
        },
    }
}

fn first_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_message),
        _ => None,
    }
}

#[async_trait]
impl VisitService for ApiClient {
    async fn create_visit(&self, draft: &VisitDraft) -> Result<VisitRecord, VisitError> {
        let payload = VisitPayload::from(draft);
        let res = self
            .authorize(
                self.client
                    .post(self.url("visits/create-with-review/"))
                    .json(&payload),
            )
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::BAD_REQUEST {
            let body = res.json::<Value>().await.unwrap_or(Value::Null);
            let err = classify_rejection(&body);
            debug!("Visit rejected by backend: {}", err);
            return Err(err);
        }
        if !status.is_success() {
            return Err(VisitError::Network(format!(
                "visit service returned status {}",
                status.as_u16()
            )));
        }

        let created = res.json::<CreatedVisit>().await?;
        Ok(match created {
            CreatedVisit::Wrapped { visit } => visit,
            CreatedVisit::Bare(visit) => visit,
        })
    }
}

#[async_trait]
impl VisitLookupService for ApiClient {
    async fn list_visits(
        &self,
        venue_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<VisitRecord>, LookupError> {
        let list = self
            .authorize(self.client.get(self.url("visits/")).query(&[
                ("cafe", venue_id.to_string()),
                ("visit_date", date.to_string()),
            ]))
            .send()
            .await?
            .error_for_status()?
            .json::<VisitList>()
            .await?;

        let visits = match list {
            VisitList::Paginated { results } => results,
            VisitList::Plain(visits) => visits,
        };
        // The list endpoint may ignore the date filter.
        Ok(visits.into_iter().filter(|v| v.visit_date == date).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn distance_rejection_is_kept_apart_from_rating_errors() {
        let distance = classify_rejection(&json!({
            "check_in_latitude": ["You are 2.40km away from Anomali. You must be within 1km to log a visit."]
        }));
        assert!(matches!(distance, VisitError::DistanceMismatch(ref m) if m.contains("2.40km")));

        let rating = classify_rejection(&json!({"wfc_rating": ["Ensure this value is less than or equal to 5."]}));
        assert_eq!(rating.field(), Some("wfc_rating"));
        assert!(matches!(rating, VisitError::RatingRange { .. }));
    }

    #[test]
    fn duplicate_rejections_are_recognised() {
        let by_field = classify_rejection(&json!({
            "visit_date": "You have already logged a visit to this cafe on this date."
        }));
        assert!(matches!(by_field, VisitError::DuplicateVisit(_)));

        let non_field = classify_rejection(&json!({
            "non_field_errors": ["You already logged a visit to this cafe on this date."]
        }));
        assert!(matches!(non_field, VisitError::DuplicateVisit(_)));
    }

    #[test]
    fn unknown_body_falls_back_to_generic_field_error() {
        let err = classify_rejection(&Value::Null);
        assert_eq!(err.field(), Some("non_field_errors"));
    }
}
