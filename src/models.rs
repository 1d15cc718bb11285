use crate::geo::Coordinate;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Where a venue lives on the backend.
///
/// Venues found only through the place provider have no internal id yet;
/// they become `Registered` once the first visit is logged against them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VenueId {
    Registered(String),
    External(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VenueStats {
    pub total_visits: u32,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Venue {
    pub id: VenueId,
    pub name: String,
    pub address: Option<String>,
    pub coordinate: Coordinate,
    pub stats: VenueStats,
    /// Distance from the search center as reported by the backend.
    pub distance_km: Option<f64>,
}

impl Venue {
    pub fn is_registered(&self) -> bool {
        matches!(self.id, VenueId::Registered(_))
    }

    pub fn registered_id(&self) -> Option<&str> {
        match &self.id {
            VenueId::Registered(id) => Some(id),
            VenueId::External(_) => None,
        }
    }
}

/// Why the active search center sits where it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    LiveLocation,
    ManualPan,
    SelectedResult,
}

/// The coordinate the last confirmed area search ran around.
/// Replaced wholesale on every confirmation, never edited in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchCenter {
    pub coordinate: Coordinate,
    pub provenance: Provenance,
}

impl SearchCenter {
    pub fn new(coordinate: Coordinate, provenance: Provenance) -> Self {
        Self {
            coordinate,
            provenance,
        }
    }
}

/// A named place with no venue semantics (a district, a street, a city).
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub name: String,
    pub address: Option<String>,
    pub coordinate: Coordinate,
}

/// One row of a text search, discriminated by `result_type` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResult {
    Venue(Venue),
    Location(Place),
}

impl SearchResult {
    pub fn coordinate(&self) -> Coordinate {
        match self {
            SearchResult::Venue(v) => v.coordinate,
            SearchResult::Location(p) => p.coordinate,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SearchResult::Venue(v) => &v.name,
            SearchResult::Location(p) => &p.name,
        }
    }
}

/// Parameters for one area search request.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaQuery {
    pub center: Coordinate,
    pub radius_km: f64,
    pub limit: usize,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    pub venues: Vec<Venue>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum VisitTime {
    Morning,
    Afternoon,
    Evening,
}

impl From<VisitTime> for u8 {
    fn from(t: VisitTime) -> u8 {
        match t {
            VisitTime::Morning => 1,
            VisitTime::Afternoon => 2,
            VisitTime::Evening => 3,
        }
    }
}

impl TryFrom<u8> for VisitTime {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(VisitTime::Morning),
            2 => Ok(VisitTime::Afternoon),
            3 => Ok(VisitTime::Evening),
            other => Err(format!("unknown visit time {other}")),
        }
    }
}

impl std::fmt::Display for VisitTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VisitTime::Morning => "morning",
            VisitTime::Afternoon => "afternoon",
            VisitTime::Evening => "evening",
        };
        f.write_str(label)
    }
}

/// Optional review attached to a visit. Ratings are on a 1-5 scale.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReviewPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wfc_rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_outlets_rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seating_comfort: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_smoking_area: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_prayer_room: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A visit being composed. `check_in` is the user position captured at
/// submission time.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitDraft {
    pub venue: Venue,
    pub check_in: Coordinate,
    pub visit_date: NaiveDate,
    pub amount_spent: Option<f64>,
    pub currency: Option<String>,
    pub visit_time: Option<VisitTime>,
    pub review: Option<ReviewPayload>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VisitRecord {
    #[serde(deserialize_with = "identifier")]
    pub id: String,
    pub visit_date: NaiveDate,
    #[serde(default)]
    pub visit_time: Option<VisitTime>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub amount_spent: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub has_review: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl VisitRecord {
    /// One-line summary for the "already logged" view.
    pub fn summary(&self) -> String {
        let when = self
            .visit_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| self.visit_date.to_string());
        let spent = match (self.amount_spent, &self.currency) {
            (Some(amount), Some(cur)) => format!("{amount:.2} {cur}"),
            (Some(amount), None) => format!("{amount:.2}"),
            _ => "no amount".to_string(),
        };
        let review = if self.has_review {
            "reviewed"
        } else {
            "no review yet"
        };
        format!("{when}, {spent}, {review}")
    }
}

// Wire shapes returned by the backend. Decimal fields arrive either as JSON
// numbers or as strings, depending on the serializer that produced them.

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Decimal {
    Number(f64),
    Text(String),
}

impl Decimal {
    fn to_f64(&self) -> Option<f64> {
        match self {
            Decimal::Number(n) => Some(*n),
            Decimal::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Identifier {
    Int(i64),
    Text(String),
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> String {
        match id {
            Identifier::Int(n) => n.to_string(),
            Identifier::Text(s) => s,
        }
    }
}

fn opt_identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Identifier>::deserialize(deserializer)?.map(String::from))
}

fn identifier<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Identifier::deserialize(deserializer).map(String::from)
}

fn opt_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Decimal>::deserialize(deserializer)?;
    Ok(raw.and_then(|d| d.to_f64()))
}

#[derive(Debug, Deserialize)]
pub struct VenueRecord {
    #[serde(default, deserialize_with = "opt_identifier")]
    pub id: Option<String>,
    #[serde(default)]
    pub google_place_id: Option<String>,
    #[serde(default)]
    pub place_id: Option<String>,
    pub name: String,
    #[serde(default, alias = "vicinity")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub total_visits: Option<u32>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub average_wfc_rating: Option<f64>,
    #[serde(default, alias = "distance", deserialize_with = "opt_decimal")]
    pub distance_km: Option<f64>,
}

impl TryFrom<VenueRecord> for Venue {
    type Error = String;

    fn try_from(r: VenueRecord) -> Result<Self, Self::Error> {
        let id = match (r.id, r.google_place_id.or(r.place_id)) {
            (Some(id), _) => VenueId::Registered(id),
            (None, Some(place)) => VenueId::External(place),
            (None, None) => return Err(format!("venue '{}' has no identifier", r.name)),
        };
        let (lat, lon) = r
            .latitude
            .zip(r.longitude)
            .ok_or_else(|| format!("venue '{}' has no coordinates", r.name))?;
        let coordinate = Coordinate::new(lat, lon).map_err(|e| e.to_string())?;

        Ok(Venue {
            id,
            name: r.name,
            address: r.address,
            coordinate,
            stats: VenueStats {
                total_visits: r.total_visits.unwrap_or(0),
                average_rating: r.average_wfc_rating,
            },
            distance_km: r.distance_km,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct NearbyResponse {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub results: Vec<VenueRecord>,
}

impl From<NearbyResponse> for SearchPage {
    fn from(res: NearbyResponse) -> Self {
        let venues: Vec<Venue> = res
            .results
            .into_iter()
            .filter_map(|record| match Venue::try_from(record) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Dropping malformed venue record: {}", e);
                    None
                }
            })
            .collect();
        let total_count = res.count.unwrap_or(venues.len());
        Self {
            venues,
            total_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlaceRecord {
    pub name: String,
    #[serde(default, alias = "vicinity")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "result_type", rename_all = "snake_case")]
pub enum SearchResultRecord {
    Venue(VenueRecord),
    Location(PlaceRecord),
}

impl TryFrom<SearchResultRecord> for SearchResult {
    type Error = String;

    fn try_from(r: SearchResultRecord) -> Result<Self, Self::Error> {
        match r {
            SearchResultRecord::Venue(v) => Venue::try_from(v).map(SearchResult::Venue),
            SearchResultRecord::Location(p) => {
                let (lat, lon) = p
                    .latitude
                    .zip(p.longitude)
                    .ok_or_else(|| format!("location '{}' has no coordinates", p.name))?;
                Ok(SearchResult::Location(Place {
                    name: p.name,
                    address: p.address,
                    coordinate: Coordinate::new(lat, lon).map_err(|e| e.to_string())?,
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestionResponse {
    #[serde(default)]
    pub results: Vec<SearchResultRecord>,
}
