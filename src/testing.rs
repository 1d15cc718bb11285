//! Scripted collaborators and fixtures for unit tests.

use crate::api::{AreaSearchService, VisitLookupService, VisitService};
use crate::camera::{CameraCommand, MapSurface};
use crate::error::{LookupError, PositionError, SearchError, VisitError};
use crate::events::Event;
use crate::geo::{Coordinate, EARTH_RADIUS_KM};
use crate::location::PositionSource;
use crate::models::{AreaQuery, SearchPage, SearchResult, Venue, VenueId, VenueStats, VisitDraft, VisitRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn coord(lat: f64, lon: f64) -> Coordinate {
    Coordinate::new(lat, lon).unwrap()
}

/// The point `meters` due north of `origin`.
pub fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
    let delta_deg = (meters / 1000.0 / EARTH_RADIUS_KM).to_degrees();
    coord(origin.latitude + delta_deg, origin.longitude)
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

pub fn venue(id: &str, lat: f64, lon: f64) -> Venue {
    Venue {
        id: VenueId::Registered(id.to_string()),
        name: format!("Venue {id}"),
        address: Some("Jl. Senopati 10".to_string()),
        coordinate: coord(lat, lon),
        stats: VenueStats::default(),
        distance_km: None,
    }
}

pub fn external_venue(place_id: &str, lat: f64, lon: f64) -> Venue {
    Venue {
        id: VenueId::External(place_id.to_string()),
        ..venue(place_id, lat, lon)
    }
}

pub fn page(ids: &[&str]) -> SearchPage {
    let venues: Vec<Venue> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| venue(id, -6.2 + i as f64 * 0.001, 106.8))
        .collect();
    SearchPage {
        total_count: venues.len(),
        venues,
    }
}

pub fn visit_record(id: &str, date: NaiveDate) -> VisitRecord {
    VisitRecord {
        id: id.to_string(),
        visit_date: date,
        visit_time: None,
        amount_spent: Some(35000.0),
        currency: Some("IDR".to_string()),
        has_review: false,
        created_at: None,
    }
}

/// Drives the event loop for `total` (virtual) time, handing every event to
/// `handle`.
pub async fn pump<F>(rx: &mut UnboundedReceiver<Event>, total: Duration, mut handle: F)
where
    F: FnMut(Event),
{
    let deadline = tokio::time::Instant::now() + total;
    loop {
        tokio::select! {
            Some(event) = rx.recv() => handle(event),
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
}

type Scripted<T> = Mutex<VecDeque<(Duration, T)>>;

/// Area search that answers from a queue of `(delay, outcome)` pairs and
/// falls back to an empty page.
#[derive(Default)]
pub struct ScriptedSearch {
    responses: Scripted<Result<SearchPage, SearchError>>,
    suggestions: Mutex<Vec<SearchResult>>,
    pub queries: Mutex<Vec<AreaQuery>>,
    pub suggest_texts: Mutex<Vec<String>>,
    pub completed: AtomicUsize,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_after(&self, delay: Duration, outcome: Result<SearchPage, SearchError>) {
        self.responses.lock().unwrap().push_back((delay, outcome));
    }

    pub fn set_suggestions(&self, results: Vec<SearchResult>) {
        *self.suggestions.lock().unwrap() = results;
    }
}

#[async_trait]
impl AreaSearchService for ScriptedSearch {
    async fn search(&self, query: &AreaQuery) -> Result<SearchPage, SearchError> {
        self.queries.lock().unwrap().push(query.clone());
        let (delay, outcome) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((Duration::ZERO, Ok(SearchPage::default())));
        tokio::time::sleep(delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn suggest(
        &self,
        text: &str,
        _near: Option<Coordinate>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.suggest_texts.lock().unwrap().push(text.to_string());
        let mut results = self.suggestions.lock().unwrap().clone();
        results.truncate(limit);
        Ok(results)
    }
}

/// Position source that replays a script and then repeats its last entry.
pub struct ScriptedPosition {
    script: Mutex<VecDeque<Result<Coordinate, PositionError>>>,
    last: Mutex<Option<Result<Coordinate, PositionError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedPosition {
    pub fn new(script: Vec<Result<Coordinate, PositionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PositionSource for ScriptedPosition {
    async fn current_position(&self) -> Result<Coordinate, PositionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone().unwrap_or(Err(PositionError::Unavailable("empty script".into())))
    }
}

pub struct ScriptedLookup {
    visits: Vec<VisitRecord>,
    fail: bool,
    pub requests: Mutex<Vec<(String, NaiveDate)>>,
    pub calls: AtomicUsize,
}

impl ScriptedLookup {
    pub fn with_visits(visits: Vec<VisitRecord>) -> Self {
        Self {
            visits,
            fail: false,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_visits(Vec::new())
        }
    }
}

#[async_trait]
impl VisitLookupService for ScriptedLookup {
    async fn list_visits(
        &self,
        venue_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<VisitRecord>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((venue_id.to_string(), date));
        if self.fail {
            return Err(LookupError::Status(500));
        }
        Ok(self.visits.clone())
    }
}

/// Visit service answering every submission with the same outcome after
/// `delay`.
pub struct ScriptedVisits {
    outcome: Result<VisitRecord, VisitError>,
    delay: Duration,
    pub drafts: Mutex<Vec<VisitDraft>>,
    pub completed: AtomicUsize,
}

impl ScriptedVisits {
    pub fn answering(outcome: Result<VisitRecord, VisitError>) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            drafts: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn slow(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

#[async_trait]
impl VisitService for ScriptedVisits {
    async fn create_visit(&self, draft: &VisitDraft) -> Result<VisitRecord, VisitError> {
        self.drafts.lock().unwrap().push(draft.clone());
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub commands: Arc<Mutex<Vec<CameraCommand>>>,
}

impl MapSurface for RecordingSurface {
    fn apply(&mut self, command: &CameraCommand) {
        self.commands.lock().unwrap().push(command.clone());
    }
}
