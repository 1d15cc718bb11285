//! Area search session.
//!
//! Owns the active [`SearchCenter`] and the venue result set. Map movement
//! is only tracked (debounced) and compared against the active center to
//! decide whether to offer "search this area"; a backend search happens
//! only on an explicit confirmation: searching the area, recentering on the
//! user, or picking a text-search result.
//!
//! Every request carries a [`RequestToken`] from a [`RequestSlot`]; results
//! are applied in "last confirmed request wins" order regardless of the
//! order in which they arrive.

use crate::api::AreaSearchService;
use crate::config::SearchConfig;
use crate::debounce::{Debouncer, RequestSlot, RequestToken};
use crate::error::SearchError;
use crate::events::Event;
use crate::geo::{distance_km, BoundingBox, Coordinate};
use crate::models::{AreaQuery, Provenance, SearchCenter, SearchPage, SearchResult, Venue, VenueId};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SearchStatus {
    Idle,
    Loading,
    /// The last search failed. Earlier results stay visible; `retry` re-issues.
    Failed { message: String },
}

pub struct SearchSession {
    service: Arc<dyn AreaSearchService>,
    tx: UnboundedSender<Event>,
    config: SearchConfig,

    active_center: Option<SearchCenter>,
    confirmations: u64,
    map_center: Option<Coordinate>,
    show_search_area: bool,

    venues: Vec<Venue>,
    total_count: usize,
    pinned: Option<Venue>,
    selected: Option<VenueId>,
    status: SearchStatus,

    query: String,
    suggestions: Vec<SearchResult>,

    search: RequestSlot,
    suggest: RequestSlot,
    map_debounce: Debouncer,
    query_debounce: Debouncer,
    closed: bool,
}

impl SearchSession {
    pub fn new(
        service: Arc<dyn AreaSearchService>,
        tx: UnboundedSender<Event>,
        config: SearchConfig,
    ) -> Self {
        Self {
            map_debounce: Debouncer::new(config.map_debounce()),
            query_debounce: Debouncer::new(config.query_debounce()),
            service,
            tx,
            config,
            active_center: None,
            confirmations: 0,
            map_center: None,
            show_search_area: false,
            venues: Vec::new(),
            total_count: 0,
            pinned: None,
            selected: None,
            status: SearchStatus::Idle,
            query: String::new(),
            suggestions: Vec::new(),
            search: RequestSlot::new(),
            suggest: RequestSlot::new(),
            closed: false,
        }
    }

    pub fn active_center(&self) -> Option<SearchCenter> {
        self.active_center
    }

    /// Number of confirmed actions so far. Changes even when a confirmation
    /// lands on the same center as the previous one.
    pub fn confirmation(&self) -> u64 {
        self.confirmations
    }

    pub fn map_center(&self) -> Option<Coordinate> {
        self.map_center
    }

    pub fn show_search_area(&self) -> bool {
        self.show_search_area
    }

    pub fn venues(&self) -> &[Venue] {
        &self.venues
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn suggestions(&self) -> &[SearchResult] {
        &self.suggestions
    }

    pub fn selected(&self) -> Option<&VenueId> {
        self.selected.as_ref()
    }

    /// The temporary marker for a picked venue missing from the results.
    pub fn pinned(&self) -> Option<&Venue> {
        self.pinned.as_ref()
    }

    /// Everything that gets a marker on the map.
    pub fn markers(&self) -> Vec<&Venue> {
        self.venues.iter().chain(self.pinned.iter()).collect()
    }

    // ---------------------------------------------------------------------
    // Map movement
    // ---------------------------------------------------------------------

    /// Raw move-end from the map. Settles after the map debounce window.
    pub fn on_map_moved(&mut self, center: Coordinate) {
        if self.closed {
            return;
        }
        let tx = self.tx.clone();
        self.map_debounce.trigger(move || {
            tx.send(Event::MapSettled(center)).ok();
        });
    }

    /// Records the settled map center and re-evaluates the "search this
    /// area" affordance. Never searches on its own.
    pub fn on_map_settled(&mut self, center: Coordinate) {
        if self.closed {
            return;
        }
        self.map_center = Some(center);
        self.show_search_area = match self.active_center {
            Some(active) => distance_km(&active.coordinate, &center) > self.config.drift_threshold_km,
            None => false,
        };
    }

    // ---------------------------------------------------------------------
    // Confirmed actions
    // ---------------------------------------------------------------------

    /// "Search this area": searches around the settled map center.
    pub fn search_this_area(&mut self) -> Option<RequestToken> {
        let center = self.map_center?;
        self.pinned = None;
        self.confirm(SearchCenter::new(center, Provenance::ManualPan))
    }

    /// "Recenter to my location".
    pub fn recenter(&mut self, user: Coordinate) -> Option<RequestToken> {
        self.pinned = None;
        self.confirm(SearchCenter::new(user, Provenance::LiveLocation))
    }

    /// Picks a text-search result. Locations only move the search center;
    /// venues also get a marker, reusing the existing one when the venue is
    /// already in the result set.
    pub fn select_result(&mut self, result: SearchResult) -> Option<RequestToken> {
        self.suggest.cancel();
        self.query_debounce.cancel();
        self.suggestions.clear();

        let coordinate = result.coordinate();
        match result {
            SearchResult::Location(place) => {
                debug!("Selected location '{}'", place.name);
                self.pinned = None;
                self.selected = None;
            }
            SearchResult::Venue(venue) => {
                debug!("Selected venue '{}'", venue.name);
                self.selected = Some(venue.id.clone());
                self.pinned = if self.venues.iter().any(|v| v.id == venue.id) {
                    None
                } else {
                    Some(venue)
                };
            }
        }
        self.confirm(SearchCenter::new(coordinate, Provenance::SelectedResult))
    }

    /// Re-issues the search for the active center after a failure.
    pub fn retry(&mut self) -> Option<RequestToken> {
        match self.status {
            SearchStatus::Failed { .. } => self.issue_search(),
            _ => None,
        }
    }

    fn confirm(&mut self, center: SearchCenter) -> Option<RequestToken> {
        if self.closed {
            return None;
        }
        self.active_center = Some(center);
        self.confirmations += 1;
        self.show_search_area = false;
        self.issue_search()
    }

    fn issue_search(&mut self) -> Option<RequestToken> {
        if self.closed {
            return None;
        }
        let center = self.active_center?;
        let query = AreaQuery {
            center: center.coordinate,
            radius_km: self.config.radius_km,
            limit: self.config.limit,
            text: None,
        };
        self.status = SearchStatus::Loading;

        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        let token = self.search.launch(move |token| async move {
            let outcome = service.search(&query).await;
            tx.send(Event::SearchFinished { token, outcome }).ok();
        });
        info!(
            "Searching {:?} center ({:.5}, {:.5})",
            center.provenance, center.coordinate.latitude, center.coordinate.longitude
        );
        Some(token)
    }

    /// Applies a search outcome if `token` is still the live request.
    pub fn apply_search(
        &mut self,
        token: RequestToken,
        outcome: Result<SearchPage, SearchError>,
    ) -> bool {
        if !self.search.settle(token) {
            debug!("Discarding stale search result");
            return false;
        }

        match outcome {
            Ok(mut page) => {
                if let Some(center) = self.active_center {
                    let area = BoundingBox::around(&center.coordinate, self.config.radius_km);
                    let before = page.venues.len();
                    page.venues.retain(|v| area.contains(&v.coordinate));
                    if page.venues.len() < before {
                        debug!("Dropped {} venues outside the searched area", before - page.venues.len());
                    }
                }
                if let Some(pinned) = &self.pinned {
                    if page.venues.iter().any(|v| v.id == pinned.id) {
                        self.pinned = None;
                    }
                }
                self.total_count = page.total_count;
                self.venues = page.venues;
                self.status = SearchStatus::Idle;
            }
            Err(e) if e.is_cancelled() => {
                self.status = SearchStatus::Idle;
            }
            Err(e) => {
                warn!("Area search failed: {}", e);
                self.status = SearchStatus::Failed {
                    message: "Couldn't load venues for this area. Tap retry.".to_string(),
                };
            }
        }
        true
    }

    // ---------------------------------------------------------------------
    // Text search
    // ---------------------------------------------------------------------

    pub fn on_query_changed(&mut self, text: &str) {
        if self.closed {
            return;
        }
        self.query = text.to_string();

        if text.trim().chars().count() < self.config.min_query_len {
            self.query_debounce.cancel();
            self.suggest.cancel();
            self.suggestions.clear();
            return;
        }

        let tx = self.tx.clone();
        let text = text.to_string();
        self.query_debounce.trigger(move || {
            tx.send(Event::QuerySettled(text)).ok();
        });
    }

    pub fn on_query_settled(&mut self, text: String) -> Option<RequestToken> {
        if self.closed || text != self.query {
            return None;
        }
        let near = self.map_center.or(self.active_center.map(|c| c.coordinate));
        let limit = self.config.suggestion_limit;
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();

        Some(self.suggest.launch(move |token| async move {
            let outcome = service.suggest(text.trim(), near, limit).await;
            tx.send(Event::SuggestionsFinished { token, outcome }).ok();
        }))
    }

    pub fn apply_suggestions(
        &mut self,
        token: RequestToken,
        outcome: Result<Vec<SearchResult>, SearchError>,
    ) -> bool {
        if !self.suggest.settle(token) {
            debug!("Discarding stale suggestions");
            return false;
        }
        match outcome {
            Ok(mut results) => {
                results.truncate(self.config.suggestion_limit);
                self.suggestions = results;
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Text search failed: {}", e),
        }
        true
    }

    /// Tears the session down: pending timers and requests are cancelled and
    /// nothing that resolves later is applied.
    pub fn close(&mut self) {
        self.closed = true;
        self.map_debounce.cancel();
        self.query_debounce.cancel();
        self.search.cancel();
        self.suggest.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Place;
    use crate::testing::{coord, north_of, page, pump, venue, ScriptedSearch};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn feed(session: &mut SearchSession, event: Event) {
        match event {
            Event::MapSettled(c) => session.on_map_settled(c),
            Event::QuerySettled(q) => {
                session.on_query_settled(q);
            }
            Event::SearchFinished { token, outcome } => {
                session.apply_search(token, outcome);
            }
            Event::SuggestionsFinished { token, outcome } => {
                session.apply_suggestions(token, outcome);
            }
            _ => {}
        }
    }

    fn session(service: Arc<ScriptedSearch>) -> (SearchSession, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SearchSession::new(service, tx, SearchConfig::default()), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn later_request_wins_even_when_earlier_resolves_last() {
        let service = Arc::new(ScriptedSearch::new());
        service.respond_after(Duration::from_millis(300), Ok(page(&["a"])));
        service.respond_after(Duration::from_millis(100), Ok(page(&["b"])));
        let (mut session, mut rx) = session(service.clone());

        let home = coord(-6.2, 106.8);
        let first = session.recenter(home).unwrap();
        // Let the first request reach the service before superseding it.
        pump(&mut rx, Duration::from_millis(10), |e| feed(&mut session, e)).await;
        session.on_map_settled(north_of(home, 2000.0));
        let second = session.search_this_area().unwrap();

        pump(&mut rx, Duration::from_secs(1), |e| feed(&mut session, e)).await;
        let ids: Vec<_> = session.venues().iter().map(|v| v.id.clone()).collect();
        assert_eq!(ids, vec![VenueId::Registered("b".into())]);

        // A late answer for the first request is still rejected.
        assert!(!session.apply_search(first, Ok(page(&["a"]))));
        assert!(!session.apply_search(second, Ok(page(&["a"]))));
        assert_eq!(session.venues()[0].id, VenueId::Registered("b".into()));
        assert_eq!(session.status(), &SearchStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn small_drift_hides_affordance_and_large_drift_shows_it() {
        let service = Arc::new(ScriptedSearch::new());
        let (mut session, mut rx) = session(service.clone());
        let home = coord(-6.2, 106.8);
        session.recenter(home);
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;

        session.on_map_moved(north_of(home, 400.0));
        pump(&mut rx, Duration::from_millis(300), |e| feed(&mut session, e)).await;
        assert!(!session.show_search_area());

        session.on_map_moved(north_of(home, 600.0));
        pump(&mut rx, Duration::from_millis(300), |e| feed(&mut session, e)).await;
        assert!(session.show_search_area());

        // Moving the map never searched by itself.
        assert_eq!(service.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn map_moves_are_debounced() {
        let service = Arc::new(ScriptedSearch::new());
        let (mut session, mut rx) = session(service);
        let home = coord(-6.2, 106.8);
        session.recenter(home);

        session.on_map_moved(north_of(home, 100.0));
        pump(&mut rx, Duration::from_millis(150), |e| feed(&mut session, e)).await;
        session.on_map_moved(north_of(home, 900.0));
        pump(&mut rx, Duration::from_millis(150), |e| feed(&mut session, e)).await;
        assert_eq!(session.map_center(), None);

        pump(&mut rx, Duration::from_millis(100), |e| feed(&mut session, e)).await;
        assert_eq!(session.map_center(), Some(north_of(home, 900.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_search_keeps_stale_results_and_can_retry() {
        let service = Arc::new(ScriptedSearch::new());
        service.respond_after(Duration::ZERO, Ok(page(&["a", "b"])));
        service.respond_after(Duration::ZERO, Err(SearchError::Status(502)));
        service.respond_after(Duration::ZERO, Ok(page(&["c"])));
        let (mut session, mut rx) = session(service.clone());
        let home = coord(-6.2, 106.8);

        session.recenter(home);
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;
        session.on_map_settled(north_of(home, 3000.0));
        session.search_this_area();
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;

        assert!(matches!(session.status(), SearchStatus::Failed { .. }));
        assert_eq!(session.venues().len(), 2);

        assert!(session.retry().is_some());
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;
        assert_eq!(session.status(), &SearchStatus::Idle);
        assert_eq!(session.venues().len(), 1);
        let queries = service.queries.lock().unwrap();
        assert_eq!(queries[2].center, north_of(home, 3000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_outcome_is_not_an_error() {
        let service = Arc::new(ScriptedSearch::new());
        service.respond_after(Duration::ZERO, Err(SearchError::Cancelled));
        let (mut session, mut rx) = session(service);

        session.recenter(coord(-6.2, 106.8));
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;
        assert_eq!(session.status(), &SearchStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_mid_flight_never_updates_state() {
        let service = Arc::new(ScriptedSearch::new());
        service.respond_after(Duration::from_millis(300), Ok(page(&["late"])));
        let (mut session, mut rx) = session(service.clone());

        let token = session.recenter(coord(-6.2, 106.8)).unwrap();
        pump(&mut rx, Duration::from_millis(10), |e| feed(&mut session, e)).await;
        assert_eq!(service.queries.lock().unwrap().len(), 1, "request never reached the service");
        session.on_map_moved(coord(-6.3, 106.9));
        session.on_query_changed("kopi");
        session.close();

        let mut delivered = 0;
        pump(&mut rx, Duration::from_secs(2), |e| {
            delivered += 1;
            feed(&mut session, e);
        })
        .await;

        assert_eq!(delivered, 0);
        assert_eq!(service.completed.load(Ordering::SeqCst), 0);
        assert!(!session.apply_search(token, Ok(page(&["late"]))));
        assert!(session.venues().is_empty());
        assert_eq!(session.map_center(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn short_queries_clear_suggestions_without_searching() {
        let service = Arc::new(ScriptedSearch::new());
        service.set_suggestions(vec![SearchResult::Location(Place {
            name: "Kemang".into(),
            address: None,
            coordinate: coord(-6.26, 106.81),
        })]);
        let (mut session, mut rx) = session(service.clone());

        session.on_query_changed("ke");
        session.on_query_changed("kem");
        pump(&mut rx, Duration::from_millis(400), |e| feed(&mut session, e)).await;
        assert!(session.suggestions().is_empty(), "suggested before the quiet period");
        pump(&mut rx, Duration::from_millis(200), |e| feed(&mut session, e)).await;
        assert_eq!(session.suggestions().len(), 1);
        assert_eq!(service.suggest_texts.lock().unwrap().as_slice(), &["kem".to_string()]);

        session.on_query_changed("k");
        assert!(session.suggestions().is_empty());
        pump(&mut rx, Duration::from_secs(1), |e| feed(&mut session, e)).await;
        assert_eq!(service.suggest_texts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_confirmation_counts_even_on_the_same_center() {
        let service = Arc::new(ScriptedSearch::new());
        let (mut session, _rx) = session(service);
        let home = coord(-6.2, 106.8);

        session.recenter(home);
        let first = session.confirmation();
        session.on_map_settled(north_of(home, 3000.0));
        assert!(session.show_search_area());

        session.recenter(home);
        assert_eq!(session.confirmation(), first + 1);
        assert_eq!(session.active_center(), Some(SearchCenter::new(home, Provenance::LiveLocation)));
        assert_eq!(session.retry(), None);
        assert_eq!(session.confirmation(), first + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn venues_outside_the_searched_area_are_dropped() {
        let service = Arc::new(ScriptedSearch::new());
        let mut result = page(&["near"]);
        result.venues.push(venue("far", -7.0, 110.0));
        service.respond_after(Duration::ZERO, Ok(result));
        let (mut session, mut rx) = session(service);

        session.recenter(coord(-6.2, 106.8));
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;

        let ids: Vec<_> = session.venues().iter().map(|v| v.id.clone()).collect();
        assert_eq!(ids, vec![VenueId::Registered("near".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn picked_venue_reuses_existing_marker_or_pins_a_temporary_one() {
        let service = Arc::new(ScriptedSearch::new());
        service.respond_after(Duration::ZERO, Ok(page(&["a"])));
        service.respond_after(Duration::ZERO, Ok(page(&["a"])));
        service.respond_after(Duration::ZERO, Ok(page(&["a"])));
        let (mut session, mut rx) = session(service);

        session.recenter(coord(-6.2, 106.8));
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;

        session.select_result(SearchResult::Venue(venue("a", -6.2, 106.8)));
        assert!(session.pinned().is_none());
        assert_eq!(session.selected(), Some(&VenueId::Registered("a".into())));
        assert_eq!(session.markers().len(), 1);

        session.select_result(SearchResult::Venue(venue("z", -6.25, 106.85)));
        assert_eq!(session.markers().len(), 2);
        pump(&mut rx, Duration::from_millis(50), |e| feed(&mut session, e)).await;
        // Still missing from the refreshed results, so the pin stays.
        assert_eq!(session.pinned().map(|v| v.name.as_str()), Some("Venue z"));

        session.recenter(coord(-6.2, 106.8));
        assert!(session.pinned().is_none());
    }
}
