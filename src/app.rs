use crate::api::{AreaSearchService, VisitLookupService, VisitService};
use crate::camera::{CameraCoordinator, MapSurface};
use crate::checkin::CheckInVerifier;
use crate::config::Config;
use crate::events::{Command, Event, HELP};
use crate::location::{GeolocationProvider, PositionSource, WatchMode};
use crate::models::{ReviewPayload, SearchResult, Venue};
use crate::search::{SearchSession, SearchStatus};
use crate::visit::{FormView, SubmitState, VisitForm, VisitServices};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Backend and platform collaborators.
#[derive(Clone)]
pub struct Services {
    pub search: Arc<dyn AreaSearchService>,
    pub visits: Arc<dyn VisitService>,
    pub lookup: Arc<dyn VisitLookupService>,
    pub position: Arc<dyn PositionSource>,
}

pub struct App {
    pub location: GeolocationProvider,
    pub search: SearchSession,
    pub camera: CameraCoordinator,
    pub form: Option<VisitForm>,
    pub should_quit: bool,

    tx: UnboundedSender<Event>,
    verifier: CheckInVerifier,
    visit_services: VisitServices,
    // Lines for the console, drained by the driver after every event
    notices: Vec<String>,
}

impl App {
    pub fn new(
        config: &Config,
        services: Services,
        surface: Box<dyn MapSurface>,
        tx: UnboundedSender<Event>,
    ) -> Self {
        let mode = if config.location.watch {
            WatchMode::Every(Duration::from_secs(config.location.watch_interval_secs.max(1)))
        } else {
            WatchMode::Once
        };

        Self {
            location: GeolocationProvider::new(services.position, tx.clone(), mode),
            search: SearchSession::new(services.search, tx.clone(), config.search.clone()),
            camera: CameraCoordinator::new(
                surface,
                tx.clone(),
                config.camera.default_zoom,
                config.camera.fly_duration(),
                config.camera.cooldown(),
            ),
            form: None,
            should_quit: false,
            tx,
            verifier: CheckInVerifier::new(config.checkin.max_distance_km),
            visit_services: VisitServices {
                lookup: services.lookup,
                visits: services.visits,
            },
            notices: Vec::new(),
        }
    }

    /// Kicks off location acquisition. The first fix becomes the initial
    /// search center.
    pub fn start(&mut self) {
        self.location.start();
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, line: impl Into<String>) {
        self.notices.push(line.into());
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Input(command) => self.handle_command(command),
            Event::BadInput(message) => self.notify(message),
            Event::PositionFix { token, outcome } => {
                if self.location.apply(token, outcome) {
                    self.on_position_changed();
                }
            }
            Event::MapMoved(center) => {
                // Move-ends reported mid-fly belong to the animation.
                if self.camera.is_flying() {
                    debug!("Ignoring map move-end during camera fly");
                } else {
                    self.search.on_map_moved(center);
                }
            }
            Event::MapSettled(center) => {
                self.search.on_map_settled(center);
                if self.search.show_search_area() {
                    self.notify("Map moved away from the results. Type 'area' to search here.");
                }
            }
            Event::QuerySettled(text) => {
                self.search.on_query_settled(text);
            }
            Event::SearchFinished { token, outcome } => {
                if self.search.apply_search(token, outcome) {
                    match self.search.status() {
                        SearchStatus::Failed { message } => {
                            let message = message.clone();
                            self.notify(message);
                        }
                        _ => {
                            let line = format!(
                                "{} venues nearby ({} shown).",
                                self.search.total_count(),
                                self.search.venues().len()
                            );
                            self.notify(line);
                        }
                    }
                }
            }
            Event::SuggestionsFinished { token, outcome } => {
                if self.search.apply_suggestions(token, outcome) {
                    let lines = suggestion_lines(self.search.suggestions());
                    self.notices.extend(lines);
                }
            }
            Event::FlyExpired { generation } => self.camera.on_fly_expired(generation),
            Event::DuplicateChecked { token, outcome } => {
                if let Some(form) = self.form.as_mut() {
                    if form.apply_duplicate_check(token, outcome) {
                        self.report_form_view();
                    }
                }
            }
            Event::VisitSubmitted { token, outcome } => {
                if let Some(form) = self.form.as_mut() {
                    if form.apply_submission(token, outcome) {
                        self.report_submission();
                    }
                }
            }
        }

        // Flies once per confirmed action, never on plain re-renders.
        let center = self.search.active_center();
        if self.camera.follow(center, self.search.confirmation()) {
            if let Some(center) = center {
                // The surface lands on the new center; treat it as a move-end.
                self.search.on_map_moved(center.coordinate);
            }
        }
    }

    fn on_position_changed(&mut self) {
        let state = self.location.state().clone();
        if let Some(error) = state.error {
            self.notify(error);
        }
        if let Some(user) = state.coordinate {
            if self.search.active_center().is_none() {
                info!("First position fix, searching around the user");
                self.search.recenter(user);
            }
        }
        if let Some(form) = self.form.as_mut() {
            form.update_position(state.coordinate);
        }
    }

    fn handle_command(&mut self, command: Command) {
        debug!("Command {:?}", command);
        match command {
            Command::Move(center) => self.search.on_map_moved(center),
            Command::Zoom(level) => self.camera.on_zoom_changed(level),
            Command::SearchArea => {
                if self.search.search_this_area().is_none() {
                    self.notify("Nothing to search yet: move the map first.");
                }
            }
            Command::Recenter => match self.location.state().settled_coordinate() {
                Some(user) => {
                    self.search.recenter(user);
                }
                None => {
                    self.notify("Your location is not known yet; trying again.");
                    self.location.refetch();
                }
            },
            Command::Retry => {
                if self.search.retry().is_none() {
                    self.notify("The last search did not fail; nothing to retry.");
                }
            }
            Command::Query(text) => self.search.on_query_changed(&text),
            Command::Pick(n) => {
                let result = n
                    .checked_sub(1)
                    .and_then(|i| self.search.suggestions().get(i).cloned());
                match result {
                    Some(result) => self.pick(result),
                    None => self.notify(format!("No suggestion #{n}.")),
                }
            }
            Command::Open(n) => {
                let venue = n
                    .checked_sub(1)
                    .and_then(|i| self.search.markers().get(i).map(|v| (*v).clone()));
                match venue {
                    Some(venue) => self.open_form(venue),
                    None => self.notify(format!("No venue #{n} on the map.")),
                }
            }
            Command::Spent { amount, currency } => {
                if let Some(form) = self.form_or_notify() {
                    form.amount_spent = Some(amount);
                    if currency.is_some() {
                        form.currency = currency;
                    }
                }
            }
            Command::Time(time) => {
                if let Some(form) = self.form_or_notify() {
                    form.visit_time = Some(time);
                }
            }
            Command::Review { rating, comment } => {
                if let Some(form) = self.form_or_notify() {
                    form.review = Some(ReviewPayload {
                        wfc_rating: Some(rating),
                        comment,
                        ..ReviewPayload::default()
                    });
                }
            }
            Command::Visit => self.submit_visit(),
            Command::CloseForm => {
                if let Some(mut form) = self.form.take() {
                    form.close();
                    self.notify(format!("Closed the visit form for {}.", form.venue().name));
                }
            }
            Command::Refetch => {
                self.location.refetch();
            }
            Command::Status => {
                let lines = self.status_lines();
                self.notices.extend(lines);
            }
            Command::Help => self.notify(HELP),
            Command::Quit => self.should_quit = true,
        }
    }

    fn form_or_notify(&mut self) -> Option<&mut VisitForm> {
        if self.form.is_none() {
            self.notify("Open a venue first ('open <n>').");
        }
        self.form.as_mut()
    }

    fn pick(&mut self, result: SearchResult) {
        let line = match &result {
            SearchResult::Venue(venue) => format!("Showing venue {}.", venue.name),
            SearchResult::Location(place) => format!("Showing {}.", place.name),
        };
        self.search.select_result(result);
        self.notify(line);
    }

    /// Opens the visit form for `venue`, replacing any open form.
    pub fn open_form(&mut self, venue: Venue) {
        if let Some(mut previous) = self.form.take() {
            previous.close();
        }
        let today = Local::now().date_naive();
        let form = VisitForm::open(
            venue,
            today,
            self.location.state().settled_coordinate(),
            self.verifier,
            &self.visit_services,
            self.tx.clone(),
        );
        self.form = Some(form);
        self.report_form_view();
    }

    fn submit_visit(&mut self) {
        let user = self.location.state().settled_coordinate();
        let rejected = match self.form_or_notify() {
            Some(form) => form.submit(user).is_none(),
            None => return,
        };
        if rejected {
            self.report_submission();
        }
    }

    fn report_form_view(&mut self) {
        let Some(form) = self.form.as_ref() else {
            return;
        };
        let line = match form.view() {
            FormView::Checking => format!("Checking earlier visits to {}...", form.venue().name),
            FormView::AlreadyLogged(record) => format!(
                "You already logged a visit to {} today: {}.",
                form.venue().name,
                record.summary()
            ),
            FormView::Editable => form.distance_message(),
        };
        self.notify(line);
    }

    fn report_submission(&mut self) {
        let Some(form) = self.form.as_ref() else {
            return;
        };
        let line = match form.submit_state() {
            SubmitState::Succeeded(record) => {
                format!("Visit logged at {}: {}.", form.venue().name, record.summary())
            }
            SubmitState::Failed(e) => format!("Visit not logged: {e}"),
            SubmitState::Idle | SubmitState::Submitting => return,
        };
        self.notify(line);
    }

    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        let state = self.location.state();
        lines.push(match (state.loading, state.coordinate, &state.error) {
            (true, _, _) => "location: locating...".to_string(),
            (_, Some(c), _) => format!("location: {:.5}, {:.5}", c.latitude, c.longitude),
            (_, None, Some(error)) => format!("location: {error}"),
            (_, None, None) => "location: unknown".to_string(),
        });

        if let Some(center) = self.search.active_center() {
            lines.push(format!(
                "search center: {:.5}, {:.5} ({:?})",
                center.coordinate.latitude, center.coordinate.longitude, center.provenance
            ));
        }
        match self.search.status() {
            SearchStatus::Loading => lines.push("search: loading".to_string()),
            SearchStatus::Failed { message } => lines.push(format!("search: {message}")),
            SearchStatus::Idle => {}
        }
        if self.search.show_search_area() {
            lines.push("map: moved away, 'area' searches here".to_string());
        }

        for (i, venue) in self.search.markers().iter().enumerate() {
            let distance = venue
                .distance_km
                .map(|d| format!(" {d:.2}km"))
                .unwrap_or_default();
            let pinned = if self.search.pinned().is_some_and(|p| p.id == venue.id) {
                " [pinned]"
            } else {
                ""
            };
            lines.push(format!("{:>3}. {}{}{}", i + 1, venue.name, distance, pinned));
        }
        lines.extend(suggestion_lines(self.search.suggestions()));

        if let Some(form) = &self.form {
            lines.push(format!("form: {} ({})", form.venue().name, form.distance_message()));
        }
        lines
    }

    /// Tears every component down; late results are dropped from here on.
    pub fn shutdown(&mut self) {
        self.location.close();
        self.search.close();
        if let Some(mut form) = self.form.take() {
            form.close();
        }
    }
}

fn suggestion_lines(suggestions: &[SearchResult]) -> Vec<String> {
    suggestions
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let kind = match result {
                SearchResult::Venue(_) => "venue",
                SearchResult::Location(_) => "place",
            };
            format!("  ?{}. {} ({kind})", i + 1, result.name())
        })
        .collect()
}
