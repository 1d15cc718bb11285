//! Same-day duplicate visit detection.
//!
//! Runs once per form open and is never cached: the calendar day can roll
//! over between opens. A failed lookup counts as "no duplicate" since the
//! backend enforces uniqueness on its own.

use crate::api::VisitLookupService;
use crate::debounce::{RequestSlot, RequestToken};
use crate::error::LookupError;
use crate::events::Event;
use crate::models::{Venue, VisitRecord};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateState {
    Idle,
    Checking,
    DuplicateFound(VisitRecord),
    Clear,
}

pub struct DuplicateVisitDetector {
    service: Arc<dyn VisitLookupService>,
    tx: UnboundedSender<Event>,
    lookup: RequestSlot,
    state: DuplicateState,
}

impl DuplicateVisitDetector {
    pub fn new(service: Arc<dyn VisitLookupService>, tx: UnboundedSender<Event>) -> Self {
        Self {
            service,
            tx,
            lookup: RequestSlot::new(),
            state: DuplicateState::Idle,
        }
    }

    pub fn state(&self) -> &DuplicateState {
        &self.state
    }

    pub fn allows_submission(&self) -> bool {
        self.state == DuplicateState::Clear
    }

    /// Starts the check for `venue` on `today` (the user's local date).
    /// Unregistered venues cannot have earlier visits and clear at once.
    pub fn open(&mut self, venue: &Venue, today: NaiveDate) {
        let Some(venue_id) = venue.registered_id() else {
            self.lookup.cancel();
            self.state = DuplicateState::Clear;
            return;
        };

        self.state = DuplicateState::Checking;
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        let venue_id = venue_id.to_string();
        self.lookup.launch(move |token| async move {
            let outcome = service.list_visits(&venue_id, today).await;
            tx.send(Event::DuplicateChecked { token, outcome }).ok();
        });
    }

    pub fn apply(
        &mut self,
        token: RequestToken,
        outcome: Result<Vec<VisitRecord>, LookupError>,
    ) -> bool {
        if !self.lookup.settle(token) {
            debug!("Discarding stale duplicate-visit lookup");
            return false;
        }

        self.state = match outcome {
            Ok(visits) => match visits.into_iter().next() {
                Some(existing) => DuplicateState::DuplicateFound(existing),
                None => DuplicateState::Clear,
            },
            Err(e) => {
                warn!("Duplicate visit check failed, allowing submission: {}", e);
                DuplicateState::Clear
            }
        };
        true
    }

    pub fn close(&mut self) {
        self.lookup.cancel();
        self.state = DuplicateState::Idle;
    }
}
