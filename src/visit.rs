//! The visit-submission form.
//!
//! Opening the form starts a duplicate check; the check-in decision is
//! recomputed every time the user's position changes so the form can show
//! how far away they are. Submission outcomes, including local
//! rejections, all land in [`SubmitState`], which is the one place the
//! caller reads to report success or failure.

use crate::api::{VisitLookupService, VisitService};
use crate::checkin::{CheckInDecision, CheckInVerifier, Denial};
use crate::debounce::{RequestSlot, RequestToken};
use crate::duplicate::{DuplicateState, DuplicateVisitDetector};
use crate::error::{LookupError, VisitError};
use crate::events::Event;
use crate::geo::Coordinate;
use crate::models::{ReviewPayload, Venue, VisitDraft, VisitRecord, VisitTime};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const MAX_COMMENT_CHARS: usize = 160;

/// Backend handles the form needs, shared across form instances.
#[derive(Clone)]
pub struct VisitServices {
    pub lookup: Arc<dyn VisitLookupService>,
    pub visits: Arc<dyn VisitService>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormView {
    /// Waiting for the duplicate lookup.
    Checking,
    /// A visit was already logged today; shows its summary, no submission.
    AlreadyLogged(VisitRecord),
    Editable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitState {
    Idle,
    Submitting,
    Succeeded(VisitRecord),
    Failed(VisitError),
}

pub struct VisitForm {
    venue: Venue,
    visit_date: NaiveDate,
    verifier: CheckInVerifier,
    detector: DuplicateVisitDetector,
    visits: Arc<dyn VisitService>,
    tx: UnboundedSender<Event>,
    submission: RequestSlot,
    decision: CheckInDecision,
    submit: SubmitState,

    pub amount_spent: Option<f64>,
    pub currency: Option<String>,
    pub visit_time: Option<VisitTime>,
    pub review: Option<ReviewPayload>,
}

impl VisitForm {
    /// Opens the form for `venue` on the user's local date `today`.
    pub fn open(
        venue: Venue,
        today: NaiveDate,
        user: Option<Coordinate>,
        verifier: CheckInVerifier,
        services: &VisitServices,
        tx: UnboundedSender<Event>,
    ) -> Self {
        let mut detector = DuplicateVisitDetector::new(Arc::clone(&services.lookup), tx.clone());
        detector.open(&venue, today);
        let decision = verifier.verify(user, venue.coordinate);

        Self {
            venue,
            visit_date: today,
            verifier,
            detector,
            visits: Arc::clone(&services.visits),
            tx,
            submission: RequestSlot::new(),
            decision,
            submit: SubmitState::Idle,
            amount_spent: None,
            currency: None,
            visit_time: None,
            review: None,
        }
    }

    pub fn venue(&self) -> &Venue {
        &self.venue
    }

    pub fn view(&self) -> FormView {
        match self.detector.state() {
            DuplicateState::Idle | DuplicateState::Checking => FormView::Checking,
            DuplicateState::DuplicateFound(record) => FormView::AlreadyLogged(record.clone()),
            DuplicateState::Clear => FormView::Editable,
        }
    }

    pub fn decision(&self) -> &CheckInDecision {
        &self.decision
    }

    pub fn distance_message(&self) -> String {
        self.verifier.reason(&self.decision, &self.venue.name)
    }

    pub fn submit_state(&self) -> &SubmitState {
        &self.submit
    }

    pub fn can_submit(&self) -> bool {
        self.detector.allows_submission()
            && self.decision.is_allowed()
            && self.submit != SubmitState::Submitting
    }

    /// Live position updates; `None` when the position was lost.
    pub fn update_position(&mut self, user: Option<Coordinate>) {
        self.decision = self.verifier.verify(user, self.venue.coordinate);
    }

    pub fn apply_duplicate_check(
        &mut self,
        token: RequestToken,
        outcome: Result<Vec<VisitRecord>, LookupError>,
    ) -> bool {
        self.detector.apply(token, outcome)
    }

    /// Validates and sends the visit, using `user` as the check-in position.
    /// Returns the request token when a request was actually sent; local
    /// rejections are recorded in [`submit_state`](Self::submit_state).
    pub fn submit(&mut self, user: Option<Coordinate>) -> Option<RequestToken> {
        match self.prepare(user) {
            Ok(draft) => {
                self.submit = SubmitState::Submitting;
                let visits = Arc::clone(&self.visits);
                let tx = self.tx.clone();
                let token = self.submission.launch(move |token| async move {
                    let outcome = visits.create_visit(&draft).await;
                    tx.send(Event::VisitSubmitted { token, outcome }).ok();
                });
                info!("Submitting visit to {}", self.venue.name);
                Some(token)
            }
            Err(e) => {
                debug!("Visit rejected before submission: {}", e);
                self.submit = SubmitState::Failed(e);
                None
            }
        }
    }

    fn prepare(&mut self, user: Option<Coordinate>) -> Result<VisitDraft, VisitError> {
        match self.detector.state() {
            DuplicateState::DuplicateFound(_) => {
                return Err(VisitError::DuplicateVisit(
                    "You already logged a visit to this venue today.".to_string(),
                ))
            }
            DuplicateState::Idle | DuplicateState::Checking => {
                return Err(VisitError::Field {
                    field: "visit_date".to_string(),
                    message: "Still checking for an earlier visit today.".to_string(),
                })
            }
            DuplicateState::Clear => {}
        }
        if self.submit == SubmitState::Submitting {
            return Err(VisitError::Field {
                field: "non_field_errors".to_string(),
                message: "This visit is already being submitted.".to_string(),
            });
        }

        self.update_position(user);
        let check_in = match (&self.decision, user) {
            (CheckInDecision::Allowed(_), Some(user)) => user,
            (CheckInDecision::Denied(Denial::TooFar(_)), _) => {
                return Err(VisitError::DistanceMismatch(self.distance_message()))
            }
            _ => return Err(VisitError::LocationUnavailable),
        };

        validate_amount(self.amount_spent, self.currency.as_deref())?;
        if let Some(review) = &self.review {
            validate_review(review)?;
        }

        Ok(VisitDraft {
            venue: self.venue.clone(),
            check_in,
            visit_date: self.visit_date,
            amount_spent: self.amount_spent,
            currency: self.currency.clone(),
            visit_time: self.visit_time,
            review: self.review.clone(),
        })
    }

    pub fn apply_submission(
        &mut self,
        token: RequestToken,
        outcome: Result<VisitRecord, VisitError>,
    ) -> bool {
        if !self.submission.settle(token) {
            debug!("Discarding stale visit submission outcome");
            return false;
        }
        self.submit = match outcome {
            Ok(record) => {
                info!("Visit {} logged at {}", record.id, self.venue.name);
                SubmitState::Succeeded(record)
            }
            Err(e) if e.is_cancelled() => SubmitState::Idle,
            Err(e) => {
                warn!("Visit submission rejected: {}", e);
                SubmitState::Failed(e)
            }
        };
        true
    }

    /// Closes the form; outstanding lookups and submissions are dropped.
    pub fn close(&mut self) {
        self.detector.close();
        self.submission.cancel();
    }
}

fn validate_amount(amount: Option<f64>, currency: Option<&str>) -> Result<(), VisitError> {
    if let Some(amount) = amount {
        if !amount.is_finite() || amount < 0.0 {
            return Err(VisitError::Field {
                field: "amount_spent".to_string(),
                message: "Amount spent must be zero or more.".to_string(),
            });
        }
    }
    if let Some(currency) = currency {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(VisitError::Field {
                field: "currency".to_string(),
                message: "Currency must be a three-letter code such as IDR.".to_string(),
            });
        }
    }
    Ok(())
}

/// Mirrors the backend's review rules so obvious mistakes never leave the
/// device.
pub fn validate_review(review: &ReviewPayload) -> Result<(), VisitError> {
    if review.wfc_rating.is_none() {
        return Err(VisitError::RatingRange {
            field: "wfc_rating".to_string(),
            message: "Overall WFC rating is required when adding a review.".to_string(),
        });
    }

    let ratings = [
        ("wfc_rating", review.wfc_rating),
        ("wifi_quality", review.wifi_quality),
        ("power_outlets_rating", review.power_outlets_rating),
        ("seating_comfort", review.seating_comfort),
        ("noise_level", review.noise_level),
    ];
    for (field, value) in ratings {
        if let Some(v) = value {
            if !(1..=5).contains(&v) {
                return Err(VisitError::RatingRange {
                    field: field.to_string(),
                    message: "Ratings must be between 1 and 5.".to_string(),
                });
            }
        }
    }

    if let Some(comment) = &review.comment {
        if comment.chars().count() > MAX_COMMENT_CHARS {
            return Err(VisitError::Field {
                field: "comment".to_string(),
                message: format!("Ensure this field has no more than {MAX_COMMENT_CHARS} characters."),
            });
        }
    }
    Ok(())
}
