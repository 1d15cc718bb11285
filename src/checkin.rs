//! Proximity gate for logging a visit.
//!
//! The decision is advisory: the visit service repeats the same check on
//! its side and its answer wins.

use crate::geo::{distance_km, Coordinate};

/// Furthest a user may be from a venue and still log a visit.
pub const MAX_CHECKIN_DISTANCE_KM: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceCheck {
    pub distance_km: f64,
    pub within_threshold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Denial {
    LocationUnavailable,
    TooFar(DistanceCheck),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckInDecision {
    Allowed(DistanceCheck),
    Denied(Denial),
}

impl CheckInDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CheckInDecision::Allowed(_))
    }

    /// Distance to the venue, when the user's position is known.
    pub fn distance_km(&self) -> Option<f64> {
        match self {
            CheckInDecision::Allowed(check) | CheckInDecision::Denied(Denial::TooFar(check)) => {
                Some(check.distance_km)
            }
            CheckInDecision::Denied(Denial::LocationUnavailable) => None,
        }
    }
}

/// "350 m" below a kilometre, "1.23km" above, matching the server's wording.
pub fn format_distance(km: f64) -> String {
    let meters = (km * 1000.0).round();
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{km:.2}km")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckInVerifier {
    max_distance_km: f64,
}

impl Default for CheckInVerifier {
    fn default() -> Self {
        Self::new(MAX_CHECKIN_DISTANCE_KM)
    }
}

impl CheckInVerifier {
    pub fn new(max_distance_km: f64) -> Self {
        Self { max_distance_km }
    }

    pub fn max_distance_km(&self) -> f64 {
        self.max_distance_km
    }

    pub fn check_distance(&self, user: &Coordinate, venue: &Coordinate) -> DistanceCheck {
        let distance_km = distance_km(user, venue);
        DistanceCheck {
            distance_km,
            within_threshold: distance_km <= self.max_distance_km,
        }
    }

    pub fn verify(&self, user: Option<Coordinate>, venue: Coordinate) -> CheckInDecision {
        let Some(user) = user else {
            return CheckInDecision::Denied(Denial::LocationUnavailable);
        };
        let check = self.check_distance(&user, &venue);
        if check.within_threshold {
            CheckInDecision::Allowed(check)
        } else {
            CheckInDecision::Denied(Denial::TooFar(check))
        }
    }

    /// Text shown next to the submit button.
    pub fn reason(&self, decision: &CheckInDecision, venue_name: &str) -> String {
        match decision {
            CheckInDecision::Allowed(check) => format!(
                "You are {} away from {}. You can log a visit.",
                format_distance(check.distance_km),
                venue_name
            ),
            CheckInDecision::Denied(Denial::TooFar(check)) => format!(
                "You are {} away from {}. You must be within {}km to log a visit.",
                format_distance(check.distance_km),
                venue_name,
                self.max_distance_km
            ),
            CheckInDecision::Denied(Denial::LocationUnavailable) => {
                "Location unavailable. Turn on location services to log a visit.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{coord, north_of};

    #[test]
    fn just_inside_the_limit_is_allowed() {
        let venue = coord(-6.2, 106.8);
        let decision = CheckInVerifier::default().verify(Some(north_of(venue, 999.0)), venue);
        assert!(decision.is_allowed());
        assert!((decision.distance_km().unwrap() - 0.999).abs() < 1e-6);
    }

    #[test]
    fn just_outside_the_limit_is_denied_for_distance() {
        let venue = coord(-6.2, 106.8);
        let decision = CheckInVerifier::default().verify(Some(north_of(venue, 1001.0)), venue);
        assert!(matches!(decision, CheckInDecision::Denied(Denial::TooFar(_))));
        assert_ne!(decision, CheckInDecision::Denied(Denial::LocationUnavailable));
    }

    #[test]
    fn missing_location_is_its_own_denial() {
        let decision = CheckInVerifier::default().verify(None, coord(-6.2, 106.8));
        assert_eq!(decision, CheckInDecision::Denied(Denial::LocationUnavailable));
        assert_eq!(decision.distance_km(), None);
    }

    #[test]
    fn distances_that_round_to_a_kilometre_switch_units() {
        assert_eq!(format_distance(0.9994), "999 m");
        assert_eq!(format_distance(0.9996), "1.00km");
        assert_eq!(format_distance(0.0), "0 m");
    }

    #[test]
    fn reasons_carry_graduated_distance() {
        let verifier = CheckInVerifier::default();
        let venue = coord(-6.2, 106.8);

        let near = verifier.verify(Some(north_of(venue, 350.0)), venue);
        assert_eq!(
            verifier.reason(&near, "Anomali"),
            "You are 350 m away from Anomali. You can log a visit."
        );

        let far = verifier.verify(Some(north_of(venue, 2400.0)), venue);
        assert_eq!(
            verifier.reason(&far, "Anomali"),
            "You are 2.40km away from Anomali. You must be within 1km to log a visit."
        );
    }
}
