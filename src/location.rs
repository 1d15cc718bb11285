//! User position acquisition.
//!
//! [`GeolocationProvider`] owns a single subscription to a
//! [`PositionSource`] and folds its fixes and failures into a
//! [`GeolocationState`]. Fixes travel through the event loop as
//! [`Event::PositionFix`] tagged with the subscription's token, so a fix
//! that arrives after a refetch or after teardown is dropped on apply.
//!
//! The built-in sources are IP geolocation (via `ipgeolocate`) and a fixed
//! coordinate for manually configured locations.

use crate::debounce::{RequestSlot, RequestToken};
use crate::error::PositionError;
use crate::events::Event;
use crate::geo::Coordinate;
use async_trait::async_trait;
use ipgeolocate::{Locator, Service};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// The platform position API.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self) -> Result<Coordinate, PositionError>;
}

/// Resolves the user's approximate location via IP geolocation.
///
/// Uses the [IpApi](https://ip-api.com/) service. An empty `ip` asks the
/// service about the caller's own public address.
pub struct IpPositionSource {
    ip: String,
}

impl IpPositionSource {
    pub fn new(ip: impl Into<String>) -> Self {
        Self { ip: ip.into() }
    }
}

#[async_trait]
impl PositionSource for IpPositionSource {
    async fn current_position(&self) -> Result<Coordinate, PositionError> {
        let loc = Locator::get(&self.ip, Service::IpApi)
            .await
            .map_err(|e| PositionError::Unavailable(e.to_string()))?;

        let lat = loc.latitude.parse::<f64>();
        let lon = loc.longitude.parse::<f64>();
        match (lat, lon) {
            (Ok(lat), Ok(lon)) => {
                let coordinate = Coordinate::new(lat, lon)
                    .map_err(|e| PositionError::Unavailable(e.to_string()))?;
                info!("Geolocation successful - ({}, {})", lat, lon);
                Ok(coordinate)
            }
            _ => Err(PositionError::Unavailable(format!(
                "unparsable position '{}', '{}'",
                loc.latitude, loc.longitude
            ))),
        }
    }
}

/// Always reports the same coordinate. Backs the manual location setting.
pub struct FixedPositionSource(pub Coordinate);

#[async_trait]
impl PositionSource for FixedPositionSource {
    async fn current_position(&self) -> Result<Coordinate, PositionError> {
        Ok(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Once,
    Every(Duration),
}

/// What the provider currently knows. While `loading` is set, neither
/// `coordinate` nor `error` should be trusted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeolocationState {
    pub coordinate: Option<Coordinate>,
    pub error: Option<String>,
    pub loading: bool,
}

impl GeolocationState {
    /// The coordinate, but only once acquisition has settled.
    pub fn settled_coordinate(&self) -> Option<Coordinate> {
        if self.loading {
            None
        } else {
            self.coordinate
        }
    }
}

pub struct GeolocationProvider {
    source: Arc<dyn PositionSource>,
    tx: UnboundedSender<Event>,
    mode: WatchMode,
    state: GeolocationState,
    subscription: RequestSlot,
    closed: bool,
}

impl GeolocationProvider {
    pub fn new(source: Arc<dyn PositionSource>, tx: UnboundedSender<Event>, mode: WatchMode) -> Self {
        Self {
            source,
            tx,
            mode,
            state: GeolocationState::default(),
            subscription: RequestSlot::new(),
            closed: false,
        }
    }

    pub fn state(&self) -> &GeolocationState {
        &self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_in_flight()
    }

    /// Begins acquisition. Calling it again behaves like [`refetch`](Self::refetch).
    pub fn start(&mut self) -> bool {
        self.refetch()
    }

    /// Drops the current subscription and acquires a fresh one, clearing
    /// any previous error. Does nothing once the provider is closed.
    pub fn refetch(&mut self) -> bool {
        if self.closed {
            debug!("Ignoring geolocation refetch after close");
            return false;
        }
        self.state.loading = true;
        self.state.error = None;

        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        let mode = self.mode;
        self.subscription.launch(move |token| async move {
            loop {
                let outcome = source.current_position().await;
                // Permission problems need the user; don't poll through them.
                let stop = matches!(
                    outcome,
                    Err(PositionError::PermissionDenied) | Err(PositionError::Unsupported)
                );
                if tx.send(Event::PositionFix { token, outcome }).is_err() {
                    break;
                }
                match mode {
                    WatchMode::Every(interval) if !stop => tokio::time::sleep(interval).await,
                    _ => break,
                }
            }
        });
        true
    }

    /// Applies a fix reported by the subscription task. Returns `false`
    /// when the fix belongs to a subscription that has since been replaced
    /// or closed.
    pub fn apply(&mut self, token: RequestToken, outcome: Result<Coordinate, PositionError>) -> bool {
        let current = match self.mode {
            WatchMode::Once => self.subscription.settle(token),
            WatchMode::Every(_) => match &outcome {
                Err(PositionError::PermissionDenied) | Err(PositionError::Unsupported) => {
                    self.subscription.settle(token)
                }
                _ => self.subscription.is_live(token),
            },
        };
        if !current {
            debug!("Discarding position fix from a stale subscription");
            return false;
        }

        match outcome {
            Ok(coordinate) => {
                self.state = GeolocationState {
                    coordinate: Some(coordinate),
                    error: None,
                    loading: false,
                };
            }
            Err(e) => {
                warn!("Geolocation failed: {}", e);
                self.state = GeolocationState {
                    coordinate: None,
                    error: Some(e.user_message()),
                    loading: false,
                };
            }
        }
        true
    }

    /// Releases the subscription. Pending fixes are ignored from here on.
    pub fn close(&mut self) {
        self.closed = true;
        self.subscription.cancel();
        self.state.loading = false;
    }
}
