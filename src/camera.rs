//! Camera control for the map surface.
//!
//! The coordinator only ever moves the camera in response to a change of
//! the active [`SearchCenter`]. The user's own drags never come through
//! here, so an animation cannot fight a gesture in progress.

use crate::debounce::Debouncer;
use crate::events::Event;
use crate::geo::Coordinate;
use crate::models::SearchCenter;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct CameraCommand {
    pub center: Coordinate,
    pub zoom: f64,
    pub animate: bool,
    pub duration: Duration,
}

/// The rendering surface. Move-end events travel the other way, as
/// [`Event::MapMoved`].
pub trait MapSurface: Send {
    fn apply(&mut self, command: &CameraCommand);
}

/// Surface for headless runs: records camera moves in the log.
pub struct LoggingSurface;

impl MapSurface for LoggingSurface {
    fn apply(&mut self, command: &CameraCommand) {
        info!(
            "Camera -> ({:.5}, {:.5}) zoom {} over {:?}",
            command.center.latitude, command.center.longitude, command.zoom, command.duration
        );
    }
}

pub struct CameraCoordinator {
    surface: Box<dyn MapSurface>,
    tx: UnboundedSender<Event>,
    zoom: f64,
    fly_duration: Duration,
    cooldown: Debouncer,
    last: Option<(u64, SearchCenter)>,
    generation: u64,
    flying: bool,
}

impl CameraCoordinator {
    pub fn new(
        surface: Box<dyn MapSurface>,
        tx: UnboundedSender<Event>,
        zoom: f64,
        fly_duration: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            surface,
            tx,
            zoom,
            fly_duration,
            cooldown: Debouncer::new(cooldown),
            last: None,
            generation: 0,
            flying: false,
        }
    }

    /// Flies to `center` unless this confirmation was already flown to.
    /// `confirmation` increases with every confirmed search action, so a
    /// repeated recenter on the same fix still moves the camera while a
    /// plain re-render does not. Safe to call after every state change.
    pub fn follow(&mut self, center: Option<SearchCenter>, confirmation: u64) -> bool {
        let Some(center) = center else {
            return false;
        };
        if self.last == Some((confirmation, center)) {
            return false;
        }
        self.last = Some((confirmation, center));
        self.generation += 1;
        self.flying = true;

        let command = CameraCommand {
            center: center.coordinate,
            zoom: self.zoom,
            animate: true,
            duration: self.fly_duration,
        };
        debug!("Flying camera for {:?} center", center.provenance);
        self.surface.apply(&command);

        let generation = self.generation;
        let tx = self.tx.clone();
        self.cooldown.trigger(move || {
            tx.send(Event::FlyExpired { generation }).ok();
        });
        true
    }

    /// Clears the fly flag once the cool-down of the latest fly elapses.
    pub fn on_fly_expired(&mut self, generation: u64) {
        if generation == self.generation {
            self.flying = false;
        }
    }

    /// Tracks zoom changes made by the user so the next fly keeps them.
    pub fn on_zoom_changed(&mut self, zoom: f64) {
        self.zoom = zoom;
    }

    pub fn is_flying(&self) -> bool {
        self.flying
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn last_center(&self) -> Option<SearchCenter> {
        self.last.map(|(_, center)| center)
    }
}
