//! Location-aware venue discovery and visit check-in.
//!
//! Components talk to each other only through [`events::Event`]; the
//! [`app::App`] dispatcher owns them all and applies every event on one task.

pub mod api;
pub mod app;
pub mod camera;
pub mod checkin;
pub mod config;
pub mod debounce;
pub mod duplicate;
pub mod error;
pub mod events;
pub mod geo;
pub mod location;
pub mod logging;
pub mod models;
pub mod search;
pub mod visit;

#[cfg(test)]
mod testing;
