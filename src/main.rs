use color_eyre::{eyre::WrapErr, Result};
use std::sync::Arc;
use tracing::{info, warn};
use wfc_scout::{
    api::ApiClient,
    app::{App, Services},
    camera::LoggingSurface,
    config::Config,
    events::{EventHandler, HELP},
    geo::Coordinate,
    location::{FixedPositionSource, IpPositionSource, PositionSource},
    logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Instrumentation and safety
    let _log_guard = logging::initialize_logging();
    color_eyre::install()?;

    let config = Config::load();
    let api = Arc::new(ApiClient::new(&config.api).wrap_err("could not build the HTTP client")?);
    let position = position_source(&config)?;

    let services = Services {
        search: api.clone(),
        visits: api.clone(),
        lookup: api,
        position,
    };

    let mut events = EventHandler::new();
    let mut app = App::new(&config, services, Box::new(LoggingSurface), events.tx.clone());
    events.spawn_console();
    app.start();

    println!("wfc-scout: locating you...");
    println!("{HELP}");

    // Main loop
    while !app.should_quit {
        let Some(event) = events.next().await else {
            break;
        };
        app.handle_event(event);
        for line in app.take_notices() {
            println!("{line}");
        }
    }

    app.shutdown();
    info!("Shut down cleanly");
    Ok(())
}

fn position_source(config: &Config) -> Result<Arc<dyn PositionSource>> {
    let location = &config.location;
    if location.auto_locate {
        info!("Using IP geolocation for the user's position");
        return Ok(Arc::new(IpPositionSource::new(location.lookup_ip.clone())));
    }

    match Coordinate::new(location.manual_lat, location.manual_lon) {
        Ok(coordinate) => {
            info!(
                "Using manual position ({}, {})",
                coordinate.latitude, coordinate.longitude
            );
            Ok(Arc::new(FixedPositionSource(coordinate)))
        }
        Err(e) => {
            warn!("Manual position in config.toml is invalid: {}", e);
            Err(e).wrap_err("check [location] manual_lat / manual_lon in config.toml")
        }
    }
}
