//! Event types and the event loop driver.
//!
//! Every component hands its asynchronous work to a background task, and
//! each task reports back through one [`Event`] channel. The main loop in
//! `main.rs` receives events via [`EventHandler::next`] and hands them to
//! [`App::handle_event`](crate::app::App::handle_event), so all state
//! changes happen on one task in arrival order.

use crate::debounce::RequestToken;
use crate::error::{LookupError, PositionError, SearchError, VisitError};
use crate::geo::Coordinate;
use crate::models::{SearchPage, SearchResult, VisitRecord, VisitTime};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Events processed by the application event loop.
#[derive(Debug)]
pub enum Event {
    /// A console command from the user.
    Input(Command),
    /// A console line that did not parse.
    BadInput(String),
    /// A position fix (or failure) from the geolocation subscription.
    PositionFix {
        token: RequestToken,
        outcome: Result<Coordinate, PositionError>,
    },
    /// Raw move-end from the map surface.
    MapMoved(Coordinate),
    /// The map stopped moving for the debounce window.
    MapSettled(Coordinate),
    /// The text query stopped changing for the debounce window.
    QuerySettled(String),
    SearchFinished {
        token: RequestToken,
        outcome: Result<SearchPage, SearchError>,
    },
    SuggestionsFinished {
        token: RequestToken,
        outcome: Result<Vec<SearchResult>, SearchError>,
    },
    /// The camera cool-down of fly number `generation` elapsed.
    FlyExpired { generation: u64 },
    DuplicateChecked {
        token: RequestToken,
        outcome: Result<Vec<VisitRecord>, LookupError>,
    },
    VisitSubmitted {
        token: RequestToken,
        outcome: Result<VisitRecord, VisitError>,
    },
}

/// Console commands understood by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `move <lat> <lon>`: the user dragged the map.
    Move(Coordinate),
    /// `zoom <level>`
    Zoom(f64),
    /// `area`: search this area.
    SearchArea,
    Recenter,
    Retry,
    /// `query <text>`; an empty text clears the query.
    Query(String),
    /// `pick <n>`: select the n-th suggestion (1-based).
    Pick(usize),
    /// `open <n>`: open the visit form for the n-th venue marker (1-based).
    Open(usize),
    /// `spent <amount> [currency]`
    Spent { amount: f64, currency: Option<String> },
    /// `time morning|afternoon|evening`
    Time(VisitTime),
    /// `review <rating> [comment]`
    Review { rating: u8, comment: Option<String> },
    /// `visit`: submit the open form.
    Visit,
    CloseForm,
    Refetch,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("{0}")]
    Invalid(String),
}

pub const HELP: &str = "commands: move <lat> <lon> | zoom <level> | area | recenter | retry | \
query <text> | pick <n> | open <n> | spent <amount> [currency] | \
time morning|afternoon|evening | review <1-5> [comment] | visit | close | refetch | status | quit";

fn parse_index(arg: Option<&str>, usage: &'static str) -> Result<usize, CommandError> {
    match arg.map(str::parse::<usize>) {
        Some(Ok(n)) if n > 0 => Ok(n),
        _ => Err(CommandError::Usage(usage)),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();

        let command = match word.to_ascii_lowercase().as_str() {
            "move" => {
                let usage = "move <lat> <lon>";
                let lat = args.next().and_then(|a| a.parse().ok());
                let lon = args.next().and_then(|a| a.parse().ok());
                let (Some(lat), Some(lon)) = (lat, lon) else {
                    return Err(CommandError::Usage(usage));
                };
                let coordinate =
                    Coordinate::new(lat, lon).map_err(|e| CommandError::Invalid(e.to_string()))?;
                Command::Move(coordinate)
            }
            "zoom" => match args.next().map(str::parse::<f64>) {
                Some(Ok(level)) if level.is_finite() => Command::Zoom(level),
                _ => return Err(CommandError::Usage("zoom <level>")),
            },
            "area" => Command::SearchArea,
            "recenter" => Command::Recenter,
            "retry" => Command::Retry,
            "query" => Command::Query(rest.to_string()),
            "pick" => Command::Pick(parse_index(args.next(), "pick <n>")?),
            "open" => Command::Open(parse_index(args.next(), "open <n>")?),
            "spent" => {
                let usage = "spent <amount> [currency]";
                let amount = match args.next().map(str::parse::<f64>) {
                    Some(Ok(amount)) => amount,
                    _ => return Err(CommandError::Usage(usage)),
                };
                Command::Spent {
                    amount,
                    currency: args.next().map(str::to_ascii_uppercase),
                }
            }
            "time" => match args.next() {
                Some("morning") => Command::Time(VisitTime::Morning),
                Some("afternoon") => Command::Time(VisitTime::Afternoon),
                Some("evening") => Command::Time(VisitTime::Evening),
                _ => return Err(CommandError::Usage("time morning|afternoon|evening")),
            },
            "review" => {
                let usage = "review <1-5> [comment]";
                let (rating, comment) = match rest.split_once(char::is_whitespace) {
                    Some((rating, comment)) => (rating, Some(comment.trim().to_string())),
                    None => (rest, None),
                };
                let rating = rating.parse().map_err(|_| CommandError::Usage(usage))?;
                Command::Review { rating, comment }
            }
            "visit" => Command::Visit,
            "close" => Command::CloseForm,
            "refetch" => Command::Refetch,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Owns the event channel.
///
/// The sender ([`tx`](EventHandler::tx)) is cloned into every component
/// that runs background work, while the receiver is consumed by
/// [`next`](EventHandler::next) in the main loop.
pub struct EventHandler {
    pub tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Spawns the task that turns stdin lines into [`Event::Input`]. End of
    /// input or a read error is reported as [`Command::Quit`].
    pub fn spawn_console(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let event = match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match line.parse::<Command>() {
                        Ok(command) => Event::Input(command),
                        Err(e) => Event::BadInput(e.to_string()),
                    },
                    Ok(None) | Err(_) => {
                        debug!("Console input closed");
                        tx.send(Event::Input(Command::Quit)).ok();
                        break;
                    }
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
    }

    /// Receives the next event. Returns `None` when every sender is gone,
    /// which cannot happen while the handler itself holds `tx`.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
