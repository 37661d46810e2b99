mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::Database;
pub use models::{EventKind, MeasurementEvent, PingEvent, Player};
pub use repositories::measurements::RECOVERED_NOTE;
