pub mod measurement;
pub mod player;

pub use measurement::{EventKind, MeasurementEvent, PingEvent};
pub use player::Player;
