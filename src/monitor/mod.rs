pub mod commands;
pub mod controller;
pub mod live;
pub mod loop_worker;
pub mod state;
pub mod window;

pub use controller::{LiveFrame, SessionController};
pub use live::LiveMonitor;
pub use state::SessionState;
pub use window::RollingWindow;
