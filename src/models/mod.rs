pub mod annotation;
pub mod sample;
pub mod session;

pub use annotation::Annotation;
pub use sample::Sample;
pub use session::{Session, SessionStatus};
