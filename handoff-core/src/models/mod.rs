pub mod message;
pub mod session;
pub mod timestamp;

pub use message::{category, Message, Role, SyntheticMarker};
pub use session::{EndedBy, Session, SessionStatus};
