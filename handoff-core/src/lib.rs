pub mod clock;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod wire;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HandoffConfig;
pub use dedup::{DedupKey, MergeReport, MessageLog};
pub use error::{HandoffError, Result};
pub use models::{EndedBy, Message, Role, Session, SessionStatus, SyntheticMarker};
pub use store::{ChatStore, InsertResult};
