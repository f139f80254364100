pub mod http;
pub mod subsystems;

pub use subsystems::lifecycle::SessionManager;
pub use subsystems::push::{BroadcastHub, PushChannel, RecordingPush, Topic};
