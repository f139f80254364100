//! Customer-side synchronization: transport, merged state, poll loop, push subscriber.

pub mod client;
pub mod push;
pub mod state;
pub mod transport;

pub use client::{PollHandle, PollResult, SyncClient, SyncUpdate};
pub use state::{ApplyOutcome, ChatMode, SyncState};
pub use transport::{ChatTransport, HttpTransport};
