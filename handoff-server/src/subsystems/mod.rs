pub mod lifecycle;
pub mod maintenance;
pub mod message_log;
pub mod push;
