pub mod attendance;
pub mod core;
pub mod sessions;
pub mod setup;
