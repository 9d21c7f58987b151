// Library interface for edclient
// The binary in main.rs and the integration tests drive these modules

pub mod config;
pub mod connect;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod signal;
pub mod terminal;
pub mod transport;
