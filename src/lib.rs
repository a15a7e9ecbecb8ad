pub mod blinds;
pub mod configuration;
pub mod display;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod session;
