pub mod cli;
pub mod client;
pub mod discovery;
pub mod display;
pub mod error;
pub mod frame;
pub mod log_setup;
pub mod registry;
pub mod relay;
pub mod server;
