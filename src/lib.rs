pub mod api;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod node;
pub mod shutdown;
pub mod worker;
