pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod error;
pub mod exposition;
pub mod logging;
pub mod mapping;
pub mod metrics;
pub mod pipeline;
pub mod push;
pub mod query;
pub mod record;
pub mod server;
