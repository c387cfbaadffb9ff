pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod model;
pub mod producer;
pub mod queue;
pub mod store;
pub mod strings;
