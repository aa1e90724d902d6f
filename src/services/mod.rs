pub mod alerts;
pub mod encoder;
pub mod guard;
pub mod metadata;
pub mod metrics;
pub mod orchestrator;
pub mod priority;
pub mod streams;
pub mod thumbnail;
pub mod tools;
