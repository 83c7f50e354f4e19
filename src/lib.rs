pub mod analyzers;
pub mod backup;
pub mod classify;
pub mod config;
pub mod downtime;
pub mod error;
pub mod fetch;
pub mod mapping;
pub mod model;
pub mod output;
pub mod parser;
pub mod recorder;
pub mod store;
