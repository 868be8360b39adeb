pub mod attributes;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod extract;
pub mod handler;
pub mod hooks;
pub mod lifecycle;
pub mod locked_map;
pub mod model;
pub mod payload;
pub mod replay;
pub mod router;
pub mod run_tracer;
pub mod serialize;
pub mod span;
pub mod stream;
pub mod sweep;
pub mod telemetry;
