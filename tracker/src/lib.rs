//! Tracker backend: live-state reconciliation between a simulated and a
//! hardware telemetry source, durable history and an authenticated API.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod live;
pub mod metrics;
pub mod model;
pub mod packet_log;
pub mod rest;
pub mod session;
pub mod simulator;
pub mod validate;
