//! kioskhub - session lifecycle and multi-device presence coordinator
//!
//! Tracks which devices are signed in for each identity, hands sessions
//! over to new devices by short code, and delivers force actions through
//! the heartbeat.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
