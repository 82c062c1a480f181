//! Core types shared across the exchange engine.

pub mod config;
pub mod errors;
pub mod ids;
pub mod message;
