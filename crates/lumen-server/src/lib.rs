//! # lumen-server
//!
//! HTTP server library for the ESP32 LED controller.
//!
//! This library provides the API handlers, logging setup and state
//! management for lumen.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
