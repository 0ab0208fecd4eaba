//! Turnstile - Per-Client Admission Gate
//!
//! This crate implements a sliding-window request-rate limiter that sits in
//! front of an HTTP handler. Each client is identified by its peer address
//! (or by a forwarded header from an explicitly trusted proxy), and every
//! request is admitted or answered with `429 Too Many Requests` based on how
//! many calls that client made within the trailing window. State is held in
//! memory per process.

pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod ratelimit;
