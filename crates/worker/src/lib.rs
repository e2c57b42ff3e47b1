//! Worker for the device enrollment pipeline.
//!
//! Drains the `pending_enroll` queue (CA certificate issuance, device
//! deletes) and the `pending_registration` queue (DSTS device
//! registration), publishing outcomes back to the front over the
//! `enrolled` and `enroll_error` queues.

pub mod clients;
pub mod config;
pub mod http;
pub mod subscribers;
