//! Domain models for the enrollment service.
//!
//! Contains the record and status types shared by the front service and the
//! worker, the queue message payloads, and the policy data model.

pub mod models;
