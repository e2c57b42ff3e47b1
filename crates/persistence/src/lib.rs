//! Persistence layer for the enrollment service.
//!
//! This crate contains:
//! - Database connection management and schema migrations
//! - Entity definitions (database row mappings)
//! - Repository implementations for the enroll/unenroll lifecycle
//! - The Redis write-through cache backing status lookups and Retry-After
//!   hints

pub mod cache;
pub mod db;
pub mod entities;
pub mod repositories;
