//! Core types for the scheduler.
//!
//! - [`id`]: identifier and time types (`TaskId`, `Time`)

pub mod id;

pub use id::{TaskId, Time};
