//! Admin HTTP surface
//!
//! Thin JSON glue over the queue controller; no queue logic lives here.

pub mod api;

pub use api::router;
