//! # bcnstat Common Library
//!
//! Shared code for the bcnstat data integration workspace including:
//! - Database schema, models and migrations
//! - Period (year/quarter) types and raw-period parsing
//! - Geometry primitives (points, polygons, bounding boxes)
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod period;

pub use error::{Error, Result};
pub use period::{Period, Quarter};
