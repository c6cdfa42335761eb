//! SIPI administrations ETL.
//!
//! Loads the organizational structure of the autonomous communities'
//! governments (and, where published, their office holders) from open-data
//! portals into the SIPI database:
//! - Extract: fetch and decode each region's CSV exports
//! - Transform: map regional columns and vocabularies onto envelopes
//! - Load: two-phase, single-transaction insert into PostgreSQL
//!
//! The `hierarchy` module keeps the administration tree acyclic and
//! temporally consistent for both the loader and manual maintenance.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod hierarchy;
pub mod load;
pub mod model;
pub mod regions;
pub mod run;
pub mod transform;

pub use error::{EtlError, Result};
