#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for shipyard.
//!
//! Pure helpers with no logging/tracing dependencies; the pipeline crate
//! does its own logging.

pub mod fs;
pub mod hash;
