#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod bundler;
pub mod codes;
pub mod config;
pub mod error;

pub use bundler::{BuildReport, Pipeline, Warning};
pub use config::{BuildConfig, Mode};
pub use error::{BuildError, ConfigError, EmitError};
