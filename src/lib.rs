//! murmur: posts, follows and fan-out materialized feeds over interchangeable
//! storage backends.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;
