#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths, unreachable_pub)]
// #![warn(clippy::pedantic)]
// #![warn(clippy::restriction)]
// #![warn(clippy::cargo)]
#![warn(
    missing_docs,
    clippy::doc_link_with_quotes,
    clippy::doc_markdown,
    clippy::missing_errors_doc
)]
// #![allow(clippy::module_name_repetitions)]
// #![allow(clippy::single_call_fn)]
// #![allow(clippy::implicit_return)]
// #![allow(clippy::std_instead_of_core)]
// #![allow(clippy::float_arithmetic)]
// #![allow(clippy::question_mark_used)]
// #![allow(clippy::pattern_type_mismatch)]
// #![allow(clippy::multiple_unsafe_ops_per_block)]
// #![allow(clippy::absolute_paths)]
// #![allow(clippy::needless_pass_by_value)]
// #![allow(clippy::missing_trait_methods)]

pub mod api;
pub mod audit;
pub mod config;
pub mod diff;
pub mod errors;
pub mod handle;
pub mod http_client;
pub mod kafka;
pub mod keycloak;
pub mod logging;
pub mod metrics;
mod notify;
pub mod orchestrator;
pub mod retention;
pub mod scram;
mod signal;
pub mod state;
mod util;
mod watchdog;
pub mod webhook;

pub use self::{
    config::{AppConfig, ConfigError},
    errors::AppError,
    handle::{Handle, HandleError},
    state::AppState,
};
