//! MoltEthos - ERC-8004 registration worker and queue tools
//!
//! Wires `moltethos-core` adapters from configuration and exposes them as
//! the `moltethos` command line.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod context;
pub mod output;

pub use context::AppContext;
