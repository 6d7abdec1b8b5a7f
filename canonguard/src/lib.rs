// canonguard/src/lib.rs
//! # CanonGuard CLI
//!
//! Command-line front end for `canonguard-core`: runs the watch agent and offers
//! one-shot commands for inspecting documents and the template set.

pub mod cli;
pub mod commands;
pub mod logger;
pub mod output;
