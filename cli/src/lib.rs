//! Asset bundle CLI - write, inspect and process asset bundles.

pub mod commands;
pub mod output;
