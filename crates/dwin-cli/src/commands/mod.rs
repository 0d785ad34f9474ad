//! CLI subcommands.

pub mod simulate;
pub mod validate;
