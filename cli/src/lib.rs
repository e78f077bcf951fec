//! ukpack CLI - Unikraft package manager.

pub mod commands;
pub mod output;
