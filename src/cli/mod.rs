//! CLI module for the entity cache
//!
//! Provides subcommands:
//! - `demo`: runs a cached model end to end and prints its statistics

pub mod demo;

use clap::{Parser, Subcommand};

/// Entity cache - cache-aside data access for persistent models
#[derive(Parser)]
#[command(name = "entity-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create, list and update groups through the cache, then print statistics
    Demo(demo::DemoArgs),
}
