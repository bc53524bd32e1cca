//! Command line interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "biogate")]
#[command(version)]
#[command(about = "Biometric sensor operation scheduler")]
#[command(long_about = "Biometric sensor operation scheduler

Runs fingerprint operations against a simulated driver and prints the
provider state as JSON.

EXAMPLES:
    biogate demo                              Enroll, authenticate, crash, reconnect
    biogate demo --store templates.json       Keep templates across runs
    biogate demo --config provider.json       Use a custom provider configuration
    biogate dump-config                       Print the default configuration

ENVIRONMENT VARIABLES:
    RUST_LOG=debug         Enable debug logging")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the enroll, authenticate and reconnect flows on the mock driver
    Demo(DemoArgs),

    /// Print the default provider configuration as JSON
    DumpConfig,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Provider configuration file (JSON)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Template store file; in-memory when omitted
    #[arg(long, short)]
    pub store: Option<PathBuf>,

    /// Sensor definitions file (JSON array); one optical UDFPS when omitted
    #[arg(long)]
    pub sensors: Option<PathBuf>,

    /// User to enroll and authenticate
    #[arg(long, default_value_t = 0)]
    pub user: u32,
}
