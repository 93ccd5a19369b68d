use std::path::PathBuf;

use clap::Parser;

/// Plexus LLM request router
#[derive(Debug, Parser)]
#[command(name = "plexus", about = "Multi-provider LLM request router")]
pub struct Args {
    /// Path to the user configuration file
    #[arg(short, long, default_value = "plexus.toml", env = "PLEXUS_CONFIG")]
    pub config: PathBuf,

    /// Path to the system configuration file (built-ins when absent)
    #[arg(long, env = "PLEXUS_SYSTEM_CONFIG")]
    pub system_config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(short, long, env = "PLEXUS_PORT")]
    pub port: Option<u16>,

    /// Where to write the pipeline-table artifact
    #[arg(long, default_value = "plexus-pipelines.json", env = "PLEXUS_PIPELINE_TABLE")]
    pub pipeline_table: PathBuf,
}
