//! Command line and environment configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::capabilities::Capabilities;
use crate::fallback::{
    LocalExecutor, LocalLimits, DEFAULT_MEMORY_MIB, DEFAULT_PYTHON, DEFAULT_TIMEOUT_SECS,
};
use crate::sandbox::{DaytonaConfig, DEFAULT_API_URL, DEFAULT_IMAGE};

#[derive(Parser, Debug)]
#[command(name = "exec-relay")]
#[command(about = "Code execution relay with a remote sandbox and a restricted local fallback")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),

    /// Run a script through the local fallback interpreter
    Run {
        /// Python source file
        file: PathBuf,

        #[command(flatten)]
        local: LocalArgs,
    },
}

/// Settings of the local fallback interpreter.
#[derive(clap::Args, Debug, Clone)]
pub struct LocalArgs {
    /// Python interpreter used for local runs
    #[arg(long, env = "LOCAL_PYTHON", default_value = DEFAULT_PYTHON)]
    pub local_python: PathBuf,

    /// Wall clock limit per local run
    #[arg(long, env = "LOCAL_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub local_timeout_secs: u64,

    /// Address space limit per local run, in MiB
    #[arg(long, env = "LOCAL_MEMORY_MIB", default_value_t = DEFAULT_MEMORY_MIB)]
    pub local_memory_mib: u64,
}

impl LocalArgs {
    pub fn executor(&self) -> LocalExecutor {
        LocalExecutor::new(
            Capabilities::standard(),
            LocalLimits::new(self.local_timeout_secs, self.local_memory_mib),
        )
        .with_python(&self.local_python)
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8001)]
    pub port: u16,

    /// `sqlite://<dir>` or `sqlite::memory:`
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Database file name inside the DATABASE_URL directory
    #[arg(long, env = "DB_NAME")]
    pub db_name: String,

    /// API key for the remote sandbox; remote execution is disabled without it
    #[arg(long, env = "DAYTONA_API_KEY", hide_env_values = true)]
    pub daytona_api_key: Option<String>,

    #[arg(long, env = "DAYTONA_API_URL", default_value = DEFAULT_API_URL)]
    pub daytona_api_url: String,

    /// Image the remote sandbox is created from
    #[arg(long, env = "SANDBOX_IMAGE", default_value = DEFAULT_IMAGE)]
    pub sandbox_image: String,

    #[command(flatten)]
    pub local: LocalArgs,
}

impl ServeArgs {
    /// Remote sandbox settings, or `None` when no API key is configured.
    pub fn daytona_config(&self) -> Option<DaytonaConfig> {
        let api_key = self.daytona_api_key.as_deref().map(str::trim)?;
        if api_key.is_empty() {
            return None;
        }
        Some(DaytonaConfig {
            api_key: api_key.to_string(),
            api_url: self.daytona_api_url.clone(),
            image: self.sandbox_image.clone(),
        })
    }
}
