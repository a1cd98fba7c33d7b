//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::jobs::JobKind;

/// Chunked batch loader for ledger files
#[derive(Parser, Debug)]
#[command(name = "ledger-batch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more jobs
    Run {
        /// Jobs to run, in any order; `all` runs every job
        #[arg(value_enum, required = true, num_args = 1..)]
        jobs: Vec<JobArg>,

        /// Directory holding the input files
        #[arg(short, long, env = "BATCH_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Month stamped on interest postings (YYYY-MM)
        #[arg(long)]
        as_of_month: Option<String>,

        /// Print the execution reports as JSON
        #[arg(long)]
        json: bool,

        /// PostgreSQL connection string; the in-memory store is used without it
        #[cfg(feature = "database")]
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobArg {
    All,
    Transactions,
    Interests,
    Annual,
}

/// Expand job arguments into the jobs to run
pub fn selected_jobs(args: &[JobArg]) -> Vec<JobKind> {
    if args.contains(&JobArg::All) {
        return JobKind::ALL.to_vec();
    }
    args.iter()
        .filter_map(|arg| match arg {
            JobArg::All => None,
            JobArg::Transactions => Some(JobKind::Transactions),
            JobArg::Interests => Some(JobKind::Interests),
            JobArg::Annual => Some(JobKind::Annual),
        })
        .collect()
}
