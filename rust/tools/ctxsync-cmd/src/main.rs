use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "ctxsync-cmd")]
#[command(about = "Stress tool for ctxsync jobs, worker pools and locks")]
#[command(version)]
struct Cli {
    /// Print the report as JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start N jobs and drain them with `first`
    Race {
        /// Number of jobs to race
        #[arg(long, default_value_t = 100)]
        jobs: usize,
    },

    /// Submit sleeping tasks to a worker pool and track peak concurrency
    Pool {
        /// Pool size
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Number of tasks to submit
        #[arg(long, default_value_t = 32)]
        jobs: usize,

        /// Spawn task threads on demand instead of keeping persistent workers
        #[arg(long)]
        lazy: bool,

        /// How long each task sleeps, in milliseconds
        #[arg(long, default_value_t = 10)]
        task_ms: u64,
    },

    /// Contend a sharable lock with readers and writers
    Lock {
        /// Number of reader threads
        #[arg(long, default_value_t = 8)]
        readers: usize,

        /// Number of writer threads
        #[arg(long, default_value_t = 2)]
        writers: usize,

        /// Run time, in milliseconds
        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Race { jobs } => commands::race::run(jobs, cli.json),
        Commands::Pool {
            workers,
            jobs,
            lazy,
            task_ms,
        } => commands::pool::run(workers, jobs, lazy, task_ms, cli.json),
        Commands::Lock {
            readers,
            writers,
            duration_ms,
        } => commands::lock::run(readers, writers, duration_ms, cli.json),
    }
}
