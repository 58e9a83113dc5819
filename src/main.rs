use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chaplin::cli::CommandContext;
use chaplin::cli::commands::design::DesignArgs;
use chaplin::cli::commands::job::FollowMode;
use chaplin::cli::commands::run::ProgressMode;

#[derive(Parser)]
#[command(name = "chaplin")]
#[command(version, about = "Multi-agent workgroup execution and job orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read configuration from this file only (defaults, global and project files are skipped)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workgroup and print the integrated result
    Run {
        #[arg(long, short, help = "Run request JSON file ('-' for stdin)")]
        request: PathBuf,
        #[arg(long, help = "Show progress on stderr while running")]
        stream: bool,
        #[arg(long, conflicts_with = "stream", help = "Emit progress as SSE frames")]
        sse: bool,
    },

    /// Generate the next missing agent output (or up to --target)
    RunAgent {
        #[arg(long, short, help = "Run request JSON file ('-' for stdin)")]
        request: PathBuf,
        #[arg(long, help = "Agent to run up to and including")]
        target: Option<String>,
    },

    /// Design workgroup agents for a persona
    Design {
        #[arg(long, short, help = "Persona JSON file ('-' for stdin)")]
        persona: PathBuf,
        #[arg(long, help = "Generate (or enhance) only this agent")]
        agent_name: Option<String>,
        #[arg(long, conflicts_with = "agent_name", help = "Generate only the agent at this 0-based position")]
        agent_index: Option<usize>,
        #[arg(long, help = "Upper bound on team size (1-5)")]
        max_members: Option<usize>,
        #[arg(long, requires = "agent_name", help = "Rewrite an existing agent's prompt")]
        enhance: bool,
        #[arg(long, requires = "enhance", help = "Prompt to enhance when the agent is not in previousWorkgroup")]
        existing_prompt: Option<String>,
    },

    /// Manage durable jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Create a job and queue its processing trigger
    Submit {
        #[arg(long, short, help = "Job JSON file with input and chaplinData ('-' for stdin)")]
        request: PathBuf,
        #[arg(long, short, help = "Follow progress until the job finishes")]
        wait: bool,
        #[arg(long, help = "Follow progress as SSE frames")]
        sse: bool,
    },
    /// Show a job's state
    Status {
        id: String,
        #[arg(long, help = "Print the full job record as JSON")]
        json: bool,
    },
    /// Replay a job's progress log, tailing it while the job runs
    Replay {
        id: String,
        #[arg(long, help = "Emit SSE frames")]
        sse: bool,
    },
    /// Requeue a failed job
    Retry {
        id: String,
        #[arg(long, short, help = "Follow progress until the job finishes")]
        wait: bool,
        #[arg(long, help = "Follow progress as SSE frames")]
        sse: bool,
    },
    /// Process a delivered trigger
    Process {
        #[arg(long, short, help = "Value of the Upstash-Signature header")]
        signature: String,
        #[arg(help = "Raw trigger body file ('{\"jobId\": ...}')")]
        body: PathBuf,
    },
    /// List recent jobs
    List {
        #[arg(long, short, help = "Maximum jobs to show")]
        limit: Option<usize>,
    },
    /// Delete expired jobs
    Purge {
        #[arg(long, help = "Age in seconds (default: storage.job_ttl_secs)")]
        ttl_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

fn follow_mode(wait: bool, sse: bool) -> FollowMode {
    if sse {
        FollowMode::Sse
    } else if wait {
        FollowMode::Console
    } else {
        FollowMode::Silent
    }
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mChaplin encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Default hook prints the backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    // Logs go to stderr; stdout carries JSON and SSE output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let context = || CommandContext::load(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            request,
            stream,
            sse,
        } => {
            let mode = if sse {
                ProgressMode::Sse
            } else if stream {
                ProgressMode::Console
            } else {
                ProgressMode::Quiet
            };
            let ctx = context()?;
            Runtime::new()?.block_on(chaplin::cli::commands::run::run(&ctx, &request, mode))?;
        }
        Commands::RunAgent { request, target } => {
            let ctx = context()?;
            Runtime::new()?.block_on(chaplin::cli::commands::run_agent::run(
                &ctx,
                &request,
                target.as_deref(),
            ))?;
        }
        Commands::Design {
            persona,
            agent_name,
            agent_index,
            max_members,
            enhance,
            existing_prompt,
        } => {
            let args = DesignArgs {
                agent_name,
                agent_index,
                max_members,
                enhance,
                existing_prompt,
            };
            let ctx = context()?;
            Runtime::new()?.block_on(chaplin::cli::commands::design::run(&ctx, &persona, args))?;
        }
        Commands::Job { action } => run_job(context()?, action)?,
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                chaplin::cli::commands::config::show(global, &format)?;
            }
            ConfigAction::Path => {
                chaplin::cli::commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                if global {
                    chaplin::cli::commands::config::init_global(force)?;
                } else {
                    chaplin::cli::commands::config::init_project()?;
                }
            }
        },
    }

    Ok(())
}

fn run_job(ctx: CommandContext, action: JobAction) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    match action {
        JobAction::Submit { request, wait, sse } => {
            rt.block_on(chaplin::cli::commands::job::submit(
                &ctx,
                &request,
                follow_mode(wait, sse),
            ))?;
        }
        JobAction::Status { id, json } => {
            chaplin::cli::commands::job::status(&ctx, &id, json)?;
        }
        JobAction::Replay { id, sse } => {
            rt.block_on(chaplin::cli::commands::job::replay(&ctx, &id, sse))?;
        }
        JobAction::Retry { id, wait, sse } => {
            rt.block_on(chaplin::cli::commands::job::retry(
                &ctx,
                &id,
                follow_mode(wait, sse),
            ))?;
        }
        JobAction::Process { signature, body } => {
            rt.block_on(chaplin::cli::commands::job::process(&ctx, &signature, &body))?;
        }
        JobAction::List { limit } => {
            chaplin::cli::commands::job::list(&ctx, limit)?;
        }
        JobAction::Purge { ttl_secs } => {
            chaplin::cli::commands::job::purge(&ctx, ttl_secs)?;
        }
    }

    Ok(())
}
