mod commands;

use clap::{Parser, Subcommand};
use mjlink_gateway::actions::{self, PanDirection, ZoomLevel};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mjlink")]
#[command(about = "Image bot gateway client with request correlation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the gateway and log every event until Ctrl-C
    Listen,
    /// Click a component on an earlier result and wait for the image
    Action {
        /// Message carrying the component
        #[arg(long)]
        message_id: String,
        /// Component custom id
        #[arg(long)]
        custom_id: String,
        /// Message flags of the target
        #[arg(long, default_value_t = 0)]
        flags: u64,
        /// Prompt used to match the final image
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Upscale one image of a grid
    Upscale {
        #[arg(long)]
        message_id: String,
        #[arg(long)]
        hash: String,
        /// Image index (1-4)
        #[arg(long)]
        index: u8,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Create variations of one image of a grid
    Variation {
        #[arg(long)]
        message_id: String,
        #[arg(long)]
        hash: String,
        /// Image index (1-4)
        #[arg(long)]
        index: u8,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Re-run the job behind a grid
    Reroll {
        #[arg(long)]
        message_id: String,
        #[arg(long)]
        hash: String,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Extend a result towards one direction
    Pan {
        #[arg(long)]
        message_id: String,
        #[arg(long)]
        hash: String,
        /// left, right, up or down
        #[arg(long)]
        direction: PanDirection,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Zoom out of a result
    ZoomOut {
        #[arg(long)]
        message_id: String,
        #[arg(long)]
        hash: String,
        /// high, low, 2x, 1.5x, square or custom (needs --prompt)
        #[arg(long)]
        level: ZoomLevel,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Task queue
    Tasks {
        #[command(subcommand)]
        command: TasksCommands,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum TasksCommands {
    /// Run synthetic tasks through the queue and print their events
    Demo {
        /// Number of tasks to submit
        #[arg(short, long, default_value_t = 3)]
        count: usize,
        /// Simulated work per task, in milliseconds
        #[arg(long, default_value_t = 500)]
        work_ms: u64,
    },
    /// Run one component click as a queued task and print its events
    Action {
        #[arg(long)]
        message_id: String,
        #[arg(long)]
        custom_id: String,
        #[arg(long, default_value_t = 0)]
        flags: u64,
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Listen => {
            commands::listen::run().await?;
        }
        Commands::Action {
            message_id,
            custom_id,
            flags,
            prompt,
        } => {
            commands::action::run(&message_id, &custom_id, flags, prompt).await?;
        }
        Commands::Upscale {
            message_id,
            hash,
            index,
            prompt,
        } => {
            let custom_id = actions::upscale(index, &hash)?;
            commands::action::run(&message_id, &custom_id, 0, prompt).await?;
        }
        Commands::Variation {
            message_id,
            hash,
            index,
            prompt,
        } => {
            let custom_id = actions::variation(index, &hash)?;
            commands::action::run(&message_id, &custom_id, 0, prompt).await?;
        }
        Commands::Reroll {
            message_id,
            hash,
            prompt,
        } => {
            let custom_id = actions::reroll(&hash);
            commands::action::run(&message_id, &custom_id, 0, prompt).await?;
        }
        Commands::Pan {
            message_id,
            hash,
            direction,
            prompt,
        } => {
            let custom_id = actions::pan(direction, &hash);
            commands::action::run(&message_id, &custom_id, 0, prompt).await?;
        }
        Commands::ZoomOut {
            message_id,
            hash,
            level,
            prompt,
        } => {
            let custom_id = actions::zoom_out(level, &hash);
            commands::action::run(&message_id, &custom_id, 0, prompt).await?;
        }
        Commands::Tasks { command } => match command {
            TasksCommands::Demo { count, work_ms } => {
                commands::tasks_cmd::demo(count, work_ms).await?;
            }
            TasksCommands::Action {
                message_id,
                custom_id,
                flags,
                prompt,
            } => {
                let request = mjlink_scheduler::ActionRequest {
                    message_id,
                    custom_id,
                    flags,
                    prompt,
                };
                commands::tasks_cmd::action(request).await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show().await?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(force).await?;
            }
        },
    }

    Ok(())
}
