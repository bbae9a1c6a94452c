mod config;
mod container_cmds;
mod list_cmds;
mod session;
mod stream_cmds;

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};

use enginehub_core::engine::LogsOptions;
use enginehub_core::{EngineId, ListOptions};

use config::HubConfig;
use container_cmds::{Action, LabelCommands};
use session::Hub;

#[derive(Parser)]
#[command(name = "enginehub", about = "Query and drive many container engines as one")]
struct Cli {
    /// Config file (overrides ENGINEHUB_CONFIG and the default location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// List configured engines and their connection state
    Engines {
        /// Also query each engine's version and resources
        #[arg(long)]
        info: bool,
    },
    /// List containers across engines
    Ps {
        /// Only this engine (provider.connection)
        #[arg(long)]
        engine: Option<String>,
        /// Include stopped containers
        #[arg(short, long)]
        all: bool,
        /// Filter as key=value (label, id, name, status); repeatable
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,
        /// Use the Docker-compatible API even on native engines
        #[arg(long)]
        compat: bool,
    },
    /// List images across engines
    Images {
        /// Only this engine (provider.connection)
        #[arg(long)]
        engine: Option<String>,
        /// Include intermediate images
        #[arg(short, long)]
        all: bool,
        /// Use the Docker-compatible API even on native engines
        #[arg(long)]
        compat: bool,
    },
    /// List pods on native engines
    Pods {
        /// Only this engine (provider.connection)
        #[arg(long)]
        engine: Option<String>,
    },
    /// List volumes across engines
    Volumes {
        /// Include size and reference counts
        #[arg(long)]
        usage: bool,
    },
    /// List networks across engines
    Networks,
    /// Follow normalized events from every engine
    Events,
    /// Print a container's logs
    Logs {
        /// Container ID or name
        container: String,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
        /// Keep streaming new output
        #[arg(short, long)]
        follow: bool,
        /// Number of lines from the end
        #[arg(long)]
        tail: Option<usize>,
        /// Prefix lines with timestamps
        #[arg(short, long)]
        timestamps: bool,
    },
    /// Stream resource usage of a container
    Stats {
        /// Container ID or name
        container: String,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
    },
    /// Run a command in a running container
    Exec {
        /// Container ID or name
        container: String,
        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
    },
    /// Pull an image
    Pull {
        /// Image reference
        image: String,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
    },
    /// Start containers
    Start {
        /// Container IDs or names
        #[arg(required = true)]
        containers: Vec<String>,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
    },
    /// Stop containers
    Stop {
        /// Container IDs or names
        #[arg(required = true)]
        containers: Vec<String>,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
    },
    /// Restart containers
    Restart {
        /// Container IDs or names
        #[arg(required = true)]
        containers: Vec<String>,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
    },
    /// Force-remove containers
    Rm {
        /// Container IDs or names
        #[arg(required = true)]
        containers: Vec<String>,
        /// Engine (provider.connection); optional when only one is connected
        #[arg(long)]
        engine: Option<String>,
    },
    /// Act on every container carrying a label
    Label {
        #[command(subcommand)]
        command: LabelCommands,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Execute the `enginehub init` command: write a starter config file.
fn cmd_init(cli_config: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = match cli_config {
        Some(p) => p.to_path_buf(),
        None => std::env::var(config::CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| config::config_path()),
    };

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::starter_config();
    config::save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    for engine in &cfg.engines {
        println!(
            "  {}.{} ({}) at {}",
            engine.provider, engine.name, engine.kind, engine.address
        );
    }
    println!();
    println!("Edit [[engines]] to match your setup, then run `enginehub engines`.");

    Ok(())
}

fn list_options(engine: Option<String>, all: bool, filters: &[String], compat: bool) -> anyhow::Result<ListOptions> {
    Ok(ListOptions {
        engine: engine.as_deref().map(EngineId::from),
        all,
        filters: list_cmds::parse_filters(filters)?,
        compat_only: compat,
    })
}

async fn run(cli: Cli, hub: &Hub) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Engines { info } => list_cmds::run_engines(hub, info, json).await,
        Commands::Ps {
            engine,
            all,
            filters,
            compat,
        } => {
            let options = list_options(engine, all, &filters, compat)?;
            list_cmds::run_ps(hub, &options, json).await
        }
        Commands::Images {
            engine,
            all,
            compat,
        } => {
            let options = list_options(engine, all, &[], compat)?;
            list_cmds::run_images(hub, &options, json).await
        }
        Commands::Pods { engine } => {
            let engine = engine.as_deref().map(EngineId::from);
            list_cmds::run_pods(hub, engine.as_ref(), json).await
        }
        Commands::Volumes { usage } => list_cmds::run_volumes(hub, usage, json).await,
        Commands::Networks => list_cmds::run_networks(hub, json).await,
        Commands::Events => {
            let cancel = session::cancel_on_ctrl_c();
            stream_cmds::run_events(hub, json, &cancel).await
        }
        Commands::Logs {
            container,
            engine,
            follow,
            tail,
            timestamps,
        } => {
            let engine_id = hub.engine(engine.as_deref())?;
            let options = LogsOptions {
                follow,
                tail,
                timestamps,
            };
            let cancel = session::cancel_on_ctrl_c();
            stream_cmds::run_logs(hub, &engine_id, &container, &options, &cancel).await
        }
        Commands::Stats { container, engine } => {
            let engine_id = hub.engine(engine.as_deref())?;
            let cancel = session::cancel_on_ctrl_c();
            stream_cmds::run_stats(hub, &engine_id, &container, &cancel).await
        }
        Commands::Exec {
            container,
            cmd,
            engine,
        } => {
            let engine_id = hub.engine(engine.as_deref())?;
            let cancel = session::cancel_on_ctrl_c();
            stream_cmds::run_exec(hub, &engine_id, &container, cmd, &cancel).await
        }
        Commands::Pull { image, engine } => {
            let engine_id = hub.engine(engine.as_deref())?;
            let cancel = session::cancel_on_ctrl_c();
            stream_cmds::run_pull(hub, &engine_id, &image, json, &cancel).await
        }
        Commands::Start { containers, engine } => {
            container_cmds::run_action(hub, engine.as_deref(), Action::Start, &containers).await
        }
        Commands::Stop { containers, engine } => {
            container_cmds::run_action(hub, engine.as_deref(), Action::Stop, &containers).await
        }
        Commands::Restart { containers, engine } => {
            container_cmds::run_action(hub, engine.as_deref(), Action::Restart, &containers).await
        }
        Commands::Rm { containers, engine } => {
            container_cmds::run_action(hub, engine.as_deref(), Action::Remove, &containers).await
        }
        Commands::Label { command } => container_cmds::run_label_command(hub, command).await,
        Commands::Init { .. } | Commands::Completions { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that never talk to an engine.
    match &cli.command {
        Commands::Init { force } => return cmd_init(cli.config.as_deref(), *force),
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "enginehub", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let resolved = HubConfig::resolve(cli.config.as_deref())?;
    match &resolved.source {
        Some(path) => tracing::debug!(config = %path.display(), "loaded config"),
        None => tracing::debug!("no config file; using default engines"),
    }

    let hub = Hub::connect(resolved).await?;
    let result = run(cli, &hub).await;
    hub.close();
    result
}
