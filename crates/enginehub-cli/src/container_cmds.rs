//! Container state commands: `start`, `stop`, `restart`, `rm` and the
//! `label` batch variants.

use anyhow::{Context, Result};
use clap::Subcommand;

use enginehub_core::EngineId;

use crate::list_cmds::split_pair;
use crate::session::Hub;

/// What to do with a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Remove,
}

impl Action {
    fn past_tense(self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
            Self::Remove => "removed",
        }
    }
}

#[derive(Subcommand)]
pub enum LabelCommands {
    /// Start every stopped container carrying a label
    Start {
        /// Label to match, as key=value
        label: String,
        /// Engine to act on (provider.connection)
        #[arg(long)]
        engine: Option<String>,
    },
    /// Stop every running container carrying a label
    Stop {
        /// Label to match, as key=value
        label: String,
        /// Engine to act on (provider.connection)
        #[arg(long)]
        engine: Option<String>,
    },
    /// Restart every container carrying a label
    Restart {
        /// Label to match, as key=value
        label: String,
        /// Engine to act on (provider.connection)
        #[arg(long)]
        engine: Option<String>,
    },
    /// Remove every container carrying a label
    Rm {
        /// Label to match, as key=value
        label: String,
        /// Engine to act on (provider.connection)
        #[arg(long)]
        engine: Option<String>,
    },
}

/// Apply `action` to each named container, one at a time.
///
/// Every container is attempted; the first failure is returned after the
/// rest have run.
pub async fn run_action(
    hub: &Hub,
    engine: Option<&str>,
    action: Action,
    containers: &[String],
) -> Result<()> {
    let engine_id = hub.engine(engine)?;
    let mut first_error = None;

    for id in containers {
        let result = apply(hub, &engine_id, action, id).await;
        match result {
            Ok(()) => println!("{id} {}", action.past_tense()),
            Err(e) => {
                eprintln!("{id}: {e}");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e).with_context(|| format!("failed on engine {engine_id}")),
        None => Ok(()),
    }
}

async fn apply(
    hub: &Hub,
    engine_id: &EngineId,
    action: Action,
    id: &str,
) -> enginehub_core::Result<()> {
    match action {
        Action::Start => hub.registry.start_container(engine_id, id).await,
        Action::Stop => hub.registry.stop_container(engine_id, id).await,
        Action::Restart => hub.registry.restart_container(engine_id, id).await,
        Action::Remove => hub.registry.delete_container(engine_id, id).await,
    }
}

/// Run a `label` subcommand.
pub async fn run_label_command(hub: &Hub, command: LabelCommands) -> Result<()> {
    let (action, label, engine) = match command {
        LabelCommands::Start { label, engine } => (Action::Start, label, engine),
        LabelCommands::Stop { label, engine } => (Action::Stop, label, engine),
        LabelCommands::Restart { label, engine } => (Action::Restart, label, engine),
        LabelCommands::Rm { label, engine } => (Action::Remove, label, engine),
    };
    let (key, value) = split_pair(&label)?;
    let engine_id = hub.engine(engine.as_deref())?;

    let registry = &hub.registry;
    let result = match action {
        Action::Start => registry.start_containers_by_label(&engine_id, key, value).await,
        Action::Stop => registry.stop_containers_by_label(&engine_id, key, value).await,
        Action::Restart => registry.restart_containers_by_label(&engine_id, key, value).await,
        Action::Remove => registry.delete_containers_by_label(&engine_id, key, value).await,
    };
    result.with_context(|| format!("label batch {key}={value} on {engine_id} failed"))?;

    println!("containers labelled {key}={value} {}", action.past_tense());
    Ok(())
}
