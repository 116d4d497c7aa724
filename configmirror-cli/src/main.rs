use anyhow::{Context, Result};
use clap::Parser;
use configmirror_core::config::AgentConfig;
use configmirror_core::logging::{init_logging_with_config, LogConfig};
use configmirror_core::shutdown::install_signal_handlers;
use configmirror_core::{metrics, AgentHandle, InstanceIdentity, MirrorAgent, ResyncPolicy};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, warn};

mod commands;

use commands::{render_blocked, render_configs, render_status, render_status_json, ShellCommand};

#[derive(Parser, Debug)]
#[command(name = "configmirror")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (environment variables are used otherwise)
    #[arg(short, long)]
    config: Option<String>,

    /// Authority base URL, e.g. http://localhost:5000
    #[arg(short, long)]
    server: Option<String>,

    /// Instance id to register with; prompted for when omitted
    #[arg(short, long)]
    instance_id: Option<String>,

    /// Directory for the snapshot files
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Replace the replica from a fresh bulk load after each reconnect
    #[arg(long)]
    resync_on_reconnect: bool,
}

fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).with_context(|| format!("Cannot expand {}", path))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn load_config(args: &Args) -> Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::from_file(expand_path(path)?)?,
        None => AgentConfig::from_env()?,
    };

    if let Some(server) = &args.server {
        config.server.url = server.clone();
    }
    if let Some(id) = &args.instance_id {
        config.identity.instance_id = Some(id.clone());
    }
    if let Some(dir) = &args.data_dir {
        config.store.data_dir = expand_path(dir)?;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if args.resync_on_reconnect {
        config.store.resync_policy = ResyncPolicy::Replace;
    }

    config.validate()?;
    Ok(config)
}

/// Ask the operator for an id; a blank answer generates one
fn prompt_instance_id() -> Result<String> {
    print!("Instance id (blank to generate): ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    let answer = line.trim();
    if answer.is_empty() {
        Ok(InstanceIdentity::generate_instance_id())
    } else {
        Ok(answer.to_string())
    }
}

fn wait_for_enter() {
    eprint!("Press Enter to exit...");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}

/// Why the shell stopped reading commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShellExit {
    Command,
    EndOfInput,
    Shutdown,
    /// The hub connection closed for good
    Closed,
}

/// Read commands until `exit`, end of input, a shutdown signal or the
/// connection closing for good
async fn run_shell<R, W>(handle: &AgentHandle, input: R, out: &mut W) -> Result<ShellExit>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let shutdown = handle.shutdown_coordinator();
    let mut lines = BufReader::new(input).lines();

    writeln!(out, "{}", commands::HELP)?;
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let line = tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => return Ok(ShellExit::Shutdown),
            _ = handle.closed() => {
                writeln!(out, "\nConnection to the authority closed.")?;
                return Ok(ShellExit::Closed);
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(ShellExit::EndOfInput);
        };

        match ShellCommand::parse(&line) {
            ShellCommand::Status { json } => {
                let status = handle.status()?;
                if json {
                    writeln!(out, "{}", render_status_json(&status)?)?;
                } else {
                    writeln!(out, "{}", render_status(&status))?;
                }
            }
            ShellCommand::Configs => {
                writeln!(out, "{}", render_configs(&handle.store().snapshot()?))?
            }
            ShellCommand::Blocked => {
                writeln!(out, "{}", render_blocked(&handle.store().snapshot()?))?
            }
            ShellCommand::Help => writeln!(out, "{}", commands::HELP)?,
            ShellCommand::Exit => return Ok(ShellExit::Command),
            ShellCommand::Empty => {}
            ShellCommand::Unknown(command) => {
                writeln!(out, "Unknown command '{}'. Type 'help' for a list.", command)?
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(LogConfig::from_settings(&config.logging)?)?;
    metrics::init_metrics();

    let instance_id = match config.identity.instance_id.clone() {
        Some(id) => id,
        None => prompt_instance_id()?,
    };
    let identity = InstanceIdentity::resolve(
        instance_id,
        config.identity.local_address.clone(),
        &config.server.url,
    );
    info!(
        "configmirror starting as {} ({}) against {}",
        identity.instance_id, identity.local_address, config.server.url
    );

    let started = match MirrorAgent::new(config, identity) {
        Ok(agent) => agent.start().await,
        Err(e) => Err(e),
    };
    let handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            wait_for_enter();
            return Err(e.into());
        }
    };

    install_signal_handlers(handle.shutdown_coordinator());
    let exit = run_shell(&handle, tokio::io::stdin(), &mut std::io::stdout()).await?;
    if exit == ShellExit::Closed {
        warn!("Hub connection closed for good, exiting");
    }

    let final_state = handle.shutdown().await?;
    if final_state != configmirror_core::ConnectionState::Closed {
        warn!("Stopped in unexpected state {}", final_state);
    }
    info!("configmirror stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use configmirror_core::core_link::{MockPushChannel, StaticBulkLoader};
    use configmirror_core::{ConfigItem, ConnectionState};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn start_agent(dir: &std::path::Path) -> (AgentHandle, Arc<MockPushChannel>) {
        let mut config = AgentConfig::default();
        config.store.data_dir = dir.to_path_buf();
        config.telemetry.enabled = false;
        let agent = MirrorAgent::new(config, InstanceIdentity::new("edge-1", "10.0.0.5")).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(MockPushChannel::new(tx));
        let loader = Arc::new(StaticBulkLoader::new(vec![ConfigItem::new(1, "A", "v1", 2)]));
        let handle = agent.start_with(channel.clone(), loader, rx).await.unwrap();

        let mut state_rx = handle.subscribe_state();
        state_rx
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .unwrap();
        (handle, channel)
    }

    #[tokio::test]
    async fn test_shell_runs_commands_until_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _channel) = start_agent(dir.path()).await;

        let mut out = Vec::new();
        let exit = run_shell(&handle, &b"status\nbogus\nexit\nconfigs\n"[..], &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(exit, ShellExit::Command);
        assert!(text.contains("edge-1 (10.0.0.5)"));
        assert!(text.contains("Unknown command 'bogus'"));
        assert!(!text.contains("A = v1"));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shell_returns_when_connection_closes() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, channel) = start_agent(dir.path()).await;

        // Keep the writer alive so the shell blocks waiting for input
        let (_operator, input) = tokio::io::duplex(64);
        channel.set_state(ConnectionState::Closed);

        let mut out = Vec::new();
        let exit = tokio::time::timeout(Duration::from_secs(5), run_shell(&handle, input, &mut out))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, ShellExit::Closed);
        assert_eq!(handle.shutdown().await.unwrap(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_shell_returns_on_shutdown_signal() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _channel) = start_agent(dir.path()).await;

        let (_operator, input) = tokio::io::duplex(64);
        handle.shutdown_coordinator().shutdown().await;

        let mut out = Vec::new();
        let exit = run_shell(&handle, input, &mut out).await.unwrap();
        assert_eq!(exit, ShellExit::Shutdown);
        handle.shutdown().await.unwrap();
    }
}
