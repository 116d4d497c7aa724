//! Interactive shell commands and their output

use configmirror_core::{AgentStatus, ReplicaSnapshot};
use std::fmt::Write;

pub const HELP: &str = "\
Commands:
  status [--json]  connection state and replica counts
  configs          mirrored configuration items
  blocked          blocked addresses
  help             this message
  exit             shut down and quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Status { json: bool },
    Configs,
    Blocked,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return ShellCommand::Empty;
        };

        match command.to_lowercase().as_str() {
            "status" => ShellCommand::Status {
                json: words.any(|w| w == "--json"),
            },
            "configs" | "config" => ShellCommand::Configs,
            "blocked" => ShellCommand::Blocked,
            "help" | "?" => ShellCommand::Help,
            "exit" | "quit" => ShellCommand::Exit,
            _ => ShellCommand::Unknown(command.to_string()),
        }
    }
}

pub fn render_status(status: &AgentStatus) -> String {
    format!(
        "instance:  {} ({})\nstate:     {} [{}]\nconfigs:   {} (max version {})\nblocked:   {}",
        status.instance_id,
        status.local_address,
        status.state,
        status.health,
        status.config_count,
        status.max_version,
        status.blocked_count,
    )
}

pub fn render_status_json(status: &AgentStatus) -> serde_json::Result<String> {
    serde_json::to_string_pretty(status)
}

pub fn render_configs(snapshot: &ReplicaSnapshot) -> String {
    if snapshot.items.is_empty() {
        return "No configuration items".to_string();
    }

    let mut out = String::new();
    for item in snapshot.items.values() {
        let _ = write!(out, "{} = {}", item.key, item.value);
        if !item.item_type.is_empty() {
            let _ = write!(out, " [{}]", item.item_type);
        }
        let _ = write!(out, " (id {}, v{}", item.id, item.version);
        if let Some(domain) = &item.domain {
            let _ = write!(out, ", domain {}", domain);
        }
        out.push_str(")\n");
    }
    out.pop();
    out
}

pub fn render_blocked(snapshot: &ReplicaSnapshot) -> String {
    if snapshot.blocked.is_empty() {
        return "No blocked addresses".to_string();
    }

    snapshot
        .blocked
        .values()
        .map(|entry| format!("{}  {}", entry.address, entry.reason))
        .collect::<Vec<_>>()
        .join("\n")
}
