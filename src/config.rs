use crate::agent::{AgentOptions, DEFAULT_ALLOWED_TOOLS, DEFAULT_SYSTEM_PROMPT};
use crate::server::DEFAULT_CHANNEL_CAPACITY;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay an agent runtime's output to chat clients", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the streaming chat endpoint
    Serve(ServeArgs),
    /// Chat with a running relay from the terminal
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "RELAY_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: String,

    /// Agent CLI to spawn for each request
    #[arg(long, env = "RELAY_AGENT_COMMAND", default_value = "claude")]
    pub agent_command: String,

    /// Extra argument passed to the agent CLI (repeatable)
    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    pub agent_args: Vec<String>,

    /// Tools the agent may use, comma separated
    #[arg(long, env = "RELAY_ALLOWED_TOOLS", value_delimiter = ',')]
    pub allowed_tools: Option<Vec<String>>,

    /// Working directory for the agent
    #[arg(long, env = "RELAY_CWD")]
    pub cwd: Option<PathBuf>,

    /// System instructions for the agent
    #[arg(long, env = "RELAY_SYSTEM_PROMPT", conflicts_with = "system_prompt_file")]
    pub system_prompt: Option<String>,

    /// Read system instructions from a file
    #[arg(long, env = "RELAY_SYSTEM_PROMPT_FILE")]
    pub system_prompt_file: Option<PathBuf>,

    /// Replay a recorded upstream transcript (JSON lines) instead of spawning the agent
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Write one JSON-lines transcript per query into this directory
    #[arg(long, env = "RELAY_RECORD_DIR")]
    pub record_dir: Option<PathBuf>,

    /// Delay between replayed events, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub replay_delay_ms: u64,

    /// Frames buffered per request before the agent is paused
    #[arg(long, env = "RELAY_CHANNEL_CAPACITY", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Relay server URL
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:3000")]
    pub url: String,
}

impl ServeArgs {
    pub fn agent_options(&self) -> std::io::Result<AgentOptions> {
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        let system_prompt = match (&self.system_prompt, &self.system_prompt_file) {
            (Some(prompt), _) => prompt.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?.trim().to_string(),
            (None, None) => DEFAULT_SYSTEM_PROMPT.to_string(),
        };

        let allowed_tools = match &self.allowed_tools {
            Some(tools) => tools
                .iter()
                .map(|tool| tool.trim().to_string())
                .filter(|tool| !tool.is_empty())
                .collect(),
            None => DEFAULT_ALLOWED_TOOLS
                .iter()
                .map(|tool| tool.to_string())
                .collect(),
        };

        Ok(AgentOptions {
            system_prompt,
            allowed_tools,
            cwd,
        })
    }
}
