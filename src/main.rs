use agent_relay::agent::{AgentRuntime, CommandRuntime, ReplayRuntime};
use agent_relay::client::{ChatClient, ClientConfig, TurnOutcome};
use agent_relay::config::{ChatArgs, Cli, Command, ServeArgs};
use agent_relay::recorder::RecordingRuntime;
use agent_relay::render::TranscriptPrinter;
use agent_relay::server::{self, ServerConfig};
use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Chat(args) => chat(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let options = args
        .agent_options()
        .context("failed to resolve agent options")?;

    let runtime: Arc<dyn AgentRuntime> = match &args.replay {
        Some(path) => {
            let replay = ReplayRuntime::from_jsonl(path)
                .with_context(|| format!("failed to read transcript {}", path.display()))?
                .with_delay(Duration::from_millis(args.replay_delay_ms));
            tracing::info!(path = %path.display(), events = replay.len(), "serving recorded transcript");
            Arc::new(replay)
        }
        None => Arc::new(
            CommandRuntime::new(args.agent_command.clone()).with_args(args.agent_args.clone()),
        ),
    };

    let runtime: Arc<dyn AgentRuntime> = match &args.record_dir {
        Some(dir) => Arc::new(RecordingRuntime::new(runtime, dir)),
        None => runtime,
    };

    tracing::info!(
        cwd = %options.cwd.display(),
        allowed_tools = ?options.allowed_tools,
        "agent options"
    );

    server::run(
        ServerConfig {
            listen: args.listen,
            options,
            channel_capacity: args.channel_capacity,
        },
        runtime,
    )
    .await
}

async fn chat(args: ChatArgs) -> anyhow::Result<()> {
    let mut client = ChatClient::new(ClientConfig { base_url: args.url });
    let mut printer = TranscriptPrinter::new(std::io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Chatting with {} (Ctrl-D to quit)", client.base_url());
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        printer.user(line)?;
        let outcome = client
            .send(line.to_string(), |event, turn| {
                if let Err(err) = printer.event(event, turn) {
                    tracing::warn!(error = %err, "failed to render event");
                }
            })
            .await;

        match outcome {
            Ok(TurnOutcome::Completed) => {}
            Ok(TurnOutcome::Incomplete) => tracing::warn!("response ended without completing"),
            Err(err) => eprintln!("{err}"),
        }
    }

    Ok(())
}
