use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use client_core::{
    ClientEvent, FileIdentityStore, IdentityStore, IdentityUpdate, PollingTransport,
    PushStreamTransport, SessionClient, SessionTransport, WebSocketTransport,
};
use shared::domain::{Participant, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{check_reveal, check_vote, parse_command, render_board, resolve_target, Command, HELP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Ws,
    Poll,
    Stream,
}

#[derive(Parser, Debug)]
#[command(about = "Planning poker at the terminal")]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    server_url: String,
    #[arg(long, value_enum, default_value_t = TransportKind::Ws)]
    transport: TransportKind,
    /// Display name. Required the first time, updates the saved identity afterwards.
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    role: Option<Role>,
    /// Directory holding the saved identity. Defaults to the user config dir.
    #[arg(long)]
    identity_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 3000)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let store = FileIdentityStore::in_dir(identity_dir(args.identity_dir.clone()));
    let identity = resolve_identity(store.load()?, args.name.clone(), args.role)?;
    store.save(&identity)?;
    info!(participant_id = %identity.id, path = %store.path().display(), "identity ready");

    let transport = build_transport(&args)?;
    let client = SessionClient::connect(transport, identity.clone()).await?;
    println!(
        "joined as {} ({}) via {:?}; type 'help' for commands",
        identity.name, identity.role, args.transport
    );

    let printer = tokio::spawn(print_events(Arc::clone(&client)));
    let result = run_prompt(&client, &store).await;

    client.shutdown().await;
    printer.abort();
    result
}

fn identity_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| dirs::config_dir().map(|dir| dir.join("planning-poker")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Reuses the saved id; command-line name and role override the saved ones.
fn resolve_identity(
    saved: Option<Participant>,
    name: Option<String>,
    role: Option<Role>,
) -> Result<Participant> {
    let name = name.map(|name| name.trim().to_string());
    if matches!(&name, Some(name) if name.is_empty()) {
        return Err(anyhow!("--name must not be blank"));
    }
    match saved {
        Some(mut identity) => {
            if let Some(name) = name {
                identity.name = name;
            }
            if let Some(role) = role {
                identity.role = role;
            }
            Ok(identity)
        }
        None => {
            let name = name.ok_or_else(|| anyhow!("no saved identity; pass --name"))?;
            Ok(Participant::new_local(name, role.unwrap_or_default()))
        }
    }
}

fn build_transport(args: &Args) -> Result<Arc<dyn SessionTransport>> {
    let transport: Arc<dyn SessionTransport> = match args.transport {
        TransportKind::Ws => Arc::new(WebSocketTransport::new(&args.server_url)?),
        TransportKind::Poll => Arc::new(
            PollingTransport::new(&args.server_url)?
                .with_interval(Duration::from_millis(args.poll_interval_ms.max(100))),
        ),
        TransportKind::Stream => Arc::new(PushStreamTransport::new(&args.server_url)?),
    };
    Ok(transport)
}

async fn print_events(client: Arc<SessionClient>) {
    let mut events = client.subscribe_events();
    loop {
        match events.recv().await {
            Ok(ClientEvent::StateChanged(snapshot)) => {
                let me = client.identity().await.id;
                print!("{}", render_board(&snapshot, &me));
            }
            Ok(ClientEvent::Reaction(reaction)) => {
                let snapshot = client.snapshot().await;
                let target = snapshot
                    .participant(&reaction.target_participant_id)
                    .map(|participant| participant.name.clone())
                    .unwrap_or_else(|| reaction.target_participant_id.to_string());
                println!("{} -> {target}", reaction.emoji);
            }
            Ok(ClientEvent::Connected) => println!("connected"),
            Ok(ClientEvent::Disconnected) => println!("connection lost, retrying"),
            Ok(ClientEvent::Error(message)) => eprintln!("error: {message}"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_prompt(client: &SessionClient, store: &FileIdentityStore) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        if command == Command::Quit {
            return Ok(());
        }
        if let Err(err) = execute(client, store, command).await {
            eprintln!("{err:#}");
        }
    }
}

async fn execute(client: &SessionClient, store: &FileIdentityStore, command: Command) -> Result<()> {
    match command {
        Command::Vote(value) => {
            check_vote(&client.identity().await, value).map_err(|message| anyhow!(message))?;
            client.vote(value).await
        }
        Command::Reveal => {
            check_reveal(&client.snapshot().await).map_err(|message| anyhow!(message))?;
            client.reveal().await
        }
        Command::Reset => client.reset().await,
        Command::Rename(name) => {
            let updated = client
                .update_self(IdentityUpdate {
                    name: Some(name),
                    role: None,
                })
                .await?;
            store.save(&updated)
        }
        Command::SetRole(role) => {
            let updated = client
                .update_self(IdentityUpdate {
                    name: None,
                    role: Some(role),
                })
                .await?;
            store.save(&updated)
        }
        Command::React { target, emoji } => {
            let snapshot = client.snapshot().await;
            let target_id = resolve_target(&snapshot, &target)
                .ok_or_else(|| anyhow!("nobody called '{target}' is here"))?;
            client.throw_reaction(target_id, emoji, 0.5, 0.5).await
        }
        Command::Show => {
            let me = client.identity().await.id;
            print!("{}", render_board(&client.snapshot().await, &me));
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => Ok(()),
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
