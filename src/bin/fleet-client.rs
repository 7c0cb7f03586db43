use anyhow::{anyhow, Result};
use clap::Parser;
use fleet_remote::client::{render_health_card, FleetClient, TickStream};
use fleet_remote::config::{resolve_config_path, Config};
use fleet_remote::protocol::RpcError;
use fleet_remote::task::{HealthCard, SpinnerFrame, TaskReport};
use inquire::{InquireError, Select, Text};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleet-client", about = "Interactive client for fleet-server")]
struct Cli {
    /// Config file to read the server address from
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address, overrides the config file
    #[arg(long)]
    addr: Option<String>,
}

const SEND_TEXT: &str = "Send text";
const SPINNER: &str = "Start spinner";
const HEALTH: &str = "Show health card";
const STOP: &str = "Stop task";
const STATUS: &str = "Task status";
const EXIT: &str = "Exit server";
const QUIT: &str = "Quit";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fleet-client fatal error: {:?}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if !atty::is(atty::Stream::Stdin) {
        return Err(anyhow!(
            "The menu requires a TTY. fleet-client cannot be used with piped stdin."
        ));
    }

    let addr = match cli.addr {
        Some(addr) => addr,
        None => Config::load(resolve_config_path(cli.config))?.address(),
    };
    let client = FleetClient::connect(addr.as_str()).await?;
    println!("Connected to {}", addr);

    loop {
        let choice = prompt(|| {
            Select::new(
                "Command:",
                vec![SEND_TEXT, SPINNER, HEALTH, STOP, STATUS, EXIT, QUIT],
            )
            .prompt()
        })
        .await?;

        match choice {
            SEND_TEXT => {
                let text = prompt(|| Text::new("Text:").prompt()).await?;
                println!("Server response: {}", client.send_text(&text).await?);
            }
            SPINNER => {
                let stream = client.start_spinner().await?;
                tokio::spawn(print_spinner(stream));
            }
            HEALTH => {
                let stream = client.show_health().await?;
                tokio::spawn(print_health(stream));
            }
            STOP => println!("Server response: {}", client.stop().await?),
            STATUS => match client.status().await? {
                Some(kind) => println!("Running: {}", kind),
                None => println!("No active task"),
            },
            EXIT => {
                println!("Server response: {}", client.exit().await?);
                break;
            }
            _ => break,
        }
    }

    println!("Client is shutting down.");
    Ok(())
}

/// inquire blocks on the terminal, so prompts run off the async workers.
async fn prompt<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, InquireError> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

async fn print_spinner(mut stream: TickStream<SpinnerFrame>) {
    while let Some(Ok(tick)) = stream.next().await {
        if tick.finished {
            println!("\r[SPINNER] {}", tick.frame);
        } else {
            print!("\r[SPINNER] {}", tick.frame);
            let _ = std::io::stdout().flush();
        }
    }
    report_end(stream.finish().await);
}

async fn print_health(mut stream: TickStream<HealthCard>) {
    while let Some(Ok(card)) = stream.next().await {
        println!("\n{}", render_health_card(&card));
    }
    report_end(stream.finish().await);
}

fn report_end(result: Result<TaskReport>) {
    match result {
        Ok(report) => println!("[stream ended: {:?} after {} ticks]", report.outcome, report.ticks),
        Err(e) => match e.downcast_ref::<RpcError>() {
            Some(rpc) if rpc.is_already_active() => {
                println!("[rejected: another task is running, stop it first]")
            }
            _ => println!("[stream failed: {}]", e),
        },
    }
}
