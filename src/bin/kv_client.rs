use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 10;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Comma-separated HTTP addresses to try, in order, on each attempt
    #[arg(short, long, default_value = "127.0.0.1:8081,127.0.0.1:8091,127.0.0.1:8101")]
    servers: String,

    /// Identifies this client for request deduplication
    #[arg(long, default_value_t = 1)]
    client_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set a key to a value
    Put {
        key: String,
        value: String,
        #[arg(long, default_value_t = 1)]
        request_serial: u64,
    },
    /// Remove a key
    Delete {
        key: String,
        #[arg(long, default_value_t = 1)]
        request_serial: u64,
    },
    /// Read a key from the current leader
    Get { key: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let servers: Vec<&str> =
        cli.servers.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if servers.is_empty() {
        bail!("no servers configured");
    }

    match &cli.command {
        Commands::Put { key, value, request_serial } => {
            put(&servers, cli.client_id, *request_serial, key, value)
        }
        Commands::Delete { key, request_serial } => {
            delete(&servers, cli.client_id, *request_serial, key)
        }
        Commands::Get { key } => get(&servers, key),
    }
}

fn put(servers: &[&str], client_id: u64, request_serial: u64, key: &str, value: &str) -> Result<()> {
    let client = reqwest::blocking::Client::new();
    for attempt in 1..=MAX_ATTEMPTS {
        println!("attempt {attempt} of {MAX_ATTEMPTS}");
        for server in servers {
            println!("  trying {server}...");
            let body = json!({ "value": value, "client_id": client_id, "request_serial": request_serial });
            match client.post(format!("http://{server}/kv/{key}")).json(&body).send() {
                Ok(response) if response.status().is_success() => {
                    println!("committed via {server}");
                    return Ok(());
                }
                Ok(response) => {
                    println!("    {server} said {}: {}", response.status(), response.text().unwrap_or_default())
                }
                Err(err) => println!("    connection failed: {err}"),
            }
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    bail!("failed to commit after {MAX_ATTEMPTS} attempts across {} servers", servers.len());
}

fn delete(servers: &[&str], client_id: u64, request_serial: u64, key: &str) -> Result<()> {
    let client = reqwest::blocking::Client::new();
    for attempt in 1..=MAX_ATTEMPTS {
        println!("attempt {attempt} of {MAX_ATTEMPTS}");
        for server in servers {
            println!("  trying {server}...");
            let url = format!(
                "http://{server}/kv/{key}?client_id={client_id}&request_serial={request_serial}"
            );
            match client.delete(url).send() {
                Ok(response) if response.status().is_success() => {
                    println!("committed via {server}");
                    return Ok(());
                }
                Ok(response) => {
                    println!("    {server} said {}: {}", response.status(), response.text().unwrap_or_default())
                }
                Err(err) => println!("    connection failed: {err}"),
            }
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    bail!("failed to commit after {MAX_ATTEMPTS} attempts across {} servers", servers.len());
}

fn get(servers: &[&str], key: &str) -> Result<()> {
    let client = reqwest::blocking::Client::new();
    for attempt in 1..=MAX_ATTEMPTS {
        println!("attempt {attempt} of {MAX_ATTEMPTS}");
        for server in servers {
            println!("  trying {server}...");
            match client.get(format!("http://{server}/kv/{key}")).send() {
                Ok(response) if response.status().is_success() => {
                    let body: serde_json::Value = response.json()?;
                    println!("{key} = {}", body["value"]);
                    return Ok(());
                }
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    println!("{key} not found on {server}");
                    return Ok(());
                }
                Ok(response) => {
                    println!("    {server} said {}: {}", response.status(), response.text().unwrap_or_default())
                }
                Err(err) => println!("    connection failed: {err}"),
            }
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    bail!("failed to reach the leader after {MAX_ATTEMPTS} attempts across {} servers", servers.len());
}
