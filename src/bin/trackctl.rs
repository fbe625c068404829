//! Tracking operator CLI
//!
//! Talks to a running shipment-tracker over its HTTP interface.
//!
//! Usage:
//!   cargo run --bin trackctl -- trigger
//!   cargo run --bin trackctl -- health
//!   cargo run --bin trackctl -- register JW-1001 D123 --eta 2026-10-24T12:00:00Z
//!   cargo run --bin trackctl -- show JW-1001

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "trackctl")]
#[command(about = "Operator CLI for the shipment tracker")]
struct Args {
    /// Base URL of the tracker HTTP interface
    #[arg(short, long, env = "TRACKER_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation cycle now
    Trigger,
    /// Show polling health
    Health,
    /// Register a shipped order for tracking
    Register {
        order_number: String,
        docket_number: String,
        /// Estimated delivery (RFC 3339)
        #[arg(long)]
        eta: Option<DateTime<Utc>>,
        /// When the order shipped (RFC 3339), defaults to now
        #[arg(long)]
        shipped_at: Option<DateTime<Utc>>,
    },
    /// Show an order's tracking document
    Show { order_number: String },
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a JSON reply, failing on anything but the accepted statuses
async fn read_reply(response: reqwest::Response, accepted: &[StatusCode]) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("tracker returned a non-JSON body")?;
    if !accepted.contains(&status) {
        bail!("tracker answered {status}: {body}");
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let base = args.url.trim_end_matches('/');
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    match args.command {
        Command::Trigger => {
            let response = client
                .post(format!("{base}/tracking/manual-update"))
                .send()
                .await
                .with_context(|| format!("Failed to reach tracker at {base}"))?;
            let body = read_reply(response, &[StatusCode::OK, StatusCode::CONFLICT]).await?;
            if body["ok"] == json!(true) {
                let summary = &body["summary"];
                println!(
                    "cycle {}: eligible={} updated={} unchanged={} flagged={} failed={}",
                    summary["cycleId"].as_str().unwrap_or("?"),
                    summary["eligible"],
                    summary["updated"],
                    summary["unchanged"],
                    summary["flagged"],
                    summary["failed"],
                );
            } else {
                println!("A cycle is already running; try again shortly");
            }
        }
        Command::Health => {
            let response = client
                .get(format!("{base}/system/health"))
                .send()
                .await
                .with_context(|| format!("Failed to reach tracker at {base}"))?;
            print_json(&read_reply(response, &[StatusCode::OK]).await?)?;
        }
        Command::Register { order_number, docket_number, eta, shipped_at } => {
            let response = client
                .post(format!("{base}/tracking/orders"))
                .json(&json!({
                    "orderNumber": order_number,
                    "docketNumber": docket_number,
                    "estimatedDelivery": eta,
                    "shippedAt": shipped_at,
                }))
                .send()
                .await
                .with_context(|| format!("Failed to reach tracker at {base}"))?;
            let body = read_reply(response, &[StatusCode::CREATED]).await?;
            println!("registered {} ({})", order_number, body["status"].as_str().unwrap_or("?"));
        }
        Command::Show { order_number } => {
            let response = client
                .get(format!("{base}/tracking/orders/{order_number}"))
                .send()
                .await
                .with_context(|| format!("Failed to reach tracker at {base}"))?;
            print_json(&read_reply(response, &[StatusCode::OK]).await?)?;
        }
    }

    Ok(())
}
