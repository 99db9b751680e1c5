use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "ragserve-ask",
    about = "Ask a question against a running ragserve-api instance"
)]
struct AskCli {
    /// Question to answer using the chunk corpus
    #[arg(long)]
    query: String,

    /// Query endpoint of the running server
    #[arg(
        long,
        env = "RAGSERVE_URL",
        default_value = "http://127.0.0.1:8080/query"
    )]
    url: String,

    /// Seconds to wait for the full answer (retrieval + generation)
    #[arg(long, default_value_t = 90)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    let cli = AskCli::parse();
    let client = Client::builder()
        .timeout(Duration::from_secs(cli.timeout_secs.max(1)))
        .build()
        .context("failed to build HTTP client")?;
    let resp = client
        .post(&cli.url)
        .json(&AskRequest { query: &cli.query })
        .send()
        .with_context(|| format!("failed to call ragserve at {}", cli.url))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        bail!("ragserve returned {}: {}", status, body);
    }
    let parsed: AskResponse = resp.json().context("failed to parse ragserve response")?;
    println!("{}", parsed.response);
    Ok(())
}

#[derive(Serialize)]
struct AskRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    response: String,
}
