use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use fleet_upstream::docker;

#[derive(Parser)]
#[command(name = "upstream-cli")]
#[command(about = "Management CLI for the fleet upstream client", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "FLEET_ADMIN_API_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service status summary
    Status,
    /// Circuit breaker stats, for the fleet or one endpoint
    Breakers {
        /// Endpoint id
        target: Option<String>,
    },
    /// Concurrency limiter occupancy
    Limiter,
    /// Evict idle breaker records now
    Prune,
    /// Clear all breaker state and the limiter queue
    Reset,
    /// Decode a saved container log body (offline)
    DecodeLogs {
        file: PathBuf,
    },
    /// Redact host paths from a JSON label map (offline)
    SanitizeLabels {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/');
    let client = reqwest::Client::new();

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Breakers { target: None } => client.get(format!("{base}/admin/breakers")),
        Commands::Breakers {
            target: Some(target),
        } => client.get(format!("{base}/admin/breakers/{target}")),
        Commands::Limiter => client.get(format!("{base}/admin/limiter")),
        Commands::Prune => client.post(format!("{base}/admin/breakers/prune")),
        Commands::Reset => client.post(format!("{base}/admin/reset")),
        Commands::DecodeLogs { file } => {
            let body = std::fs::read(file)?;
            print!("{}", docker::decode_log_payload(&body));
            return Ok(());
        }
        Commands::SanitizeLabels { file } => {
            let content = std::fs::read_to_string(file)?;
            let labels: HashMap<String, String> = serde_json::from_str(&content)?;
            let sanitized = docker::sanitize_labels(&labels);
            println!("{}", serde_json::to_string_pretty(&sanitized)?);
            return Ok(());
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
