use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "session-cli")]
#[command(about = "Diagnostics CLI for the session engine", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "SESSION_ENGINE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Engine status and refresh activity
    Status,
    /// Token metadata for the current session
    Session,
    /// Circuit breaker states and counters
    Circuits,
    /// Health of monitored services
    Health,
    /// Degradation cache and fallback state
    Cache,
    /// Force a service circuit open
    Open { service: String },
    /// Force a service circuit closed
    Close { service: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match &cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Session => client.get(format!("{base}/admin/session")),
        Commands::Circuits => client.get(format!("{base}/admin/circuits")),
        Commands::Health => client.get(format!("{base}/admin/health")),
        Commands::Cache => client.get(format!("{base}/admin/cache")),
        Commands::Open { service } => client.post(format!("{base}/admin/circuits/{service}/open")),
        Commands::Close { service } => client.post(format!("{base}/admin/circuits/{service}/close")),
    };

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
