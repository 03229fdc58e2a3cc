use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "shield-cli")]
#[command(about = "Management CLI for the request-shield gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "SHIELD_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Manage the blocked IP list
    Blocked {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Manage the allowed IP list
    Allowed {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Show penalty level, temporary block and list membership for an IP
    Inspect { ip: String },
}

#[derive(Subcommand)]
enum ListAction {
    /// Show current entries
    List,
    /// Add an IP or CIDR range
    Add {
        entry: String,
        /// Keep the list for at least this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Remove an exact entry
    Remove { entry: String },
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

    let request = match cli.command {
        Commands::Status => client.get(endpoint(&cli.url, &["admin", "status"])?),
        Commands::Blocked { action } => list_request(&client, &cli.url, "blocked", action)?,
        Commands::Allowed { action } => list_request(&client, &cli.url, "allowed", action)?,
        Commands::Inspect { ip } => client.get(endpoint(&cli.url, &["admin", "clients", &ip])?),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await?;
    Ok(())
}

fn list_request(
    client: &reqwest::Client,
    base: &str,
    list: &str,
    action: ListAction,
) -> Result<reqwest::RequestBuilder, Box<dyn std::error::Error>> {
    Ok(match action {
        ListAction::List => client.get(endpoint(base, &["admin", list])?),
        ListAction::Add { entry, ttl } => client
            .post(endpoint(base, &["admin", list])?)
            .json(&serde_json::json!({ "entry": entry, "ttlSecs": ttl })),
        ListAction::Remove { entry } => {
            client.request(Method::DELETE, endpoint(base, &["admin", list, &entry])?)
        }
    })
}

/// Append `segments` to the base URL, percent-encoding each one so a CIDR
/// entry's '/' stays inside its segment.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, Box<dyn std::error::Error>> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| format!("admin URL cannot take a path: {}", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    if status == StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
