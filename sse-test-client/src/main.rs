use anyhow::Result;
use clap::Parser;
use colored::*;
use uuid::Uuid;

mod api_client;
mod output;
mod scenarios;
mod sse_client;

use api_client::ApiClient;
use output::print_test_summary;

#[derive(Parser)]
#[command(name = "sse-test-client")]
#[command(about = "SSE Integration Testing Tool")]
struct Cli {
    /// Base URL of the push backend (e.g., http://localhost:4000)
    #[arg(long)]
    base_url: String,

    /// User id to subscribe and push as (defaults to a random one, so
    /// runs never see each other's replay logs)
    #[arg(long)]
    user_id: Option<String>,

    /// Test scenario to run
    #[arg(long, value_enum)]
    scenario: ScenarioChoice,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Test basic SSE connection and the connected frame
    ConnectionTest,
    /// Test that one push reaches every device of the user
    FanOut,
    /// Test reconnect replay of events pushed while disconnected
    Replay,
    /// Run all tests
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    println!("{}", "=== SETUP PHASE ===".bright_white().bold());

    let user_id = cli
        .user_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    println!("{} Testing as user {}", "→".blue(), user_id);

    let api_client = ApiClient::new(reqwest::Client::new(), cli.base_url.clone());

    println!("{} Checking server health...", "→".blue());
    api_client.health_check().await?;
    println!("{} Server is up", "✓".green());

    // Run test scenarios
    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let mut results = Vec::new();

    match cli.scenario {
        ScenarioChoice::ConnectionTest => {
            results.push(scenarios::test_connection(&cli.base_url, &user_id).await?);
        }
        ScenarioChoice::FanOut => {
            results.push(scenarios::test_fan_out(&cli.base_url, &user_id, &api_client).await?);
        }
        ScenarioChoice::Replay => {
            results.push(scenarios::test_replay(&cli.base_url, &user_id, &api_client).await?);
        }
        ScenarioChoice::All => {
            results.push(scenarios::test_connection(&cli.base_url, &user_id).await?);
            results.push(scenarios::test_fan_out(&cli.base_url, &user_id, &api_client).await?);
            results.push(scenarios::test_replay(&cli.base_url, &user_id, &api_client).await?);
        }
    }

    // Print summary
    println!("\n{}", "=== RESULTS ===".bright_white().bold());
    print_test_summary(&results);

    let all_passed = results.iter().all(|r| r.passed);

    if all_passed {
        println!("\n{}", "All tests passed! ✓".bright_green().bold());
    } else {
        println!("\n{}", "Some tests failed! ✗".bright_red().bold());
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
