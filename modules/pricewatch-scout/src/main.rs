use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use browserless_client::BrowserlessClient;
use pricewatch_common::ScoutConfig;
use pricewatch_scout::pipeline::ExtractError;
use pricewatch_scout::scheduling::TickLoop;
use pricewatch_scout::service::{self, AvailabilityChange, NewProduct, TrackerService};
use pricewatch_scout::store::JsonFileStore;
use pricewatch_scout::traits::ProductStore;
use pricewatch_scout::ScoutDeps;

#[derive(Parser)]
#[command(name = "pricewatch", about = "Tracks product prices and stock on retailer pages")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check due products on every tick until interrupted.
    Run,
    /// Check one product now and print the outcome.
    Check { id: Uuid },
    /// Start tracking a product page.
    Add {
        url: String,
        name: String,
        #[arg(long)]
        target_price: Option<f64>,
        /// CSS selector pointing at the price.
        #[arg(long)]
        selector: Option<String>,
        /// Minutes between checks; defaults to the global refresh interval.
        #[arg(long)]
        interval: Option<u32>,
    },
    /// List tracked products.
    List,
    /// Set availability by hand.
    SetAvailability {
        id: Uuid,
        #[arg(action = clap::ArgAction::Set)]
        available: bool,
    },
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("pricewatch=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn online_deps(
    config: &ScoutConfig,
    store: Arc<JsonFileStore>,
) -> Result<(ScoutDeps, Arc<BrowserlessClient>)> {
    let browser = Arc::new(
        BrowserlessClient::new(
            &config.browserless_url,
            config.browserless_token.as_deref(),
            config.max_browser_pages,
        )
        .context("configuring remote browser")?,
    );
    let deps = ScoutDeps::builder()
        .renderer(browser.clone())
        .store(store)
        .build();
    Ok((deps, browser))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let config = ScoutConfig::from_env();
            config.log_redacted();
            let store = Arc::new(JsonFileStore::open(&config.data_dir).await?);
            let (deps, browser) = online_deps(&config, store)?;

            info!("PriceWatch scout starting");
            let ticker = TickLoop::new(deps, config.max_concurrent_checks);
            ticker
                .run(Duration::from_secs(config.tick_interval_secs), async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
            browser.shutdown().await;
        }
        Command::Check { id } => {
            let config = ScoutConfig::from_env();
            let store = Arc::new(JsonFileStore::open(&config.data_dir).await?);
            let (deps, browser) = online_deps(&config, store)?;

            let outcome = TrackerService::new(deps).check_now(id).await;
            browser.shutdown().await;
            match outcome {
                Ok(result) => {
                    println!(
                        "{}: price={} stock={} via {} (confidence {:.2}){}",
                        result.title.as_deref().unwrap_or("?"),
                        result.price.map_or("-".to_string(), |p| format!("{p:.2}")),
                        result.in_stock.map_or("-".to_string(), |s| s.to_string()),
                        result.strategy,
                        result.price_confidence,
                        result.warning.map(|w| format!("\n  {w}")).unwrap_or_default(),
                    );
                }
                Err(ExtractError::AlreadyRefreshing(_)) => {
                    println!("{id} is already being checked");
                }
                Err(e) => return Err(e).context("check failed"),
            }
        }
        Command::Add {
            url,
            name,
            target_price,
            selector,
            interval,
        } => {
            let config = ScoutConfig::offline_from_env();
            let store = JsonFileStore::open(&config.data_dir).await?;
            let product = service::add_product(
                &store,
                NewProduct {
                    url,
                    name,
                    target_price,
                    selector,
                    check_interval_minutes: interval,
                },
            )
            .await?;
            println!("{}", product.id);
        }
        Command::List => {
            let config = ScoutConfig::offline_from_env();
            let store = JsonFileStore::open(&config.data_dir).await?;
            for p in store.list_products().await? {
                println!(
                    "{}  {:>10}  {:<5}  {}  {}",
                    p.id,
                    p.current_price.map_or("-".to_string(), |v| format!("{v:.2}")),
                    if p.is_available { "up" } else { "gone" },
                    p.name,
                    p.last_error.as_deref().unwrap_or(""),
                );
            }
        }
        Command::SetAvailability { id, available } => {
            let config = ScoutConfig::offline_from_env();
            let store = JsonFileStore::open(&config.data_dir).await?;
            match service::set_availability(&store, id, available).await? {
                AvailabilityChange::Applied => println!("{id}: available={available}"),
                AvailabilityChange::Deferred => {
                    println!("{id}: check in progress, available={available} applied when it ends")
                }
            }
        }
    }

    Ok(())
}
