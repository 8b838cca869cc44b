use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

mod api;
mod catalog;
mod config;
mod events;
mod generator;
mod io;
mod listing;
mod manifest;
mod model;
mod orchestrator;
mod parse;
mod postgres;
mod prompts;
mod providers;
mod seed;
mod store;

use catalog::{PaapiClient, PaapiCredentials};
use config::{secret, AppConfig, StoreKind};
use events::RunEvent;
use generator::{ContentGenerator, GenerationJob};
use listing::{CategoryFilter, ListingQuery, PriceRange, SortKey, DEFAULT_PAGE_SIZE};
use manifest::ManifestWriter;
use model::Category;
use orchestrator::{BatchDriver, BatchReport};
use prompts::ProductRequest;
use providers::{ImageProvider, MockProvider, OpenAIClient, TextProvider};
use store::{JsonStore, ProductStore};

/// Generate, store and browse AI-written tech product reviews.
#[derive(Parser)]
#[command(name = "reviewgen", version)]
struct Cli {
    /// YAML config file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = "reviewgen.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone, Copy)]
struct BatchFlags {
    /// Skip items a previous run already completed
    #[arg(long)]
    resume: bool,

    /// Stop at the first failed item
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the review pipeline over a YAML or JSON list of product requests
    Generate {
        #[arg(long)]
        requests: PathBuf,
        #[command(flatten)]
        flags: BatchFlags,
    },
    /// Generate products from a single structured completion each
    Bulk {
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Random per item when omitted
        #[arg(long)]
        category: Option<Category>,
        /// Stop at the first failed item
        #[arg(long)]
        fail_fast: bool,
    },
    /// Import draft products from the Amazon catalog
    Sync {
        #[arg(long = "keyword", required = true)]
        keywords: Vec<String>,
        #[arg(long, default_value = "gaming")]
        category: Category,
    },
    /// Fill the store with deterministic placeholder products
    Seed {
        #[arg(long, default_value_t = 28)]
        count: usize,
    },
    /// Check the Postgres connection and report the product count
    DbCheck,
    /// Print one page of stored products
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_parser = kebab::<PriceRange>)]
        price: Option<PriceRange>,
        #[arg(long)]
        deals: bool,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_parser = kebab::<SortKey>, default_value = "latest")]
        sort: SortKey,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
    /// Serve the listing and run-trigger HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

/// Parses the same kebab-case names the HTTP query string uses.
fn kebab<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config).await?;

    match cli.command {
        Command::Generate { requests, flags } => {
            let reqs = read_requests(&requests).await?;
            let jobs: Vec<GenerationJob> = reqs.into_iter().map(GenerationJob::Review).collect();
            run_batch(&cfg, jobs, flags, false).await
        }
        Command::Bulk { count, category, fail_fast } => {
            let mut rng = rand::rng();
            let jobs = (0..count)
                .map(|_| {
                    let category = category.unwrap_or_else(|| Category::ALL[rng.random_range(0..Category::ALL.len())]);
                    GenerationJob::Structured { category }
                })
                .collect();
            // structured items are labelled by position, so a manifest cannot tell them apart across runs
            run_batch(&cfg, jobs, BatchFlags { resume: false, fail_fast }, true).await
        }
        Command::Sync { keywords, category } => {
            let store = build_store(&cfg).await?;
            let creds = PaapiCredentials {
                access_key: secret(&cfg.catalog.access_key_env)?,
                secret_key: secret(&cfg.catalog.secret_key_env)?,
                partner_tag: secret(&cfg.catalog.partner_tag_env)?,
            };
            let client = PaapiClient::new(
                creds,
                cfg.catalog.host.clone(),
                cfg.catalog.region.clone(),
                cfg.catalog.marketplace.clone(),
                Duration::from_secs(cfg.provider.timeout_secs),
            )?;
            let report = catalog::sync_keywords(&client, store.as_ref(), &keywords, category, cfg.catalog.item_count).await;
            println!("Saved {}, skipped {}, failed {}", report.saved.len(), report.skipped.len(), report.failed.len());
            for (kw, err) in &report.failed {
                println!("  {kw}: {err}");
            }
            Ok(())
        }
        Command::Seed { count } => {
            let store = build_store(&cfg).await?;
            let report = seed::seed_store(store.as_ref(), count, Utc::now()).await?;
            println!("Seeded {} products, skipped {}", report.saved.len(), report.skipped.len());
            Ok(())
        }
        Command::DbCheck => {
            let url = secret(&cfg.store.database_url_env)?;
            let pool = postgres::connect(&url, cfg.store.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            let count = postgres::ping(&pool).await?;
            println!("Database OK: {count} products");
            Ok(())
        }
        Command::List { category, price, deals, search, sort, page, page_size } => {
            let category = match category.as_deref() {
                Some(c) => c.parse::<CategoryFilter>()?,
                None => CategoryFilter::All,
            };
            let query = ListingQuery {
                category,
                price: price.unwrap_or_default(),
                deals_only: deals,
                search,
                sort,
                page,
                page_size,
            };
            let store = build_store(&cfg).await?;
            let products = store.list().await?;
            let result = listing::list(&products, &query);
            for p in &result.items {
                let deal = if p.is_deal() { " [deal]" } else { "" };
                println!("{:<40} {:<12} ${:>8.2}  {:.1}*{}", p.title, p.category.as_str(), p.price, p.rating, deal);
            }
            println!("page {}/{} ({} products)", result.page, result.total_pages.max(1), result.total_items);
            Ok(())
        }
        Command::Serve { bind } => {
            let store = build_store(&cfg).await?;
            let generator = build_generator(&cfg, false)?;
            let params = cfg.batch.params(false, false);
            api::serve(bind, api::AppState::new(store, generator, params, cfg.manifest_path())).await
        }
    }
}

async fn read_requests(path: &Path) -> Result<Vec<ProductRequest>> {
    let txt = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read requests file: {}", path.display()))?;
    let reqs = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&txt).with_context(|| format!("Failed to parse requests JSON: {}", path.display()))?
    } else {
        serde_yaml::from_str(&txt).with_context(|| format!("Failed to parse requests YAML: {}", path.display()))?
    };
    Ok(reqs)
}

fn build_providers(cfg: &AppConfig, bulk: bool) -> Result<(Arc<dyn TextProvider>, Arc<dyn ImageProvider>)> {
    match cfg.provider.kind.as_str() {
        "openai" => {
            let p = &cfg.provider;
            let client = OpenAIClient::new(
                secret(&p.api_key_env)?,
                p.base_url.clone(),
                p.chat_model.clone(),
                p.image_model.clone(),
                p.image_size.clone(),
                Duration::from_secs(p.timeout_secs),
            )?;
            let model = if bulk { &p.bulk_model } else { &p.chat_model };
            let text: Arc<dyn TextProvider> = Arc::new(client.with_chat_model(model));
            let images: Arc<dyn ImageProvider> = Arc::new(client);
            Ok((text, images))
        }
        "mock" => {
            let mock = Arc::new(MockProvider::default());
            let text: Arc<dyn TextProvider> = mock.clone();
            let images: Arc<dyn ImageProvider> = mock;
            Ok((text, images))
        }
        other => bail!("Unknown provider kind: {other}"),
    }
}

fn build_generator(cfg: &AppConfig, bulk: bool) -> Result<Arc<ContentGenerator>> {
    let (text, images) = build_providers(cfg, bulk)?;
    tracing::info!(text = text.name(), images = images.name(), "providers ready");
    Ok(Arc::new(ContentGenerator::new(text, images, cfg.batch.generator.clone())))
}

async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn ProductStore>> {
    match cfg.store.kind {
        StoreKind::Json => Ok(Arc::new(JsonStore::new(&cfg.store.json_path))),
        StoreKind::Postgres => {
            let url = secret(&cfg.store.database_url_env)?;
            let pool = postgres::connect(&url, cfg.store.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            Ok(Arc::new(postgres::PgStore::new(pool)))
        }
    }
}

async fn run_batch(cfg: &AppConfig, jobs: Vec<GenerationJob>, flags: BatchFlags, bulk: bool) -> Result<()> {
    if jobs.is_empty() {
        println!("Nothing to generate");
        return Ok(());
    }
    let store = build_store(cfg).await?;
    let generator = build_generator(cfg, bulk)?;

    tokio::fs::create_dir_all(&cfg.out_dir).await.ok();
    let manifest = ManifestWriter::open(cfg.manifest_path()).await?;
    let run_id = format!("run-{}", Utc::now().format("%Y%m%d_%H%M%S"));

    let (tx, rx) = broadcast::channel::<RunEvent>(256);
    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let progress = tokio::spawn(follow_progress(rx, pb));

    let driver = BatchDriver::new(generator, store, cfg.batch.params(flags.resume, flags.fail_fast))
        .with_manifest(manifest)
        .with_events(tx);
    let report = driver.run(&run_id, &jobs).await;
    drop(driver);
    let _ = progress.await;

    let report = report?;
    print_report(&report);
    if report.aborted {
        bail!("run {} stopped after a failed item", report.run_id);
    }
    Ok(())
}

async fn follow_progress(mut rx: broadcast::Receiver<RunEvent>, pb: ProgressBar) {
    loop {
        match rx.recv().await {
            Ok(RunEvent::Stage { label, .. }) => pb.set_message(label),
            Ok(RunEvent::ItemFailed { label, error, .. }) => pb.println(format!("failed {label}: {error}")),
            Ok(RunEvent::Progress { done, failed, skipped, .. }) => pb.set_position(done + failed + skipped),
            Ok(RunEvent::Finished { .. }) | Ok(RunEvent::Failed { .. }) => break,
            Ok(RunEvent::Started { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    pb.finish_with_message("done");
}

fn print_report(report: &BatchReport) {
    println!(
        "Run {}: {} generated, {} failed, {} skipped",
        report.run_id,
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for (label, err) in &report.failed {
        println!("  {label}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_batch_and_list_flags() {
        let cli = Cli::parse_from(["reviewgen", "bulk", "--count", "3", "--category", "smart-home", "--fail-fast"]);
        match cli.command {
            Command::Bulk { count, category, fail_fast } => {
                assert_eq!(count, 3);
                assert_eq!(category, Some(Category::SmartHome));
                assert!(fail_fast);
            }
            _ => panic!("expected bulk"),
        }
        assert!(Cli::try_parse_from(["reviewgen", "bulk", "--resume"]).is_err());

        let cli = Cli::parse_from(["reviewgen", "--config", "x.yaml", "list", "--price", "over-500", "--sort", "price-high"]);
        assert_eq!(cli.config, PathBuf::from("x.yaml"));
        match cli.command {
            Command::List { price, sort, page, page_size, .. } => {
                assert_eq!(price, Some(PriceRange::Over500));
                assert_eq!(sort, SortKey::PriceHigh);
                assert_eq!((page, page_size), (1, DEFAULT_PAGE_SIZE));
            }
            _ => panic!("expected list"),
        }

        let cli = Cli::parse_from(["reviewgen", "seed", "--count", "8"]);
        assert!(matches!(cli.command, Command::Seed { count: 8 }));
    }

    #[test]
    fn mock_providers_need_no_secrets() {
        let cfg = AppConfig::default();
        let (text, images) = build_providers(&cfg, true).unwrap();
        assert_eq!(text.name(), "mock");
        assert_eq!(images.name(), "mock");

        let bad = AppConfig { provider: config::ProviderCfg { kind: "nope".into(), ..Default::default() }, ..Default::default() };
        assert!(build_providers(&bad, false).is_err());
    }

    #[tokio::test]
    async fn requests_load_from_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("reqs.yaml");
        tokio::fs::write(&yaml, "- category: Gaming\n  product_name: Xbox Controller\n  base_price: 59.99\n").await.unwrap();
        let reqs = read_requests(&yaml).await.unwrap();
        assert_eq!(reqs[0].product_name, "Xbox Controller");

        let json = dir.path().join("reqs.json");
        tokio::fs::write(&json, r#"[{"category":"Laptops","product_name":"ThinkPad X1","base_price":1299.0}]"#).await.unwrap();
        let reqs = read_requests(&json).await.unwrap();
        assert_eq!(reqs[0].category, Category::Laptops);
    }
}
