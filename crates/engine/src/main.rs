//! Quarry command line.
//!
//! Runs a built-in report against the configured database and prints the
//! result as JSON, or prints the SQL it would run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use quarry_engine::EngineConfig;
use quarry_engine::cache::create_cache;
use quarry_engine::db::create_storage;
use quarry_engine::filter::FilterContext;
use quarry_engine::query::{JsonValue, SortDirection, count_query};
use quarry_engine::source::{BUILTIN_SOURCES, DataSource, Preferences, builtin_source};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a report and print its rows as JSON.
    Run(ReportArgs),
    /// Print the data and count SQL without executing them.
    Sql(ReportArgs),
}

#[derive(clap::Args, Debug)]
struct ReportArgs {
    /// Report source name (users, courses).
    #[arg(long)]
    source: String,

    /// JSON preferences file.
    #[arg(long)]
    preferences: PathBuf,

    /// Viewing user.
    #[arg(long, default_value = "0")]
    user_id: i64,

    /// Course the report is shown in.
    #[arg(long)]
    course_id: Option<i64>,

    /// Groups of the viewing user.
    #[arg(long = "group-id")]
    group_ids: Vec<i64>,

    /// Page to show (1-indexed).
    #[arg(long, default_value = "1")]
    page: u32,

    /// Field to sort by.
    #[arg(long)]
    sort: Option<String>,

    /// Sort direction (asc or desc).
    #[arg(long, default_value = "asc")]
    direction: String,

    /// Filter value as name=value; the value is parsed as JSON when possible.
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Show error detail.
    #[arg(long)]
    admin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::Run(args) => run(&config, &args).await,
        Command::Sql(args) => print_sql(&config, &args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quarry_engine=info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn data_source(config: &EngineConfig, args: &ReportArgs) -> Result<DataSource> {
    let source = builtin_source(&args.source).with_context(|| {
        format!(
            "unknown source '{}', expected one of: {}",
            args.source,
            BUILTIN_SOURCES.join(", ")
        )
    })?;
    let preferences = load_preferences(&args.preferences)?;
    let storage = create_storage(config)
        .await
        .context("failed to connect to database")?;

    let mut context = FilterContext::new(args.user_id)
        .with_groups(args.group_ids.clone())
        .with_admin(args.admin);
    if let Some(course_id) = args.course_id {
        context = context.with_course(course_id);
    }

    let mut ds = DataSource::new(source, storage, context)?
        .with_config(config.clone())
        .with_preferences(preferences)
        .with_page(args.page);
    if let Some(sort) = &args.sort {
        let direction: SortDirection = args.direction.parse()?;
        ds = ds.with_sort(sort.as_str(), direction);
    }

    ds.init().await.context("failed to load filter options")?;

    let cache = create_cache(config)?;
    if ds.filters_mut().load_cache(cache.as_ref()).await? {
        info!(source = %args.source, "restored cached filter state");
    }
    let mut applied = 0;
    for raw in &args.filters {
        let (name, value) = parse_filter(raw)?;
        if ds.apply_filter(&name, value)? {
            applied += 1;
        }
    }
    if applied > 0 {
        ds.filters().cache(cache.as_ref()).await?;
    }

    Ok(ds)
}

async fn run(config: &EngineConfig, args: &ReportArgs) -> Result<()> {
    let mut ds = data_source(config, args).await?;
    match ds.get_data().await {
        Ok(rows) => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        Err(e) => anyhow::bail!(e.user_message(args.admin)),
    }
}

async fn print_sql(config: &EngineConfig, args: &ReportArgs) -> Result<()> {
    let ds = data_source(config, args).await?;
    let query = ds.get_query()?;
    let dialect = ds.dialect();

    let (sql, params) = query.build_sql(dialect)?;
    println!("-- data\n{sql};\n-- params: {}", serde_json::to_string(&params)?);

    let (count_sql, count_params) = count_query(query, true).build_sql(dialect)?;
    println!(
        "-- count\n{count_sql};\n-- params: {}",
        serde_json::to_string(&count_params)?
    );
    Ok(())
}

fn load_preferences(path: &Path) -> Result<Preferences> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read preferences from {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid preferences in {}", path.display()))
}

fn parse_filter(raw: &str) -> Result<(String, JsonValue)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("filter '{raw}' must be name=value"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::from(value));
    Ok((name.trim().to_string(), value))
}
