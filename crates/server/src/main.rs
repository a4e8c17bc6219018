//! Strategy Lab: natural-language strategy backtesting from the command line
//!
//! Usage:
//!   strategy-lab run --strategy "buy the golden cross"  : Run a backtest
//!   strategy-lab history                                : List stored runs
//!   strategy-lab show <hash>                            : Print a stored report
//!   strategy-lab prune --keep 50                        : Trim run history

mod config;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use clap::{Parser, Subcommand};
use engine::{
    BacktestRequest, BacktestResponse, BacktestRunner, CsvDataProvider, DataProvider,
    FixedStrategyConverter, LlmStrategyConverter, RunConfig, StrategyConverter,
    SyntheticDataProvider, Timeframe,
};
use persistence::BacktestRunRecord;
use tracing::{error, info, warn};

use crate::config::AppConfig;

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_DESCRIBE"));

#[derive(Parser)]
#[command(name = "strategy-lab")]
#[command(version = APP_VERSION)]
#[command(about = "Backtest natural-language trading strategies", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a strategy description and backtest it
    Run {
        /// Strategy in plain language
        #[arg(short, long)]
        strategy: String,
        /// Asset symbol (aliases such as BTC or GOLD are accepted)
        #[arg(long, default_value = "BTCUSD")]
        symbol: String,
        /// Bar timeframe: 1m, 5m, 15m, 30m, 1h, 4h, 1d
        #[arg(long, default_value = "1m")]
        timeframe: String,
        /// Starting capital
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        /// Commission per side, in percent
        #[arg(long, default_value_t = 0.1)]
        commission: f64,
        /// Stop-loss percent, overriding the converted strategy
        #[arg(long)]
        stop_loss: Option<f64>,
        /// Take-profit percent, overriding the converted strategy
        #[arg(long)]
        take_profit: Option<f64>,
        /// Directory of <SYMBOL>.csv files (overrides STRATEGY_LAB_DATA_DIR)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Number of synthetic bars when no CSV data is used
        #[arg(long)]
        bars: Option<usize>,
        /// Seed for synthetic data
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<PathBuf>,
        /// Do not store the run in history
        #[arg(long)]
        no_save: bool,
    },
    /// List recent runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print the stored report for a run
    Show {
        /// Params hash (as printed by `run` and `history`)
        hash: String,
    },
    /// Delete all but the most recent runs
    Prune {
        #[arg(long, default_value_t = 50)]
        keep: i64,
    },
}

struct RunArgs {
    strategy: String,
    symbol: String,
    timeframe: String,
    capital: f64,
    commission: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    data_dir: Option<PathBuf>,
    bars: Option<usize>,
    seed: u64,
    export: Option<PathBuf>,
    no_save: bool,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,strategy_lab=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,strategy_lab=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    block_on_detached(dispatch(&config, cli.command))?
}

/// Drive `future` on a fresh runtime, then drop the runtime without joining
/// blocking tasks. A core run abandoned by the request timeout keeps running
/// on its worker thread and would otherwise hold the process open.
fn block_on_detached<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

async fn dispatch(config: &AppConfig, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            strategy,
            symbol,
            timeframe,
            capital,
            commission,
            stop_loss,
            take_profit,
            data_dir,
            bars,
            seed,
            export,
            no_save,
        } => {
            let args = RunArgs {
                strategy,
                symbol,
                timeframe,
                capital,
                commission,
                stop_loss,
                take_profit,
                data_dir,
                bars,
                seed,
                export,
                no_save,
            };
            cmd_run(config, args).await?;
        }
        Commands::History { limit } => cmd_history(config, limit).await?,
        Commands::Show { hash } => cmd_show(config, &hash).await?,
        Commands::Prune { keep } => cmd_prune(config, keep).await?,
    }

    Ok(())
}

async fn open_database(config: &AppConfig) -> anyhow::Result<persistence::Database> {
    persistence::Database::new(&config.db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })
}

fn build_converter(config: &AppConfig) -> Arc<dyn StrategyConverter> {
    match &config.llm {
        Some(llm) => match LlmStrategyConverter::new(llm.clone()) {
            Ok(converter) => {
                info!(model = %llm.model, "Using LLM strategy converter");
                return Arc::new(converter);
            }
            Err(e) => warn!("LLM converter unavailable ({}), using default strategy", e),
        },
        None => warn!("No LLM_API_KEY configured, using default SMA crossover strategy"),
    }
    Arc::new(FixedStrategyConverter::default())
}

// ============================================================================
// Run command
// ============================================================================

async fn cmd_run(config: &AppConfig, args: RunArgs) -> anyhow::Result<()> {
    println!("\n=== Strategy Lab v{} ===", APP_VERSION);

    let timeframe: Timeframe = args.timeframe.parse()?;
    let mut synthetic = SyntheticDataProvider::new(args.seed);
    if let Some(bars) = args.bars {
        synthetic = synthetic.with_bars(bars);
    }
    let synthetic = Arc::new(synthetic);

    let provider: Arc<dyn DataProvider> = match args.data_dir.or_else(|| config.data_dir.clone()) {
        Some(dir) => {
            info!(dir = %dir.display(), "Reading CSV data");
            Arc::new(CsvDataProvider::new(dir))
        }
        None => synthetic.clone(),
    };

    let runner = BacktestRunner::new(build_converter(config), provider, synthetic)
        .with_timeout(config.timeout);

    let request = BacktestRequest::new(
        args.strategy,
        RunConfig {
            assets: vec![args.symbol],
            initial_capital: args.capital,
            stop_loss: args.stop_loss,
            take_profit: args.take_profit,
            commission: args.commission,
            timeframe,
            ..RunConfig::default()
        },
    );

    let response = runner.run(&request).await?;
    print_response(&response);

    if let Some(path) = &args.export {
        let json = serde_json::to_string_pretty(&response)?;
        std::fs::write(path, json)?;
        println!("\nResults exported to {}", path.display());
    }

    if !args.no_save {
        let db = open_database(config).await?;
        let record = to_record(&request, &response)?;
        db.runs()
            .save(&record)
            .await
            .map_err(|e| anyhow::anyhow!("Saving run failed: {}", e))?;
        println!("\nSaved as {}", response.params_hash);
    }

    Ok(())
}

fn print_response(response: &BacktestResponse) {
    let m = &response.results;
    let logic = &response.parsed_strategy.logic;

    println!(
        "Symbol: {} | Timeframe: {} | Bars: {} ({})",
        response.symbol, response.timeframe, response.data_points, response.data_source
    );
    println!("Entry: {}", logic.entry_conditions.join("; "));
    println!("Exit:  {}", logic.exit_conditions.join("; "));
    println!(
        "Risk:  stop {:.2}% / target {:.2}%",
        logic.risk_management.stop_loss, logic.risk_management.take_profit
    );
    if let Some(reason) = &response.fallback_reason {
        println!("\nFallback result: {}", reason);
    }

    println!("\n  {:<24} {:>14}", "Metric", "Value");
    println!("  {}", "-".repeat(39));
    let rows: [(&str, String); 14] = [
        ("Net profit", format!("{:+.2}", m.net_profit)),
        ("Profit factor", format!("{:.2}", m.profit_factor)),
        ("Total trades", m.total_trades.to_string()),
        ("Won / lost", format!("{} / {}", m.trades_won, m.trades_lost)),
        ("Win rate", format!("{:.1}%", m.win_rate * 100.0)),
        ("Avg win", format!("{:.2}", m.avg_win)),
        ("Avg loss", format!("{:.2}", m.avg_loss)),
        ("Sharpe", format!("{:.2}", m.sharpe_ratio)),
        ("Sortino", format!("{:.2}", m.sortino_ratio)),
        ("Calmar", format!("{:.2}", m.calmar_ratio)),
        ("Max drawdown", format!("{:.2}", m.max_drawdown)),
        ("Max DD (relative)", format!("{:.2}%", m.balance_drawdown_relative)),
        ("Max DD duration", format!("{} bars", m.max_drawdown_duration)),
        ("Volatility", format!("{:.2}", m.volatility)),
    ];
    for (label, value) in rows {
        println!("  {:<24} {:>14}", label, value);
    }
}

/// Non-finite metrics are stored as NULL
fn finite(value: f64) -> Option<f64> {
    Some(value).filter(|v| v.is_finite())
}

fn to_record(request: &BacktestRequest, response: &BacktestResponse) -> anyhow::Result<BacktestRunRecord> {
    let m = &response.results;
    Ok(BacktestRunRecord {
        id: None,
        params_hash: response.params_hash.clone(),
        strategy_description: request.strategy.clone(),
        parsed_strategy: serde_json::to_string(&response.parsed_strategy)?,
        symbol: response.symbol.clone(),
        timeframe: response.timeframe.to_string(),
        initial_capital: request.config.initial_capital,
        commission: request.config.commission,
        data_points: response.data_points as i64,
        data_source: response.data_source.to_string(),
        outcome: response.outcome.to_string(),
        fallback_reason: response.fallback_reason.clone(),
        net_profit: finite(m.net_profit),
        profit_factor: finite(m.profit_factor),
        sharpe_ratio: finite(m.sharpe_ratio),
        win_rate: finite(m.win_rate),
        max_drawdown: finite(m.max_drawdown),
        total_trades: m.total_trades as i64,
        metrics_json: serde_json::to_string(m)?,
        created_at: None,
    })
}

// ============================================================================
// History commands
// ============================================================================

fn fmt_metric(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

async fn cmd_history(config: &AppConfig, limit: i64) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let repo = db.runs();
    let runs = repo
        .get_recent(limit)
        .await
        .map_err(|e| anyhow::anyhow!("Loading history failed: {}", e))?;
    let stats = repo
        .get_stats()
        .await
        .map_err(|e| anyhow::anyhow!("Loading stats failed: {}", e))?;

    println!(
        "\n{} runs stored ({} fallback, {} symbols) in {}",
        stats.total_runs, stats.fallback_runs, stats.unique_symbols, config.db_path
    );
    if runs.is_empty() {
        return Ok(());
    }

    println!(
        "\n  {:<12} {:<17} {:<8} {:>4} {:>10} {:>6} {:>7} {:<9}",
        "Hash", "When", "Symbol", "TF", "Net", "Trades", "Sharpe", "Outcome"
    );
    println!("  {}", "-".repeat(80));
    for run in &runs {
        let when = run
            .created_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {:<12} {:<17} {:<8} {:>4} {:>10} {:>6} {:>7} {:<9}",
            &run.params_hash[..run.params_hash.len().min(12)],
            when,
            run.symbol,
            run.timeframe,
            fmt_metric(run.net_profit),
            run.total_trades,
            fmt_metric(run.sharpe_ratio),
            run.outcome,
        );
    }

    if let (Some(best), Some(hash)) = (stats.best_net_profit, &stats.best_params_hash) {
        println!("\nBest net profit: {:+.2} ({})", best, hash);
    }
    Ok(())
}

async fn cmd_show(config: &AppConfig, hash: &str) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let repo = db.runs();

    let record = match repo.get_by_hash(hash).await? {
        Some(record) => record,
        // allow the shortened hash printed by `history`
        None => {
            let mut matches = repo.find_by_hash_prefix(hash, 2).await?;
            if matches.len() > 1 {
                anyhow::bail!("Hash prefix {} matches more than one stored run", hash);
            }
            match matches.pop() {
                Some(record) => record,
                None => anyhow::bail!("No stored run matches {}", hash),
            }
        }
    };

    let strategy: serde_json::Value = serde_json::from_str(&record.parsed_strategy)?;
    let metrics: serde_json::Value = serde_json::from_str(&record.metrics_json)?;
    let report = serde_json::json!({
        "paramsHash": record.params_hash,
        "strategy": record.strategy_description,
        "symbol": record.symbol,
        "timeframe": record.timeframe,
        "initialCapital": record.initial_capital,
        "commission": record.commission,
        "dataPoints": record.data_points,
        "dataSource": record.data_source,
        "outcome": record.outcome,
        "fallbackReason": record.fallback_reason,
        "parsedStrategy": strategy,
        "results": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_prune(config: &AppConfig, keep: i64) -> anyhow::Result<()> {
    info!("Pruning run history, keeping the {} most recent", keep);
    let db = open_database(config).await?;
    let deleted = db
        .runs()
        .delete_older_than_keep(keep)
        .await
        .map_err(|e| anyhow::anyhow!("Prune failed: {}", e))?;
    info!("Done! Deleted {} runs.", deleted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{default_strategy, BacktestMetrics, DataSource, RunOutcome};

    fn response(net_profit: f64) -> BacktestResponse {
        BacktestResponse {
            results: BacktestMetrics {
                net_profit,
                sharpe_ratio: f64::NAN,
                total_trades: 3,
                ..BacktestMetrics::default()
            },
            trades: Vec::new(),
            parsed_strategy: default_strategy(),
            symbol: "BTCUSD".to_string(),
            timeframe: Timeframe::H1,
            data_points: 500,
            data_source: DataSource::Synthetic,
            outcome: RunOutcome::Completed,
            fallback_reason: None,
            params_hash: "deadbeef".to_string(),
        }
    }

    #[test]
    fn test_to_record_maps_fields() {
        let request = BacktestRequest::new("golden cross", RunConfig::default());
        let record = to_record(&request, &response(12.5)).unwrap();
        assert_eq!(record.params_hash, "deadbeef");
        assert_eq!(record.timeframe, "1h");
        assert_eq!(record.data_source, "synthetic");
        assert_eq!(record.outcome, "completed");
        assert_eq!(record.net_profit, Some(12.5));
        assert_eq!(record.sharpe_ratio, None);
        assert_eq!(record.total_trades, 3);
        assert!(record.parsed_strategy.contains("SMA_20"));
    }

    #[tokio::test]
    async fn test_record_round_trips_through_history() {
        let db = persistence::Database::in_memory().await.unwrap();
        let request = BacktestRequest::new("golden cross", RunConfig::default());
        let record = to_record(&request, &response(-4.0)).unwrap();
        db.runs().save(&record).await.unwrap();

        let stored = db.runs().get_by_hash("deadbeef").await.unwrap().unwrap();
        assert_eq!(stored.net_profit, Some(-4.0));
        // NaN metrics serialize as null
        let metrics: serde_json::Value = serde_json::from_str(&stored.metrics_json).unwrap();
        assert_eq!(metrics["totalTrades"], 3);
        assert!(metrics["sharpeRatio"].is_null());
    }

    #[test]
    fn test_exit_does_not_wait_for_abandoned_blocking_work() {
        let started = std::time::Instant::now();
        let output = block_on_detached(async {
            // stands in for a core run left behind by the request timeout
            drop(tokio::task::spawn_blocking(|| {
                std::thread::sleep(std::time::Duration::from_secs(5))
            }));
            7
        })
        .unwrap();

        assert_eq!(output, 7);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "strategy-lab",
            "run",
            "--strategy",
            "buy dips",
            "--symbol",
            "gold",
            "--stop-loss",
            "1.5",
            "--no-save",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                symbol,
                stop_loss,
                no_save,
                timeframe,
                ..
            } => {
                assert_eq!(symbol, "gold");
                assert_eq!(stop_loss, Some(1.5));
                assert!(no_save);
                assert_eq!(timeframe, "1m");
            }
            _ => panic!("expected run command"),
        }
    }
}
