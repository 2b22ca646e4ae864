//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{Engine, EngineOptions, EngineParts, LiveAccess, COPY_LEDGER_ID};
use crate::filter::{kelly_size, Direction, KellySizing, Prediction, SignalSizer};
use crate::persistence::{JsonFileStore, Persistence};
use crate::position::Position;
use crate::strategy::{GridLevel, GridParams, GridStrategy, LevelSpacing, StrategyConfig};

/// Status line interval while running
const STATUS_INTERVAL_SECS: u64 = 60;

/// Flags of the `run` command
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub live: bool,
    pub yes: bool,
    pub no_copy: bool,
    pub no_strategies: bool,
}

/// Run the engine until Ctrl-C
pub async fn run(config: &Config, opts: RunOptions) -> Result<()> {
    let mut config = config.clone();
    let live = if opts.live {
        if config.execution.dry_run {
            anyhow::bail!("--live requires execution.dry_run = false in the configuration");
        }
        if !opts.yes {
            let confirmed = Confirm::new()
                .with_prompt("Start LIVE trading? Swaps will be signed and submitted on-chain.")
                .default(false)
                .interact()?;
            if !confirmed {
                info!("Live start cancelled by user");
                return Ok(());
            }
        }
        warn!("LIVE mode: real swaps will be executed");
        Some(LiveAccess::connect(&config.chain).context("Failed to set up live execution")?)
    } else {
        if !config.execution.dry_run {
            warn!("execution.dry_run = false but --live was not given; running dry");
            config.execution.dry_run = true;
        }
        info!("Running in DRY-RUN mode - swaps are quoted but simulated");
        None
    };

    let options = EngineOptions {
        strategies: !opts.no_strategies,
        copy_trading: !opts.no_copy,
    };
    let parts = EngineParts::from_config(&config, options, live).await?;
    let engine = Engine::start(config, options, parts)
        .await
        .context("Failed to start engine")?;

    let mut status_timer = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    status_timer.tick().await;
    loop {
        tokio::select! {
            _ = status_timer.tick() => {
                let status = engine.status().await;
                info!(
                    "Status: {} strategies ({} active), {} scheduled, {} pending, {} executed ({:.0}% ok)",
                    status.strategies.strategies,
                    status.strategies.active,
                    status.scheduler.scheduled,
                    status.scheduler.pending,
                    status.executor.total,
                    status.executor.success_rate * 100.0
                );
                if let Some(copy) = &status.copy_trading {
                    info!(
                        "Copy-trading: {} received, {} scheduled, {} skipped, {} active",
                        copy.received, copy.scheduled, copy.skipped, copy.active_copies
                    );
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Received shutdown signal");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Show stored positions and realized P&L per ledger
pub async fn status(config: &Config) -> Result<()> {
    let store = JsonFileStore::open(&config.persistence.data_dir).await?;

    let mut ledgers: Vec<String> = config
        .strategies
        .iter()
        .map(|s| s.strategy_id.clone())
        .collect();
    for stored in store.load_strategy_configs().await? {
        if !ledgers.contains(&stored.strategy_id) {
            ledgers.push(stored.strategy_id);
        }
    }
    ledgers.push(COPY_LEDGER_ID.to_string());

    println!("\n=== SWAPFLOW STATUS ===\n");
    let mut any = false;
    for ledger in &ledgers {
        let positions = store.load_positions(ledger).await?;
        if positions.is_empty() {
            continue;
        }
        any = true;
        print_ledger(ledger, &positions);
    }
    if !any {
        println!("No stored positions.");
    }
    println!();
    Ok(())
}

fn print_ledger(ledger: &str, positions: &[Position]) {
    let open: Vec<&Position> = positions.iter().filter(|p| p.is_open()).collect();
    let realized: f64 = positions.iter().filter_map(|p| p.realized_pnl).sum();
    let allocated: f64 = open.iter().map(|p| p.cost_basis).sum();
    println!(
        "{}: {} open ({:.2} allocated), {} closed, realized P&L {:+.2}",
        ledger,
        open.len(),
        allocated,
        positions.len() - open.len(),
        realized
    );
    for p in open {
        println!(
            "  {:<10} {:>18.6} tokens @ {:<12.6} cost {:>10.2}  SL {}  TP {}",
            p.token_symbol,
            p.token_amount,
            p.entry_price,
            p.cost_basis,
            p.stop_loss_price
                .map(|v| format!("{:.6}", v))
                .unwrap_or_else(|| "-".into()),
            p.take_profit_price
                .map(|v| format!("{:.6}", v))
                .unwrap_or_else(|| "-".into()),
        );
    }
}

/// Explain a fractional Kelly sizing with the configured coefficients
pub fn kelly(config: &Config, confidence: f64, expected_return: f64, risk: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        anyhow::bail!("confidence must be between 0 and 1");
    }
    let sizing = &config.sizing;
    let result = kelly_size(
        confidence,
        expected_return,
        risk,
        sizing.kelly_fraction,
        sizing.max_position_size_pct,
    );
    let sizer = SignalSizer::new(sizing.clone());
    let direction = if expected_return > 0.0 {
        Direction::Up
    } else if expected_return < 0.0 {
        Direction::Down
    } else {
        Direction::Neutral
    };
    let signal_type = sizer.classify(&Prediction {
        direction,
        confidence,
        predicted_return: expected_return,
        predicted_price: None,
    });

    println!(
        "{}",
        explain_kelly(confidence, &result, sizing.kelly_fraction, sizing.max_position_size_pct)
    );
    println!("Signal:      {}", signal_type);
    Ok(())
}

fn explain_kelly(confidence: f64, k: &KellySizing, fraction: f64, max_pct: f64) -> String {
    let q = 1.0 - confidence;
    let capped = if k.fractional > max_pct { " (capped)" } else { "" };
    format!(
        "Payoff b:    {:.4}\n\
         Kelly:       ({:.4} x {:.4} - {:.4}) / {:.4} = {:.4}\n\
         Fractional:  {:.4} x {} = {:.4}\n\
         Position:    {:.2}% of portfolio{}",
        k.b,
        k.b,
        confidence,
        q,
        k.b,
        k.kelly,
        k.kelly,
        fraction,
        k.fractional,
        k.position_size * 100.0,
        capped
    )
}

/// Print the level table a grid strategy would build around `price`
pub fn grid(
    lower: f64,
    upper: f64,
    levels: u32,
    spacing: &str,
    price: f64,
    budget: f64,
) -> Result<()> {
    let table = grid_levels(lower, upper, levels, spacing, price, budget)?;
    println!("{:<6} {:>16} {:<5} {:>12}", "LEVEL", "PRICE", "SIDE", "AMOUNT");
    println!("{}", "-".repeat(42));
    for level in table.iter().rev() {
        println!(
            "{:<6} {:>16.8} {:<5} {:>12.2}",
            level.index,
            level.price,
            format!("{:?}", level.side).to_uppercase(),
            level.amount
        );
    }
    Ok(())
}

fn grid_levels(
    lower: f64,
    upper: f64,
    levels: u32,
    spacing: &str,
    price: f64,
    budget: f64,
) -> Result<Vec<GridLevel>> {
    // Validates the spacing name before it reaches the params
    spacing.parse::<LevelSpacing>()?;
    let mut config = StrategyConfig::new("grid-preview", "grid", "")
        .with_param("lower_price", lower)
        .with_param("upper_price", upper)
        .with_param("num_levels", levels)
        .with_param("level_spacing", spacing);
    config.total_budget = budget;
    config.max_position_size = budget;

    let mut grid = GridStrategy::new(GridParams::from_config(&config)?);
    grid.initialize(price, &config.strategy_id)?;
    Ok(grid.levels().to_vec())
}

/// Print persisted execution results, newest first
pub async fn history(config: &Config, limit: usize) -> Result<()> {
    let store = JsonFileStore::open(&config.persistence.data_dir).await?;
    let executions = store.load_executions(limit).await?;

    println!("\n=== EXECUTION HISTORY ===\n");
    if executions.is_empty() {
        println!("No executions recorded.");
        return Ok(());
    }
    println!(
        "{:<20} {:<14} {:<5} {:<10} {:>14} {:>14} {:<8} {}",
        "TIME", "LEDGER", "SIDE", "TOKEN", "IN", "OUT", "RESULT", "DETAIL"
    );
    println!("{}", "-".repeat(110));
    for r in executions {
        let outcome = match (r.success, r.is_dry_run) {
            (true, true) => "SIM",
            (true, false) => "OK",
            (false, _) => "FAIL",
        };
        let detail = match (&r.booking_error, r.success) {
            (Some(e), true) => format!("unbooked: {}", e),
            (None, true) => r.tx_hash.clone().unwrap_or_default(),
            (_, false) => r.error_code.clone().unwrap_or_default(),
        };
        println!(
            "{:<20} {:<14} {:<5} {:<10} {:>14.4} {:>14.4} {:<8} {}",
            r.finished_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&r.ledger_id, 14),
            r.side.to_string(),
            truncate(&r.token_symbol, 10),
            r.amount_in,
            r.amount_out,
            outcome,
            detail
        );
    }
    println!();
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
