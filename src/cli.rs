//! CLI definition and dispatch.

use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::paper_broker::PaperBroker;
use crate::adapters::replay_feed::ReplayFeed;
use crate::domain::backtest::{self as backtest_engine, BacktestResult};
use crate::domain::config_validation::{load_desk_config, DeskConfig};
use crate::domain::error::DeskError;
use crate::domain::ledger::PositionLedger;
use crate::domain::live::{shared_ledger, LiveDriver};
use crate::domain::metrics::Metrics;
use crate::domain::ohlcv::PriceBar;
use crate::domain::signal::{signals_for_bars, CombinationRule, Combined, Signal, SignalSource, SignalTape};
use crate::domain::timeline::build_timeline;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "riskdesk", about = "Signal-to-trade execution and risk engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Where bars, signals and settings come from.
#[derive(Args, Debug, Clone)]
pub struct Inputs {
    /// Directory of `<INSTRUMENT>.csv` bar files
    #[arg(short, long)]
    pub data: PathBuf,
    /// Signal file; repeat to combine several sources under `[signals] combine`
    #[arg(short, long = "signals")]
    pub signals: Vec<PathBuf>,
    /// INI settings file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay historical bars and signals deterministically
    Backtest {
        #[command(flatten)]
        inputs: Inputs,
        /// Directory for trades.csv, equity.csv and summary.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay the same inputs through the polling driver and a paper broker
    Paper {
        #[command(flatten)]
        inputs: Inputs,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check settings and input data without trading
    Validate {
        #[command(flatten)]
        inputs: Inputs,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Backtest { inputs, output } => run_backtest(&inputs, output.as_deref()),
        Command::Paper { inputs, output } => run_paper(&inputs, output.as_deref()),
        Command::Validate { inputs } => run_validate(&inputs),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

/// Settings from `path` (or defaults), with `RISKDESK_*` environment
/// overrides layered on top.
pub fn load_config(path: Option<&Path>) -> Result<DeskConfig, DeskError> {
    let adapter = match path {
        Some(p) => {
            eprintln!("Loading config from {}", p.display());
            FileConfigAdapter::from_file(p)?
        }
        None => FileConfigAdapter::empty(),
    };
    load_desk_config(&adapter.with_env_overrides())
}

/// Every bar the data source serves, instrument by instrument.
pub fn load_bars(data: &dyn DataPort) -> Result<Vec<PriceBar>, DeskError> {
    let mut bars = Vec::new();
    for instrument in data.list_instruments()? {
        let fetched = data.fetch_bars(&instrument)?;
        if fetched.is_empty() {
            warn!(instrument = %instrument, "no bars");
        }
        bars.extend(fetched);
    }
    Ok(bars)
}

/// A single signal set passes through untouched; several are replayed as
/// [`SignalTape`]s under a [`Combined`] source.
pub fn merge_signal_sets(
    bars: &[PriceBar],
    sets: Vec<Vec<Signal>>,
    rule: CombinationRule,
) -> Result<Vec<Signal>, DeskError> {
    if sets.len() <= 1 {
        return Ok(sets.into_iter().flatten().collect());
    }

    let mut sources: Vec<Box<dyn SignalSource + Send>> = Vec::with_capacity(sets.len());
    for (i, set) in sets.iter().enumerate() {
        sources.push(Box::new(SignalTape::new(format!("source-{}", i + 1), set)?));
    }
    let mut combined = Combined::new("combined", sources, rule);
    info!(
        sources = combined.source_count(),
        rule = ?combined.rule(),
        "combining signal sources"
    );
    Ok(signals_for_bars(bars, &mut combined))
}

fn load_inputs(inputs: &Inputs, config: &DeskConfig) -> Result<(Vec<PriceBar>, Vec<Signal>), DeskError> {
    let adapter = inputs
        .signals
        .iter()
        .fold(CsvAdapter::new(inputs.data.clone()), |a, p| a.with_signals(p.clone()));

    let bars = load_bars(&adapter)?;
    let signals = merge_signal_sets(&bars, adapter.fetch_signal_sets()?, config.combine)?;
    eprintln!("Loaded {} bars and {} signals", bars.len(), signals.len());
    Ok((bars, signals))
}

fn run_backtest(inputs: &Inputs, output: Option<&Path>) -> Result<(), DeskError> {
    let config = load_config(inputs.config.as_deref())?;
    let (bars, signals) = load_inputs(inputs, &config)?;

    let result = backtest_engine::run_backtest(&bars, &signals, &config.backtest)?;
    print_summary(&result);
    write_report(&result, output)
}

fn run_paper(inputs: &Inputs, output: Option<&Path>) -> Result<(), DeskError> {
    let config = load_config(inputs.config.as_deref())?;
    let (bars, signals) = load_inputs(inputs, &config)?;
    let feed = ReplayFeed::new(&bars, &signals)?;
    let unmatched = feed.unmatched_signals();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let ledger = shared_ledger(PositionLedger::new(
            config.backtest.limits,
            config.backtest.bracket,
        ));
        let driver = LiveDriver::new(
            Arc::clone(&ledger),
            Arc::new(PaperBroker::new()),
            Arc::new(feed),
            config.live,
        );

        let (tx, rx) = watch::channel(false);
        let signal_task = tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown requested");
            let _ = tx.send(true);
        });

        driver.reconcile().await?;
        let outcome = driver.run(rx).await;
        signal_task.abort();
        outcome?;

        let ledger = ledger.lock().await;
        let result = BacktestResult::from_ledger(&ledger, unmatched, config.backtest.annualization_factor);
        print_summary(&result);
        write_report(&result, output)
    })
}

fn run_validate(inputs: &Inputs) -> Result<(), DeskError> {
    let config = load_config(inputs.config.as_deref())?;
    eprintln!("Config validated successfully");
    eprintln!("  capital:            {:.2}", config.backtest.limits.capital());
    eprintln!("  risk per trade:     {}%", config.backtest.limits.max_risk_per_trade());
    eprintln!("  max daily loss:     {}%", config.backtest.limits.max_daily_loss());
    eprintln!("  max open positions: {}", config.backtest.limits.max_open_positions());
    eprintln!("  intrabar policy:    {:?}", config.backtest.bracket.intrabar);
    eprintln!("  commission:         {}%", config.backtest.bracket.commission_pct());
    eprintln!("  combine rule:       {:?}", config.combine);

    let (bars, signals) = load_inputs(inputs, &config)?;
    let timeline = build_timeline(&bars, &signals)?;
    eprintln!(
        "Data validated: {} timestamps, {} unmatched signals",
        timeline.slices.len(),
        timeline.unmatched_signals
    );
    Ok(())
}

fn write_report(result: &BacktestResult, output: Option<&Path>) -> Result<(), DeskError> {
    let Some(dir) = output else {
        return Ok(());
    };
    CsvReportAdapter::new(dir.to_path_buf()).write(result)?;
    println!("{}", dir.display());
    eprintln!("Report written to: {}", dir.display());
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m: &Metrics = &result.metrics;
    eprintln!("\n=== Results ===");
    eprintln!("Final Equity:     {:.2}", m.final_equity);
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    match m.sharpe_ratio {
        Some(s) => eprintln!("Sharpe Ratio:     {s:.2}"),
        None => eprintln!("Sharpe Ratio:     none"),
    }
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    eprintln!("Commission:       {:.2}", m.total_commission);
    eprintln!("Rejected Entries: {}", result.rejections.len());
    if result.unmatched_signals > 0 {
        eprintln!("Unmatched Signals: {}", result.unmatched_signals);
    }

    if !m.per_instrument.is_empty() {
        eprintln!("\n=== Per-Instrument Summary ===");
        for s in &m.per_instrument {
            let sign = if s.total_pnl >= 0.0 { "+" } else { "" };
            eprintln!(
                "  {}:  {} trades, {:.1}% win rate, {}{:.2}",
                s.instrument,
                s.trades,
                s.win_rate * 100.0,
                sign,
                s.total_pnl,
            );
        }
    }
}

/// Resolves when `signal` fires. A handler that failed to install never
/// resolves, so it cannot pass for a shutdown request.
async fn wait_for<F>(signal: F, name: &str)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, signal = name, "failed to install signal handler");
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = wait_for(tokio::signal::ctrl_c(), "Ctrl+C");

    #[cfg(unix)]
    let terminate = wait_for(
        async {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate())?.recv().await;
            Ok::<(), std::io::Error>(())
        },
        "SIGTERM",
    );

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn failed_handler_never_requests_shutdown() {
        let failed = wait_for(async { Err::<(), _>(std::io::Error::other("no signal support")) }, "test");
        assert!(tokio::time::timeout(Duration::from_millis(20), failed).await.is_err());
    }

    #[tokio::test]
    async fn delivered_signal_resolves() {
        let delivered = wait_for(async { Ok::<(), std::io::Error>(()) }, "test");
        assert!(tokio::time::timeout(Duration::from_millis(20), delivered).await.is_ok());
    }
}
