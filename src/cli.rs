//! CLI definition and dispatch.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_signal_adapter::CsvSignalAdapter;
use crate::adapters::deadline::with_deadline;
use crate::adapters::export_adapter::{ExportAdapter, DECISION_FILE};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{
    run_backtest, BacktestResult, BuyAndHold, DecisionPolicy, RegimePolicy, TechnicalPolicy,
};
use crate::domain::config::AppConfig;
use crate::domain::decision::Signals;
use crate::domain::error::SignalfuseError;
use crate::domain::ohlcv::PriceSeries;
use crate::domain::pipeline::{run_pipeline, FusionPolicy, PipelineConfig, SignalSources};
use crate::domain::regime::RegimeDetector;
use crate::ports::data_port::PriceProvider;
use crate::ports::report_port::ReportPort;
use crate::ports::signal_port::{FundamentalsProvider, SignalHistory};

#[derive(Parser, Debug)]
#[command(
    name = "signalfuse",
    about = "Trading signal fusion, regime detection and backtesting"
)]
pub struct Cli {
    /// Log filter, e.g. `info` or `signalfuse=debug`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    BuyAndHold,
    Technical,
    Regime,
    Fusion,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over a price file
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Price CSV, or a directory holding `<symbol>_<timeframe>.csv`
        #[arg(short, long)]
        data: PathBuf,
        /// Recorded signals CSV (required by the fusion policy)
        #[arg(long)]
        signals: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "buy-and-hold")]
        policy: PolicyKind,
        /// Directory for the equity curve and metrics artifacts
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fit the regime model and report the current regime
    Regime {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        /// Print the label of every bar as `date,label`
        #[arg(long)]
        series: bool,
    },
    /// Fuse every available signal for the latest bar
    Decide {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        signals: Option<PathBuf>,
        /// Signal override, e.g. `--signal ml_prob_up=0.7`
        #[arg(long = "signal", value_name = "KEY=VALUE")]
        signal: Vec<String>,
        /// Directory for the decision snapshot
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List symbols available in a price directory
    Symbols {
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long, default_value = "1d")]
        timeframe: String,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            data,
            signals,
            policy,
            output,
        } => run_backtest_command(&config, &data, signals.as_deref(), policy, output.as_deref()),
        Command::Regime {
            config,
            data,
            series,
        } => run_regime(&config, &data, series),
        Command::Decide {
            config,
            data,
            signals,
            signal,
            output,
        } => run_decide(&config, &data, signals.as_deref(), &signal, output.as_deref()),
        Command::Symbols { data, timeframe } => run_symbols(&data, &timeframe),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: SignalfuseError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        fail(SignalfuseError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
    })
}

/// Load prices from a single file, or from `<symbol>_<timeframe>.csv` when
/// `data` is a directory.
pub fn load_series(data: &Path, config: &AppConfig) -> Result<PriceSeries, SignalfuseError> {
    if data.is_dir() {
        CsvAdapter::new(data.to_path_buf()).fetch(&config.symbol, &config.timeframe)
    } else {
        CsvAdapter::load_file(data)
    }
}

/// Parse `key=value` override arguments.
pub fn parse_overrides(args: &[String]) -> Result<Signals, SignalfuseError> {
    let pairs = args
        .iter()
        .map(|arg| {
            arg.split_once('=').ok_or_else(|| SignalfuseError::invalid(
                "cli",
                "signal",
                format!("expected KEY=VALUE (got '{}')", arg),
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Signals::from_pairs(pairs))
}

fn print_backtest_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\nPolicy:             {}", result.policy);
    if let (Some(start), Some(end)) = (result.start_date(), result.end_date()) {
        eprintln!("Period:             {} .. {}", start, end);
    }
    eprintln!("Initial capital:    {:.2}", result.initial_capital);
    eprintln!("Final equity:       {:.2}", result.final_equity);
    eprintln!("Total return:       {:.2}%", m.total_return * 100.0);
    eprintln!("CAGR:               {:.2}%", m.cagr * 100.0);
    eprintln!("Sharpe:             {:.3}", m.sharpe);
    eprintln!("Sortino:            {:.3}", m.sortino);
    eprintln!("Max drawdown:       {:.2}%", m.max_drawdown * 100.0);
    eprintln!("Fills:              {}", result.fills);
    eprintln!(
        "Round trips:        {} ({} won, {} lost)",
        m.trade_count, m.trades_won, m.trades_lost
    );
    eprintln!("Win rate:           {:.1}%", m.win_rate * 100.0);
    for guard in &result.numeric_guards {
        eprintln!("note: {} guarded ({})", guard.metric, guard.detail);
    }
}

fn run_backtest_command(
    config_path: &Path,
    data: &Path,
    signals_path: Option<&Path>,
    policy_kind: PolicyKind,
    output: Option<&Path>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let config = match AppConfig::from_port(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    eprintln!("Loading prices from {}", data.display());
    let series = match load_series(data, &config) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    eprintln!(
        "Loaded {} bars ({} .. {})",
        series.len(),
        series.bars()[0].date,
        series.last().date
    );

    let history = match signals_path.map(CsvSignalAdapter::from_file).transpose() {
        Ok(h) => h,
        Err(e) => return fail(e),
    };

    let mut technical;
    let mut regime;
    let mut fusion;
    let mut buy_and_hold = BuyAndHold;
    let policy: &mut dyn DecisionPolicy = match policy_kind {
        PolicyKind::BuyAndHold => &mut buy_and_hold,
        PolicyKind::Technical => {
            technical = TechnicalPolicy::new(&series, adapter.fundamentals(&config.symbol));
            &mut technical
        }
        PolicyKind::Regime => {
            regime = RegimePolicy::new(config.regime.clone(), config.refit_every);
            &mut regime
        }
        PolicyKind::Fusion => {
            let Some(history) = history.as_ref() else {
                eprintln!("error: the fusion policy needs --signals");
                return ExitCode::from(2);
            };
            eprintln!("Replaying {} recorded signal rows", history.len());
            fusion = FusionPolicy::new(
                history as &dyn SignalHistory,
                config.fusion,
                Some(RegimePolicy::new(config.regime.clone(), config.refit_every)),
            );
            &mut fusion
        }
    };

    eprintln!("Running backtest ({})...", policy.name());
    let result = match run_backtest(&series, policy, &config.backtest) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };
    print_backtest_summary(&result);

    if let Some(dir) = output {
        if let Err(e) = ExportAdapter::new().write_backtest(&result, dir) {
            return fail(e);
        }
        eprintln!("\nArtifacts written to {}", dir.display());
    }
    ExitCode::SUCCESS
}

fn run_regime(config_path: &Path, data: &Path, print_series: bool) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let config = match AppConfig::from_port(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let series = match load_series(data, &config) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    let mut detector = RegimeDetector::new(config.regime.clone());
    let report = match detector.fit(&series) {
        Ok(model) => {
            if model.is_degenerate() {
                eprintln!("note: fitted states are indistinguishable; reporting SIDEWAYS");
            }
            model.report().clone()
        }
        Err(e) => return fail(e),
    };
    eprintln!(
        "Fitted {} states ({}) in {} iterations, log-likelihood {:.3}{}",
        config.regime.n_states,
        config.regime.covariance,
        report.iterations,
        report.log_likelihood,
        if report.converged { "" } else { " (not converged)" }
    );

    if print_series {
        let points = match detector.predict_series(&series) {
            Ok(p) => p,
            Err(e) => return fail(e),
        };
        println!("date,regime");
        for point in points {
            println!("{},{}", point.date, point.label);
        }
        return ExitCode::SUCCESS;
    }

    match detector.predict_latest(&series) {
        Ok(label) => {
            println!("{} {}", series.last().date, label);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn run_decide(
    config_path: &Path,
    data: &Path,
    signals_path: Option<&Path>,
    overrides: &[String],
    output: Option<&Path>,
) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => Arc::new(a),
        Err(code) => return code,
    };
    let config = match AppConfig::from_port(adapter.as_ref()) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let overrides = match parse_overrides(overrides) {
        Ok(o) => o,
        Err(e) => return fail(e),
    };
    let series = match load_series(data, &config) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    let as_of = series.last().date;
    let (mut sources, recorded_regime) =
        match signals_path.map(CsvSignalAdapter::from_file).transpose() {
            Ok(Some(history)) => (
                history.sources_as_of(as_of),
                history.signals_as_of(as_of).regime,
            ),
            Ok(None) => (SignalSources::default(), None),
            Err(e) => return fail(e),
        };
    // A recorded regime stands in for the fitted one unless overridden.
    let overrides = Signals {
        regime: overrides.regime.or(recorded_regime),
        ..overrides
    };
    sources.fundamentals = Some(adapter as Arc<dyn FundamentalsProvider>);
    let sources = with_deadline(&sources, config.provider_timeout);

    let pipeline = PipelineConfig {
        symbol: config.symbol.clone(),
        regime: config.regime.clone(),
        weights: config.fusion,
        observation_features: config.environment.features.clone(),
    };
    let out = run_pipeline(&series, &sources, &pipeline, &overrides);

    eprintln!("Symbol:     {}", out.symbol);
    eprintln!("As of:      {} (close {:.2})", out.as_of, out.close);
    eprintln!(
        "Technical:  {} ({:.2}) {}",
        out.technical.action,
        out.technical.score,
        out.technical.explanation_text()
    );
    match out.signals.regime {
        Some(label) => eprintln!("Regime:     {}", label),
        None => eprintln!(
            "Regime:     unavailable ({})",
            out.regime_note.as_deref().unwrap_or("no reason given")
        ),
    }
    if let Some(summary) = &out.news_summary {
        eprintln!("News:       {}", summary);
    }
    println!(
        "{} score={:.2} confidence={:.2} | {}",
        out.decision.action,
        out.decision.score,
        out.decision.confidence,
        out.decision.explanation_text()
    );

    if let Some(dir) = output {
        let path = dir.join(DECISION_FILE);
        if let Err(e) = ExportAdapter::new().write_decision(&out, &path) {
            return fail(e);
        }
        eprintln!("Snapshot written to {}", path.display());
    }
    ExitCode::SUCCESS
}

fn run_symbols(data: &Path, timeframe: &str) -> ExitCode {
    match CsvAdapter::new(data.to_path_buf()).list_symbols(timeframe) {
        Ok(symbols) if symbols.is_empty() => {
            eprintln!("No {} price files in {}", timeframe, data.display());
            ExitCode::SUCCESS
        }
        Ok(symbols) => {
            for symbol in symbols {
                println!("{}", symbol);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let config = match AppConfig::from_port(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    eprintln!("  symbol:        {} ({})", config.symbol, config.timeframe);
    eprintln!(
        "  backtest:      capital {:.2}, cost {}, size {}, warmup {}",
        config.backtest.initial_capital,
        config.backtest.transaction_cost,
        config.backtest.position_size_fraction,
        config.backtest.warmup_bars
    );
    eprintln!(
        "  regime:        {} states, {} covariance, refit every {} bars",
        config.regime.n_states, config.regime.covariance, config.refit_every
    );
    eprintln!(
        "  environment:   features {}",
        config
            .environment
            .features
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    eprintln!(
        "  fusion:        buy >= {}, sell <= {}",
        config.fusion.buy_threshold, config.fusion.sell_threshold
    );
    eprintln!(
        "  providers:     timeout {} ms",
        config.provider_timeout.as_millis()
    );
    eprintln!("Config is valid.");
    ExitCode::SUCCESS
}
