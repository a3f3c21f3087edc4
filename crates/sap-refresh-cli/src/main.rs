//! SAP Refresh CLI - refresh SAP Analysis for Office reports in Excel

mod logging;

use anyhow::{bail, Context as _, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sap_refresh::workflow::{self, COLLECT_PROCESS, REFRESH_PROCESS};
use sap_refresh::{
    AppConfig, BatchSummary, BridgeLauncher, Context, ExcelBridgeConfig, LogNotifier, Notify,
    PeriodTokens, RetryPolicy, SecretCodec, SmtpNotifier, Status, SystemProcessKiller,
};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sap-refresh")]
#[command(
    author,
    version,
    about = "Refresh SAP Analysis for Office reports by driving Excel"
)]
struct Cli {
    /// Configuration workbook
    #[arg(long, env = "SAP_REFRESH_CONFIG", default_value = "config.xlsx", global = true)]
    config: PathBuf,

    /// Directory for the daily log files
    #[arg(long, default_value = "Logs", global = true)]
    log_dir: PathBuf,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to excel-com-bridge.exe (default: next to this binary)
    #[arg(long, global = true)]
    bridge_exe: Option<PathBuf>,

    /// WINE executable used to start the bridge
    #[arg(long, global = true, conflicts_with = "native")]
    wine: Option<PathBuf>,

    /// WINEPREFIX for the bridge
    #[arg(long, global = true)]
    wine_prefix: Option<PathBuf>,

    /// Start the bridge directly instead of through WINE
    #[arg(long, global = true)]
    native: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh every report due today
    Refresh {
        /// Run as if today were this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Refresh one configured report now, regardless of its schedule
    Report {
        /// Report file name as listed in the data_sources sheet
        filename: String,

        /// Date used for calendar tokens (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Export data source, variables and filters of reports
    Collect {
        /// A single report (default: every workbook in the data directory)
        report: Option<PathBuf>,
    },

    /// Encrypt a secret for the configuration workbook
    Encode {
        /// Secret to encrypt (default: first line of stdin)
        secret: Option<String>,
    },

    /// Print a new random key for the SAP_KEY variable
    GenKey,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let process = match &cli.command {
        Commands::GenKey => {
            println!("{}", SecretCodec::generate_key());
            return Ok(());
        }
        Commands::Encode { secret } => return encode(secret.as_deref()),
        Commands::Refresh { .. } | Commands::Report { .. } => REFRESH_PROCESS,
        Commands::Collect { .. } => COLLECT_PROCESS,
    };

    let guard = logging::init_logging(&cli.log_dir, cli.verbose)
        .with_context(|| format!("Failed to set up logging in '{}'", cli.log_dir.display()))?;
    let ctx = build_context(&cli, guard.log_file())?;

    let outcome = match &cli.command {
        Commands::Refresh { date } => refresh(&ctx, date.unwrap_or_else(today)),
        Commands::Report { filename, date } => {
            refresh_one(&ctx, filename, date.unwrap_or_else(today))
        }
        Commands::Collect { report } => collect(&ctx, report.as_deref()),
        Commands::GenKey | Commands::Encode { .. } => Ok(()),
    };

    if let Err(e) = &outcome {
        tracing::error!("{e:#}");
        if notifies_failure(&cli.command) {
            ctx.notify(Status::Error, process, &format!("{e:#}"));
        }
    }
    outcome
}

/// Whether a failure of `command` still needs an ERROR notification. The
/// scheduled batch notifies every failing report itself.
fn notifies_failure(command: &Commands) -> bool {
    !matches!(command, Commands::Refresh { .. })
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn build_context(cli: &Cli, log_file: &Path) -> Result<Context> {
    let codec = SecretCodec::from_env().context("Failed to read the encryption key")?;
    let config = AppConfig::load(&cli.config, &RetryPolicy::default())
        .with_context(|| format!("Failed to load '{}'", cli.config.display()))?;

    let mut bridge = ExcelBridgeConfig {
        bridge_exe_path: cli.bridge_exe.clone(),
        wine_prefix: cli.wine_prefix.clone(),
        ..Default::default()
    };
    if cli.native {
        bridge.wine_path = None;
    } else if let Some(wine) = &cli.wine {
        bridge.wine_path = Some(wine.clone());
    }

    let notifier: Box<dyn Notify> = match &config.settings.mail {
        Some(mail) => Box::new(SmtpNotifier::new(
            mail.clone(),
            codec.clone(),
            Some(log_file.to_path_buf()),
        )),
        None => {
            tracing::warn!("No mail server configured, notifications go to the log only");
            Box::new(LogNotifier)
        }
    };

    Ok(Context::new(
        config,
        codec,
        Box::new(BridgeLauncher::new(bridge)),
        Box::new(SystemProcessKiller::default()),
        notifier,
    ))
}

fn refresh(ctx: &Context, date: NaiveDate) -> Result<()> {
    let summary = workflow::refresh_auto_reports(ctx, date);
    report_summary("refreshed", &summary)
}

fn refresh_one(ctx: &Context, filename: &str, date: NaiveDate) -> Result<()> {
    let schedule = ctx
        .config
        .schedule(filename)
        .with_context(|| format!("'{filename}' is not listed in the data_sources sheet"))?;
    let path = workflow::refresh_report(ctx, schedule, &PeriodTokens::for_date(date))
        .with_context(|| format!("Failed to refresh '{filename}'"))?;
    println!("{}", path.display());
    Ok(())
}

fn collect(ctx: &Context, report: Option<&Path>) -> Result<()> {
    match report {
        Some(path) => {
            let exported = workflow::get_report_information(ctx, path)
                .with_context(|| format!("Failed to collect '{}'", path.display()))?;
            println!("{}", exported.display());
            ctx.notify(
                Status::Success,
                COLLECT_PROCESS,
                &format!("Information exported -> {}", exported.display()),
            );
            Ok(())
        }
        None => {
            let summary = workflow::collect_information(ctx)?;
            if summary.is_success() {
                ctx.notify(
                    Status::Success,
                    COLLECT_PROCESS,
                    &format!("Information exported for {} reports", summary.succeeded.len()),
                );
            }
            report_summary("exported", &summary)
        }
    }
}

fn report_summary(verb: &str, summary: &BatchSummary) -> Result<()> {
    for (name, path) in &summary.succeeded {
        println!("{verb}\t{name}\t{}", path.display());
    }
    for (name, error) in &summary.failed {
        eprintln!("failed\t{name}\t{error}");
    }
    if !summary.is_success() {
        bail!(
            "{} of {} reports failed",
            summary.failed.len(),
            summary.failed.len() + summary.succeeded.len()
        );
    }
    Ok(())
}

fn encode(secret: Option<&str>) -> Result<()> {
    let codec = SecretCodec::from_env().context("Failed to read the encryption key")?;
    let secret = match secret {
        Some(s) => s.to_string(),
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read the secret from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    println!("{}", codec.encode(&secret)?);
    Ok(())
}
