extern crate clap;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colored::{ColoredString, Colorize};
use log::{info, LevelFilter};
use url::Url;

use vpn_diag::api::Client;
use vpn_diag::config::DiagnosticsConfig;
use vpn_diag::engine::single_probe::{attach_title, run_single_probe, SingleProbeReport};
use vpn_diag::engine::{fetch_connection_info, DiagnosticsEngine};
use vpn_diag::errors::{exit_codes, format_error_for_display, DiagnosticError, ErrorKind};
use vpn_diag::progress::ProgressEmitter;
use vpn_diag::results::{BandwidthReport, DiagnosticsReport};
use vpn_diag::scoring::ProbeStatus;
use vpn_diag::services::Tier;
use vpn_diag::transport::http::HttpTransport;
use vpn_diag::tui::{DisplayMode, TuiController, UiExit};

#[derive(Parser)]
#[command(author, version = env!("VPNDIAG_VERSION"), about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print a summary at the end instead of the live view
    #[arg(long, global = true)]
    plain: bool,

    /// JSON file overriding parts of the built-in configuration
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

#[derive(Subcommand)]
enum Command {
    /// Throughput session, then a reachability check (default)
    All,
    /// Latency, download and upload only
    Speed,
    /// Reachability of the configured services only
    Services {
        /// Check only these service ids
        #[arg(long, value_name = "ID")]
        only: Vec<String>,
    },
    /// Time a partial fetch of one media file
    Probe {
        /// Media file to fetch
        #[arg(long)]
        url: Url,
        /// Video page whose title should be looked up
        #[arg(long)]
        video: Option<Url>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mode = DisplayMode::detect(cli.json, cli.plain, std::io::stdout().is_terminal());
    init_logging(&cli.verbose, mode);

    let code = match run(cli, mode).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("{}", format_error_for_display(&e).red());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr. The live view owns the terminal, so it silences them
/// unless `-v` asked for more than the default.
fn init_logging(verbose: &Verbosity<WarnLevel>, mode: DisplayMode) {
    let requested = verbose.log_level_filter();
    let level = if mode.is_live() && requested <= LevelFilter::Warn {
        LevelFilter::Off
    } else {
        requested
    };
    env_logger::Builder::new().filter_level(level).init();
}

async fn run(cli: Cli, mode: DisplayMode) -> Result<(), DiagnosticError> {
    let mut config = match cli.config {
        Some(ref path) => DiagnosticsConfig::load(path)?,
        None => DiagnosticsConfig::default(),
    };

    let command = cli.command.unwrap_or(Command::All);
    let (speed, services) = match command {
        Command::All => (true, true),
        Command::Speed => (true, false),
        Command::Services { ref only } => {
            if !only.is_empty() {
                config.services.retain_ids(only)?;
            }
            (false, true)
        }
        Command::Probe { url, video } => return run_probe(url, video, mode).await,
    };
    config.validate()?;

    let client = Client::new()?;
    let transport = HttpTransport::new()?;
    let connection = fetch_connection_info(&client, &config).await;
    let registry = config.services.clone();

    let (emitter, mut events) = ProgressEmitter::channel();
    let mut ui = TuiController::new(mode, &registry);
    ui.set_connection(connection.clone());

    let engine = DiagnosticsEngine::with_progress(transport, config, emitter);
    // Owns the engine, so the progress channel closes when the work is done.
    let work = async move {
        let session = if speed {
            Some(engine.run_throughput_session().await?)
        } else {
            None
        };
        let statuses = if services {
            engine.run_reachability_cycle().await
        } else {
            Vec::new()
        };
        engine.finish();
        Ok::<_, DiagnosticError>((session, statuses))
    };
    tokio::pin!(work);

    ui.init()?;
    let outcome = tokio::select! {
        result = &mut work => Some(result),
        exit = ui.run(&mut events) => match exit? {
            UiExit::Finished => Some((&mut work).await),
            UiExit::Quit => None,
        },
        _ = tokio::signal::ctrl_c() => None,
    };
    if let Some(Err(ref e)) = outcome {
        ui.show_error(e).await?;
    }
    ui.cleanup()?;

    let Some(result) = outcome else {
        info!("Run cancelled before completion");
        return Err(DiagnosticError::new(ErrorKind::Unknown, "cancelled"));
    };
    let (session, statuses) = result?;

    let mut report = DiagnosticsReport::new().with_connection(connection);
    if let Some(ref session) = session {
        report = report.with_session(session);
    }
    let report = report.with_services(&registry, &statuses);

    match mode {
        DisplayMode::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        DisplayMode::Tui | DisplayMode::Plain => print_summary(&report),
    }
    Ok(())
}

async fn run_probe(
    url: Url,
    video: Option<Url>,
    mode: DisplayMode,
) -> Result<(), DiagnosticError> {
    let transport = HttpTransport::new()?;
    let mut report = run_single_probe(&transport, &url).await;
    if let Some(page) = video {
        let client = Client::new()?;
        report = attach_title(report, &client, &page).await;
    }

    match mode {
        DisplayMode::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        DisplayMode::Tui | DisplayMode::Plain => print_probe(&report),
    }
    Ok(())
}

fn print_summary(report: &DiagnosticsReport) {
    if let Some(ref conn) = report.connection {
        let ip = conn.ip.as_deref().unwrap_or("unknown");
        let country = conn.country.as_deref().unwrap_or("??");
        println!(
            "{} {} {}",
            "Your IP:".bold().white(),
            ip.bright_blue(),
            format!("({})", country).bright_blue()
        );
    }

    if let Some(ref latency) = report.latency {
        let value = if latency.measured {
            format!("{} ms", latency.latency_ms)
        } else {
            format!("{} ms (no reference host answered)", latency.latency_ms)
        };
        println!(
            "{} {} {}",
            "Latency:".bold().white(),
            value,
            format!("[{}]", latency.grade.description()).dimmed()
        );
        if let Some(jitter) = latency.jitter_ms {
            println!("{} {:.1} ms", "Jitter:".bold().white(), jitter);
        }
    }

    if let Some(ref download) = report.download {
        print_bandwidth("Download speed:", download);
    }
    if let Some(ref upload) = report.upload {
        print_bandwidth("Upload speed:", upload);
    }

    if !report.services.is_empty() {
        println!("{}", "Services:".bold().white());
        for service in &report.services {
            println!("  {} {:<12} {}", tier_symbol(service.tier), service.name, service.detail);
        }
        let (ok, slow, error) = report.service_counts();
        println!(
            "  {} ok, {} slow, {} unreachable",
            ok.to_string().green(),
            slow.to_string().yellow(),
            error.to_string().red()
        );
    }
}

fn print_bandwidth(label: &str, report: &BandwidthReport) {
    let speed = format!("{:.2} Mbps", report.speed_mbps).bright_cyan();
    let note = if report.degraded {
        " (estimated, no valid samples)".to_string()
    } else if let Some(reason) = report.fallback {
        format!(" (fallback: {:?}, {} samples)", reason, report.samples)
    } else {
        format!(" ({} samples)", report.samples)
    };
    println!("{} {}{}", label.bold().white(), speed, note.dimmed());
}

fn tier_symbol(tier: Tier) -> ColoredString {
    match tier {
        Tier::Ok => "●".green(),
        Tier::Slow => "◐".yellow(),
        Tier::Error => "✗".red(),
        Tier::Checking => "…".dimmed(),
    }
}

fn print_probe(report: &SingleProbeReport) {
    if let Some(ref title) = report.video_title {
        println!("{} {}", "Video:".bold().white(), title.bright_blue());
    }
    let status = match report.status {
        ProbeStatus::Excellent => report.status.description().green(),
        ProbeStatus::Good => report.status.description().yellow(),
        ProbeStatus::Poor => report.status.description().red(),
    };
    println!(
        "{} {} {}",
        "Media speed:".bold().white(),
        format!("{:.2} MB/s", report.speed).bright_cyan(),
        status
    );
    println!(
        "{} {} bytes in {:.2} s",
        "Fetched:".bold().white(),
        report.file_size,
        report.download_time
    );
    if let Some(ref error) = report.error {
        println!("{} {}", "Error:".bold().red(), error);
    }
}
