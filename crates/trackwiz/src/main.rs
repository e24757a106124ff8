//! `tw` - guided video object tracking sessions from the command line.
//!
//! `tw run` walks one session through every wizard step against the
//! configured tracking service. The remaining commands are thin wrappers
//! over single service requests for inspecting or cleaning up sessions.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};

use trackwiz_core::client::HttpTrackingService;
use trackwiz_core::config::{Config, LogFormat};
use trackwiz_core::controller::{NoticeLevel, PollApplied, WizardEvent};
use trackwiz_core::error::{ValidationError, format_error_with_remediation};
use trackwiz_core::fake::ScriptedService;
use trackwiz_core::logging::{LogConfig, init_logging};
use trackwiz_core::points::{PointKind, PointSpec};
use trackwiz_core::poll::PollPolicy;
use trackwiz_core::service::{ModelSize, SessionId, TrackingService};
use trackwiz_core::view::WizardView;
use trackwiz_core::wizard::{JobProgress, Step};
use trackwiz_core::{ControllerOptions, WizardController};

/// Poll interval used against the built-in demo service.
const DRY_RUN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "tw",
    version,
    about = "Guided video object tracking sessions against a remote tracker"
)]
struct Cli {
    /// Config file (default: ./trackwiz.toml, then the user config dir)
    #[arg(long, global = true, env = "TRACKWIZ_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Tracking service base URL
    #[arg(long, global = true, env = "TRACKWIZ_SERVER", value_name = "URL")]
    server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Command output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a video and track the selected object through it
    Run(RunArgs),
    /// Show the job status of a session
    Status {
        /// Session id printed by `tw run`
        session: String,
    },
    /// List the extracted frames of a session
    Frames { session: String },
    /// Download the results archive of a completed session
    Download { session: String, dest: PathBuf },
    /// Release server-side resources of a session
    Cleanup { session: String },
    /// Print the effective configuration as TOML
    Config {
        /// Print built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Video file (mp4, mov, avi, wmv, mkv)
    video: PathBuf,

    /// Point on the object to track, in frame pixels
    #[arg(long = "point", value_name = "X,Y")]
    points: Vec<PointSpec>,

    /// Point to exclude from the object, in frame pixels
    #[arg(long = "negative", value_name = "X,Y")]
    negative: Vec<PointSpec>,

    /// Model size (tiny, small, base_plus, large)
    #[arg(long)]
    model: Option<ModelSize>,

    /// Save the results archive here
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Leave the session on the server when done
    #[arg(long)]
    keep_session: bool,

    /// Run against a built-in demo service instead of the network
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<trackwiz_core::Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = effective_config(&cli)?;

    let log_config = LogConfig::from(&config.general);
    init_logging(&log_config).context("failed to initialize logging")?;
    debug!(base_url = %config.service.base_url, "Configuration loaded");

    match &cli.command {
        Commands::Run(args) => cmd_run(&config, args, cli.format).await,
        Commands::Status { session } => {
            cmd_status(&client(&config)?, &SessionId::new(session.as_str()), cli.format).await
        }
        Commands::Frames { session } => {
            cmd_frames(&client(&config)?, &SessionId::new(session.as_str()), cli.format).await
        }
        Commands::Download { session, dest } => {
            cmd_download(&client(&config)?, &SessionId::new(session.as_str()), dest, cli.format).await
        }
        Commands::Cleanup { session } => {
            let session = SessionId::new(session.as_str());
            client(&config)?.cleanup(&session).await?;
            info!(session_id = %session, "Session cleaned up");
            emit(cli.format, &serde_json::json!({"session_id": session, "cleaned_up": true}), || {
                println!("Cleaned up session {session}");
            })
        }
        Commands::Config { default } => {
            let shown = if *default { Config::default() } else { config };
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&shown)?),
                OutputFormat::Plain => print!("{}", shown.to_toml()?),
            }
            Ok(())
        }
    }
}

/// Config file values with command-line overrides applied.
fn effective_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(server) = &cli.server {
        config.service.base_url.clone_from(server);
    }
    if let Some(level) = &cli.log_level {
        config.general.log_level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config.validate()?;
    Ok(config)
}

fn client(config: &Config) -> Result<HttpTrackingService> {
    Ok(HttpTrackingService::from_config(&config.service)?)
}

fn emit<T: Serialize>(format: OutputFormat, value: &T, plain: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Plain => plain(),
    }
    Ok(())
}

// =============================================================================
// tw run
// =============================================================================

/// Outcome of a `tw run`, as printed with `--format json`.
#[derive(Debug, Serialize)]
struct RunReport {
    view: WizardView,
    results_file: Option<PathBuf>,
    results_bytes: Option<u64>,
    session_kept: bool,
}

async fn cmd_run(config: &Config, args: &RunArgs, format: OutputFormat) -> Result<()> {
    let model = args.model.unwrap_or(config.tracking.model_size);
    let mut options = ControllerOptions::from(config);

    if args.dry_run {
        options.poll = PollPolicy::new(
            DRY_RUN_POLL_INTERVAL,
            DRY_RUN_POLL_INTERVAL,
            1.0,
            options.poll.max_attempts,
            options.poll.max_duration,
        );
        let controller = WizardController::new(Arc::new(ScriptedService::demo()), options);
        return run_wizard(controller, args, model, format).await;
    }

    let service = HttpTrackingService::from_config(&config.service)?;
    info!(base_url = service.base_url(), video = %args.video.display(), "Starting session");
    run_wizard(WizardController::new(Arc::new(service), options), args, model, format).await
}

async fn run_wizard<S>(
    mut controller: WizardController<S>,
    args: &RunArgs,
    model: ModelSize,
    format: OutputFormat,
) -> Result<()>
where
    S: TrackingService + 'static,
{
    let mut reporter = Reporter::new(format);
    let outcome = guided_session(&mut controller, args, model, &mut reporter).await;
    reporter.drain(&mut controller);

    let view = controller.view();
    let session_kept = args.keep_session && view.session_id.is_some();
    if args.keep_session {
        if let (Err(_), Some(id)) = (&outcome, &view.session_id) {
            eprintln!("Session {id} was kept on the server");
        }
    } else {
        controller.reset().await;
        controller.take_events();
    }

    let download = outcome?;
    reporter.summary(&RunReport {
        view,
        results_file: download.as_ref().map(|(path, _)| path.clone()),
        results_bytes: download.map(|(_, bytes)| bytes),
        session_kept,
    })
}

/// Every wizard step in order. Returns the downloaded archive, if any.
async fn guided_session<S>(
    controller: &mut WizardController<S>,
    args: &RunArgs,
    model: ModelSize,
    reporter: &mut Reporter,
) -> trackwiz_core::Result<Option<(PathBuf, u64)>>
where
    S: TrackingService + 'static,
{
    if args.points.is_empty() && args.negative.is_empty() {
        return Err(ValidationError::NoPoints.into());
    }

    let session = controller.upload(&args.video).await?;
    reporter.drain(controller);
    info!(session_id = %session, "Session opened");

    controller.extract_frames().await?;
    reporter.drain(controller);
    drive(controller, reporter).await?;
    reporter.frames(&controller.view());

    let positive = args.points.iter().map(|p| (p, PointKind::Positive));
    let negative = args.negative.iter().map(|p| (p, PointKind::Negative));
    for (spec, kind) in positive.chain(negative) {
        controller.add_point(spec.x, spec.y, kind)?;
    }
    controller.confirm_points().await?;
    reporter.drain(controller);

    controller.start_tracking(model).await?;
    reporter.drain(controller);
    drive(controller, reporter).await?;

    let Some(dest) = &args.output else {
        return Ok(None);
    };
    let bytes = controller.download_results(dest).await?;
    reporter.drain(controller);
    Ok(Some((dest.clone(), bytes)))
}

/// Apply poll events until the running job finishes, reporting progress.
async fn drive<S>(controller: &mut WizardController<S>, reporter: &mut Reporter) -> trackwiz_core::Result<Step>
where
    S: TrackingService + 'static,
{
    loop {
        let applied = controller.next_event().await;
        reporter.drain(controller);
        match applied {
            Some(Ok(PollApplied::Advanced(step))) => return Ok(step),
            Some(Ok(PollApplied::Progress | PollApplied::Discarded)) => {}
            Some(Err(err)) => return Err(err),
            None => return controller.wait_for_job().await,
        }
    }
}

/// Renders wizard events on stderr and the final report on stdout.
struct Reporter {
    format: OutputFormat,
    last_progress: Option<JobProgress>,
}

impl Reporter {
    fn new(format: OutputFormat) -> Self {
        Self {
            format,
            last_progress: None,
        }
    }

    fn drain<S: TrackingService + 'static>(&mut self, controller: &mut WizardController<S>) {
        for event in controller.take_events() {
            self.event(event);
        }
    }

    fn event(&mut self, event: WizardEvent) {
        if self.format == OutputFormat::Json {
            debug!(?event, "Wizard event");
            return;
        }
        match event {
            WizardEvent::StepChanged { to, .. } => {
                eprintln!("[{}/{}] {}", to.number(), Step::ALL.len(), to.label());
            }
            WizardEvent::Progress(progress) => {
                if self.last_progress.as_ref() != Some(&progress) {
                    eprintln!("      {:>3}% {}", progress.percent, progress.message);
                    self.last_progress = Some(progress);
                }
            }
            WizardEvent::Notice(notice) => match notice.level {
                NoticeLevel::Info => eprintln!("      {}", notice.message),
                NoticeLevel::Success => eprintln!("  ok  {}", notice.message),
                // The returned error is printed with remediation instead.
                NoticeLevel::Error => {}
            },
            WizardEvent::Failed(failure) => {
                debug!(step = %failure.step, kind = ?failure.kind, "Session failed");
            }
        }
    }

    fn frames(&self, view: &WizardView) {
        if self.format == OutputFormat::Json {
            return;
        }
        if let Some(url) = &view.frame_url {
            eprintln!("      preview frame: {url}");
        }
    }

    fn summary(&self, report: &RunReport) -> Result<()> {
        emit(self.format, report, || {
            let view = &report.view;
            match &view.session_id {
                Some(id) => println!("Session {id}: {}", view.step),
                None => println!("Session finished: {}", view.step),
            }
            println!("  points:  {}", view.summary);
            if let Some(results) = &view.results {
                println!(
                    "  frames:  {}/{} processed",
                    results.processed_frames, results.total_frames
                );
                println!("  model:   {}", results.model_size);
                println!("  time:    {}", results.processing_time);
                for (object, frames) in &results.detections {
                    println!("  object {object}: found in {frames} frames");
                }
                if results.demo_mode {
                    println!("  (demo mode results)");
                }
            }
            if let (Some(path), Some(bytes)) = (&report.results_file, report.results_bytes) {
                println!("  results: {} ({bytes} bytes)", path.display());
            }
            if report.session_kept {
                println!("  session kept on the server");
            }
        })
    }
}

// =============================================================================
// Single-request commands
// =============================================================================

async fn cmd_status(service: &HttpTrackingService, session: &SessionId, format: OutputFormat) -> Result<()> {
    let report = service.status(session).await?;
    emit(format, &report, || {
        println!("session:  {session}");
        println!("status:   {}", report.status);
        println!("progress: {}%", report.progress_percent());
        if !report.message.is_empty() {
            println!("message:  {}", report.message);
        }
        if let Some(frames) = report.frame_count {
            println!("frames:   {frames}");
        }
        if let Some(error) = report.error.as_deref().filter(|e| !e.is_empty()) {
            println!("error:    {error}");
        }
    })
}

async fn cmd_frames(service: &HttpTrackingService, session: &SessionId, format: OutputFormat) -> Result<()> {
    let listing = service.frames(session).await?;
    emit(format, &listing, || {
        println!("{} frames extracted", listing.total_frames);
        for frame in &listing.preview_frames {
            println!("  {:>5}  {}", frame.index, frame.url);
        }
    })
}

async fn cmd_download(
    service: &HttpTrackingService,
    session: &SessionId,
    dest: &Path,
    format: OutputFormat,
) -> Result<()> {
    let archive = service.download_results(session).await?;
    tokio::fs::write(dest, &archive)
        .await
        .map_err(trackwiz_core::Error::from)?;
    info!(session_id = %session, dest = %dest.display(), bytes = archive.len(), "Results downloaded");
    let summary = serde_json::json!({
        "session_id": session,
        "path": dest,
        "bytes": archive.len(),
    });
    emit(format, &summary, || {
        println!("Saved {} bytes to {}", archive.len(), dest.display());
    })
}
