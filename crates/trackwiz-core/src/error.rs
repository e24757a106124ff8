//! Error types for trackwiz-core

use std::fmt::Write;
use thiserror::Error;

use crate::wizard::Step;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for trackwiz-core
#[derive(Error, Debug)]
pub enum Error {
    /// Upload rejected locally or by the service
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// A request to the tracking service failed
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// The service reported a failed job
    #[error("Job failed: {0}")]
    Poll(#[from] PollError),

    /// Polling gave up before the job finished
    #[error("Polling timed out: {0}")]
    PollTimeout(#[from] PollTimeout),

    /// Operation rejected locally
    #[error("Invalid operation: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Upload(err) => Some(err.remediation()),
            Self::Request(err) => Some(err.remediation()),
            Self::Poll(_) => Some(
                Remediation::new("The tracking job failed on the server. Start a new session.")
                    .command("New session", "tw run <video> --point x,y")
                    .alternative("Check the tracking service logs for the failing job."),
            ),
            Self::PollTimeout(_) => Some(
                Remediation::new("The job did not finish within the polling bound.")
                    .command("Check status", "tw status <session>")
                    .alternative("Raise [polling] max_attempts or max_duration_secs."),
            ),
            Self::Validation(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Show config", "tw config")
                    .alternative("Verify the destination directory exists and is writable."),
            ),
        }
    }

    /// Whether this error moves the wizard into its error condition.
    ///
    /// Local validation failures leave the wizard untouched.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::Poll(_) | Self::PollTimeout(_) | Self::Upload(UploadError::Rejected(_))
        )
    }
}

/// Upload-specific errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Video file not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported video format: {0} (expected one of mp4, mov, avi, wmv, mkv)")]
    UnsupportedFormat(String),

    #[error("Video is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Service rejected the upload: {0}")]
    Rejected(String),
}

impl UploadError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Video file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\"")),
            Self::UnsupportedFormat(_) => {
                Remediation::new("Convert the video to a supported container and retry.")
                    .command("Convert", "ffmpeg -i input.webm output.mp4")
            }
            Self::TooLarge { limit, .. } => Remediation::new(format!(
                "Video exceeds the {limit} byte upload limit. Trim or re-encode it."
            ))
            .command("Re-encode", "ffmpeg -i input.mp4 -crf 28 smaller.mp4")
            .alternative("Raise [service] max_upload_bytes if the server allows it."),
            Self::Rejected(_) => Remediation::new("The service refused the upload.")
                .command("Retry", "tw run <video> --point x,y")
                .alternative("Check the service upload limits and free disk space."),
        }
    }
}

/// Errors from a single service request
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("{endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
}

impl RequestError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Status { status, .. } if *status == 404 => {
                Remediation::new("The session no longer exists on the server.")
                    .command("Start over", "tw run <video> --point x,y")
            }
            Self::Status { .. } => Remediation::new("The service rejected the request.")
                .command("Check status", "tw status <session>")
                .alternative("Inspect the service logs for the request."),
            Self::Transport { .. } => {
                Remediation::new("Could not reach the tracking service. Is it running?")
                    .command("Show server", "tw config")
                    .alternative("Pass --server with the correct base URL.")
            }
        }
    }

    /// Endpoint the failing request targeted.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Status { endpoint, .. } | Self::Transport { endpoint, .. } => endpoint,
        }
    }
}

/// Job failure reported through the status endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PollError {
    pub message: String,
}

/// Polling exhausted its attempt or time bound
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("gave up after {attempts} status requests ({elapsed_ms} ms)")]
pub struct PollTimeout {
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Local validation errors; never reach the network
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no points selected")]
    NoPoints,

    #[error("no active session")]
    NoSession,

    #[error("the session failed; reset to start over")]
    SessionFailed,

    #[error("{operation} is not available at step {step}")]
    InvalidStep { operation: &'static str, step: Step },

    #[error("invalid point: {0}")]
    InvalidPoint(String),
}

impl ValidationError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NoPoints => Remediation::new("Select at least one point before confirming.")
                .command("Add a point", "tw run <video> --point x,y"),
            Self::NoSession => Remediation::new("Upload a video first to open a session.")
                .command("Start", "tw run <video> --point x,y"),
            Self::SessionFailed => Remediation::new("Reset the wizard and start a new session.")
                .command("Start over", "tw run <video> --point x,y"),
            Self::InvalidStep { .. } => {
                Remediation::new("Follow the wizard order: upload, extract, points, track.")
                    .command("Check status", "tw status <session>")
            }
            Self::InvalidPoint(_) => Remediation::new("Points are written as x,y with integers.")
                .command("Example", "tw run video.mp4 --point 540,408 --negative 10,10"),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\"")),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .command("Show defaults", "tw config --default"),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .command("Show defaults", "tw config --default")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Show defaults", "tw config --default")
                    .alternative("Review validation errors and adjust trackwiz.toml.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
