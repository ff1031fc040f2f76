// ABOUTME: Build log sink trait and its console implementation.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use crate::diagnostics::BuildProblem;
use serde::Serialize;
use std::time::Instant;

/// Where a run reports live progress and build problems.
///
/// Implementations must tolerate calls from several tasks at once: both
/// stream pumps of a running command write here concurrently.
pub trait BuildLog: Send + Sync {
    fn message(&self, text: &str);
    fn warning(&self, text: &str);
    fn error(&self, text: &str);
    fn build_problem(&self, problem: BuildProblem);
}

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only warnings, errors and the final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Console log sink.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Print the final result with optional timing.
    pub fn finished(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => self.emit_json("finished", message, None, false),
        }
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    fn emit_json(&self, event: &str, message: &str, identity: Option<&str>, to_stderr: bool) {
        let event = JsonEvent {
            event,
            message,
            identity,
            duration_secs: self.duration(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            if to_stderr {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
        }
    }
}

impl BuildLog for Output {
    fn message(&self, text: &str) {
        match self.mode {
            OutputMode::Normal => println!("{text}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit_json("message", text, None, false),
        }
    }

    fn warning(&self, text: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {text}"),
            OutputMode::Json => self.emit_json("warning", text, None, true),
        }
    }

    fn error(&self, text: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Error: {text}"),
            OutputMode::Json => self.emit_json("error", text, None, true),
        }
    }

    fn build_problem(&self, problem: BuildProblem) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!(
                "Build problem [{}] ({}): {}",
                problem.identity,
                problem.kind.as_str(),
                problem.description
            ),
            OutputMode::Json => self.emit_json(
                problem.kind.as_str(),
                &problem.description,
                Some(&problem.identity),
                true,
            ),
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
