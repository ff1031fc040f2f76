// ABOUTME: Build problems and an in-memory log sink that records everything a run reports.
// ABOUTME: Used by library callers that want to inspect a run's output after the fact.

use crate::output::BuildLog;
use parking_lot::Mutex;

/// A structured problem reported to the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProblem {
    /// Stable identity, e.g. `ssh-exec-runner:1`.
    pub identity: String,
    pub kind: ProblemKind,
    pub description: String,
}

impl BuildProblem {
    /// Non-zero exit code of a remote command.
    pub fn exit_code(run_type: &str, code: u32, description: impl Into<String>) -> Self {
        Self {
            identity: format!("{run_type}:{code}"),
            kind: ProblemKind::ExitCode,
            description: description.into(),
        }
    }

    /// Connection, authentication, or transfer failure.
    pub fn deployment(run_type: &str, description: impl Into<String>) -> Self {
        Self {
            identity: run_type.to_string(),
            kind: ProblemKind::Deployment,
            description: description.into(),
        }
    }
}

/// Categories of build problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    ExitCode,
    Deployment,
}

impl ProblemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKind::ExitCode => "exitCode",
            ProblemKind::Deployment => "deployerProblem",
        }
    }
}

/// A single recorded log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Message(String),
    Warning(String),
    Error(String),
    Problem(BuildProblem),
}

/// Collects everything reported during a run.
#[derive(Default)]
pub struct Diagnostics {
    entries: Mutex<Vec<LogEntry>>,
}

impl Diagnostics {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Plain progress messages, in order.
    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Message(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Warning(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn problems(&self) -> Vec<BuildProblem> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Problem(problem) => Some(problem.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_problems(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| matches!(entry, LogEntry::Problem(_)))
    }
}

impl BuildLog for Diagnostics {
    fn message(&self, text: &str) {
        self.entries.lock().push(LogEntry::Message(text.to_string()));
    }

    fn warning(&self, text: &str) {
        tracing::warn!("{}", text);
        self.entries.lock().push(LogEntry::Warning(text.to_string()));
    }

    fn error(&self, text: &str) {
        self.entries.lock().push(LogEntry::Error(text.to_string()));
    }

    fn build_problem(&self, problem: BuildProblem) {
        self.entries.lock().push(LogEntry::Problem(problem));
    }
}
