// ABOUTME: Command execution monitor: runs one remote command and streams its output live.
// ABOUTME: Polls for cancellation and silent partial output, then maps the exit status to an outcome.

mod pump;

pub use pump::{ActivityClock, LineBuffer};

use crate::config::InternalProperties;
use crate::diagnostics::BuildProblem;
use crate::output::BuildLog;
use crate::ssh::{self, ChannelEvent, ExecChannel, RemoteSession};
use crate::transport::{Outcome, TransportKind};
use pump::Pump;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for the pumps to drain after the command ends.
const PUMP_JOIN_LIMIT: Duration = Duration::from_secs(5);

/// Timing knobs for the poll loop. The poll interval must stay well below
/// the silence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Quiet time after which a buffered partial line is flushed.
    pub silence_threshold: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            silence_threshold: Duration::from_secs(10),
        }
    }
}

impl MonitorSettings {
    /// Reject timings the poll loop cannot honour.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.poll_interval.is_zero() {
            return Err(crate::error::Error::InvalidParameter {
                name: "poll_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll_interval >= self.silence_threshold {
            return Err(crate::error::Error::InvalidParameter {
                name: "poll_interval",
                reason: format!(
                    "{:?} must be shorter than silence_threshold {:?}",
                    self.poll_interval, self.silence_threshold
                ),
            });
        }
        Ok(())
    }
}

impl From<&InternalProperties> for MonitorSettings {
    fn from(internal: &InternalProperties) -> Self {
        Self {
            poll_interval: internal.poll_interval,
            silence_threshold: internal.silence_threshold,
        }
    }
}

/// Per-command options, fixed when the adapter is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Terminal type for a pseudo-terminal; `None` runs without one.
    pub pty_type: Option<String>,
    pub agent_forwarding: bool,
    pub fail_build_on_exit_code: bool,
}

/// How the wait loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Exited(Option<u32>),
    Interrupted,
}

pub struct CommandMonitor {
    kind: TransportKind,
    log: Arc<dyn BuildLog>,
    options: ExecutionOptions,
    settings: MonitorSettings,
    cancel: CancellationToken,
}

impl CommandMonitor {
    pub fn new(
        kind: TransportKind,
        log: Arc<dyn BuildLog>,
        options: ExecutionOptions,
        settings: MonitorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            log,
            options,
            settings,
            cancel,
        }
    }

    /// Run `command` on one fresh channel of `session`.
    ///
    /// The channel is closed on every path before the outcome is returned.
    /// The session itself stays open; its owner disconnects it.
    pub async fn execute<S: RemoteSession>(&self, session: &S, command: &str) -> Outcome {
        self.log.message(&format!(
            "Executing commands:\n{command}\non host [{}]",
            session.host()
        ));

        let mut channel = match session.open_channel().await {
            Ok(channel) => channel,
            Err(e) => return self.failure(e),
        };

        let finished = self.drive(&mut channel, command).await;

        if let Err(e) = channel.close().await {
            tracing::debug!("Closing exec channel failed: {}", e);
        }

        match finished {
            Ok(Finished::Interrupted) => {
                self.log.message("Interrupted.");
                Outcome::Interrupted
            }
            Ok(Finished::Exited(status)) => {
                let outcome =
                    map_exit_status(self.kind, status, self.options.fail_build_on_exit_code);
                self.report(status, &outcome);
                outcome
            }
            Err(e) => self.failure(e),
        }
    }

    async fn drive<C: ExecChannel>(&self, channel: &mut C, command: &str) -> ssh::Result<Finished> {
        if let Some(term) = &self.options.pty_type {
            channel.request_pty(term).await?;
        }
        if self.options.agent_forwarding {
            channel.request_agent_forwarding().await?;
        }
        channel.exec(command).await?;

        let clock = Arc::new(ActivityClock::new());
        let mut stdout = Pump::spawn(Arc::clone(&self.log), Arc::clone(&clock));
        let mut stderr = Pump::spawn(Arc::clone(&self.log), Arc::clone(&clock));

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut last_read = Instant::now();
        let mut exit_status = None;
        let mut eof = false;

        let finished = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Finished::Interrupted,

                event = channel.next_event() => match event {
                    Some(ChannelEvent::Stdout(data)) => {
                        last_read = Instant::now();
                        stdout.feed(data);
                    }
                    Some(ChannelEvent::Stderr(data)) => {
                        last_read = Instant::now();
                        stderr.feed(data);
                    }
                    Some(ChannelEvent::ExitStatus(code)) => {
                        exit_status = Some(code);
                        if eof {
                            break Finished::Exited(exit_status);
                        }
                    }
                    Some(ChannelEvent::Eof) => {
                        eof = true;
                        if exit_status.is_some() {
                            break Finished::Exited(exit_status);
                        }
                    }
                    Some(ChannelEvent::Closed) | None => break Finished::Exited(exit_status),
                },

                _ = ticker.tick() => {
                    let quiet_since = last_read.max(clock.last_line());
                    if quiet_since.elapsed() > self.settings.silence_threshold {
                        for pump in [&mut stdout, &mut stderr] {
                            if pump.has_pending() {
                                tracing::debug!(
                                    "Flushing partial output after {:?} of silence",
                                    quiet_since.elapsed()
                                );
                                pump.flush();
                            }
                        }
                    }
                }
            }
        };

        tokio::join!(stdout.finish(PUMP_JOIN_LIMIT), stderr.finish(PUMP_JOIN_LIMIT));
        Ok(finished)
    }

    fn report(&self, status: Option<u32>, outcome: &Outcome) {
        let label = self.kind.label();
        match outcome {
            Outcome::Success => match status {
                Some(code) => self.log.message(&format!("{label} exit-code [{code}]")),
                None => self.log.message(&format!("{label} exit-code not reported")),
            },
            Outcome::Failed { message } => {
                if let Some(code) = status {
                    self.log.build_problem(BuildProblem::exit_code(
                        self.kind.run_type(),
                        code,
                        message.clone(),
                    ));
                }
            }
            Outcome::SucceededWithProblems { message } => self.log.warning(message),
            Outcome::Interrupted => {}
        }
    }

    fn failure(&self, error: ssh::Error) -> Outcome {
        let message = error.to_string();
        tracing::warn!("Error executing {} command: {}", self.kind.label(), message);
        self.log.error(&message);
        Outcome::Failed { message }
    }
}

/// Translate a remote exit status into an outcome.
///
/// A missing status counts as success.
pub fn map_exit_status(kind: TransportKind, status: Option<u32>, fail_build_on_exit_code: bool) -> Outcome {
    match status {
        None | Some(0) => Outcome::Success,
        Some(code) => {
            let message = format!("{} exit-code [{code}]", kind.label());
            if fail_build_on_exit_code {
                Outcome::Failed { message }
            } else {
                Outcome::SucceededWithProblems { message }
            }
        }
    }
}
