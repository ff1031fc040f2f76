// ABOUTME: Remote command transport: one session, one monitored command.
// ABOUTME: Output streams live to the build log; the exit status decides the outcome.

use super::{RunContext, Transport, TransportKind, disconnect, failed, interrupted};
use crate::monitor::{CommandMonitor, ExecutionOptions, MonitorSettings};
use crate::ssh::SessionSource;
use crate::transport::Outcome;
use async_trait::async_trait;

pub struct ExecTransport<P> {
    provider: P,
    command: String,
    options: ExecutionOptions,
    settings: MonitorSettings,
}

impl<P: SessionSource> ExecTransport<P> {
    pub fn new(
        provider: P,
        command: impl Into<String>,
        options: ExecutionOptions,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            provider,
            command: command.into(),
            options,
            settings,
        }
    }
}

#[async_trait]
impl<P: SessionSource> Transport for ExecTransport<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Exec
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Outcome {
        let session = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return interrupted(ctx),
            session = self.provider.obtain_session() => session,
        };
        let session = match session {
            Ok(session) => session,
            Err(e) => return failed(self.kind(), ctx, e),
        };

        let monitor = CommandMonitor::new(
            self.kind(),
            ctx.log.clone(),
            self.options.clone(),
            self.settings,
            ctx.cancel.clone(),
        );
        let outcome = monitor.execute(&session, &self.command).await;

        disconnect(session).await;
        outcome
    }
}
