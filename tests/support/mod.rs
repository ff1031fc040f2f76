// ABOUTME: Test support utilities.
// ABOUTME: Scripted SSH sessions and channels, an scp sink emulator, and an in-memory remote filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use deployer::ssh::{
    self, ChannelEvent, ExecChannel, RemoteFs, RemoteSession, SessionSource,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("deployer=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// What a fake channel was asked to do.
#[derive(Default)]
pub struct ChannelProbe {
    pub commands: Mutex<Vec<String>>,
    pub pty: Mutex<Option<String>>,
    pub agent_forwarding: AtomicBool,
    pub eof_sent: AtomicBool,
    pub closes: AtomicUsize,
}

#[allow(dead_code)]
impl ChannelProbe {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

/// A channel whose events are pushed by the test through an mpsc sender.
///
/// While the sender is alive the channel looks like a running command.
pub struct ScriptedChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    probe: Arc<ChannelProbe>,
    reject_exec: bool,
}

#[allow(dead_code)]
pub fn scripted_channel() -> (
    mpsc::UnboundedSender<ChannelEvent>,
    ScriptedChannel,
    Arc<ChannelProbe>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let probe = Arc::new(ChannelProbe::default());
    let channel = ScriptedChannel {
        events: rx,
        probe: probe.clone(),
        reject_exec: false,
    };
    (tx, channel, probe)
}

#[allow(dead_code)]
impl ScriptedChannel {
    pub fn rejecting_exec(mut self) -> Self {
        self.reject_exec = true;
        self
    }
}

/// Events for a command that prints `lines` and exits with `code`.
#[allow(dead_code)]
pub fn finished_command(
    tx: &mpsc::UnboundedSender<ChannelEvent>,
    stdout: &str,
    stderr: &str,
    code: u32,
) {
    if !stdout.is_empty() {
        tx.send(ChannelEvent::Stdout(Bytes::copy_from_slice(stdout.as_bytes())))
            .unwrap();
    }
    if !stderr.is_empty() {
        tx.send(ChannelEvent::Stderr(Bytes::copy_from_slice(stderr.as_bytes())))
            .unwrap();
    }
    tx.send(ChannelEvent::Eof).unwrap();
    tx.send(ChannelEvent::ExitStatus(code)).unwrap();
    tx.send(ChannelEvent::Closed).unwrap();
}

#[async_trait]
impl ExecChannel for ScriptedChannel {
    async fn request_pty(&mut self, term: &str) -> ssh::Result<()> {
        *self.probe.pty.lock() = Some(term.to_string());
        Ok(())
    }

    async fn request_agent_forwarding(&mut self) -> ssh::Result<()> {
        self.probe.agent_forwarding.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> ssh::Result<()> {
        self.probe.commands.lock().push(command.to_string());
        if self.reject_exec {
            return Err(ssh::Error::Channel("exec request rejected".to_string()));
        }
        Ok(())
    }

    async fn send(&mut self, _data: &[u8]) -> ssh::Result<()> {
        Ok(())
    }

    async fn send_eof(&mut self) -> ssh::Result<()> {
        self.probe.eof_sent.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    async fn close(self) -> ssh::Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Files and directories an scp sink received.
#[derive(Default)]
pub struct ScpReceived {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub transcript: Vec<String>,
}

enum SinkState {
    Directive,
    Body {
        path: String,
        remaining: usize,
        data: Vec<u8>,
    },
}

/// Emulates the remote end of `scp -t`, acknowledging each directive.
pub struct ScpServerChannel {
    probe: Arc<ChannelProbe>,
    received: Arc<Mutex<ScpReceived>>,
    refuse_file: Option<String>,
    inbound: Vec<u8>,
    outbox: VecDeque<ChannelEvent>,
    dirs: Vec<String>,
    state: SinkState,
}

#[allow(dead_code)]
pub fn scp_server() -> (ScpServerChannel, Arc<ChannelProbe>, Arc<Mutex<ScpReceived>>) {
    let probe = Arc::new(ChannelProbe::default());
    let received = Arc::new(Mutex::new(ScpReceived::default()));
    let channel = ScpServerChannel {
        probe: probe.clone(),
        received: received.clone(),
        refuse_file: None,
        inbound: Vec::new(),
        outbox: VecDeque::new(),
        dirs: Vec::new(),
        state: SinkState::Directive,
    };
    (channel, probe, received)
}

#[allow(dead_code)]
impl ScpServerChannel {
    /// Answer the `C` directive for `name` with a fatal error.
    pub fn refusing(mut self, name: &str) -> Self {
        self.refuse_file = Some(name.to_string());
        self
    }

    fn ack(&mut self) {
        self.outbox.push_back(ChannelEvent::Stdout(Bytes::from_static(&[0])));
    }

    fn nack(&mut self, message: &str) {
        let mut reply = vec![2u8];
        reply.extend_from_slice(format!("scp: {message}\n").as_bytes());
        self.outbox.push_back(ChannelEvent::Stdout(Bytes::from(reply)));
    }

    fn process(&mut self) {
        loop {
            match &mut self.state {
                SinkState::Directive => {
                    let Some(newline) = self.inbound.iter().position(|&b| b == b'\n') else {
                        return;
                    };
                    let line: Vec<u8> = self.inbound.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    self.received.lock().transcript.push(line.clone());
                    self.directive(&line);
                }
                SinkState::Body {
                    remaining, data, ..
                } => {
                    if self.inbound.is_empty() {
                        return;
                    }
                    let take = (*remaining).min(self.inbound.len());
                    data.extend(self.inbound.drain(..take));
                    *remaining -= take;
                    if *remaining == 0 {
                        let SinkState::Body { path, mut data, .. } =
                            std::mem::replace(&mut self.state, SinkState::Directive)
                        else {
                            unreachable!()
                        };
                        // Trailing zero byte closes the body.
                        data.pop();
                        self.received.lock().files.insert(path, data);
                        self.ack();
                    }
                }
            }
        }
    }

    fn directive(&mut self, line: &str) {
        match line.chars().next() {
            Some('D') => {
                let name = line.splitn(3, ' ').nth(2).unwrap_or_default().to_string();
                self.dirs.push(name);
                self.received.lock().dirs.insert(self.dirs.join("/"));
                self.ack();
            }
            Some('E') => {
                self.dirs.pop();
                self.ack();
            }
            Some('C') => {
                let mut parts = line.splitn(3, ' ');
                let _mode = parts.next();
                let size: usize = parts.next().unwrap_or("0").parse().unwrap_or(0);
                let name = parts.next().unwrap_or_default().to_string();
                if self.refuse_file.as_deref() == Some(name.as_str()) {
                    self.nack(&format!("{name}: Permission denied"));
                    return;
                }
                let mut path = self.dirs.clone();
                path.push(name);
                self.state = SinkState::Body {
                    path: path.join("/"),
                    remaining: size + 1,
                    data: Vec::new(),
                };
                self.ack();
            }
            _ => self.nack("protocol error"),
        }
    }
}

#[async_trait]
impl ExecChannel for ScpServerChannel {
    async fn request_pty(&mut self, _term: &str) -> ssh::Result<()> {
        Ok(())
    }

    async fn request_agent_forwarding(&mut self) -> ssh::Result<()> {
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> ssh::Result<()> {
        self.probe.commands.lock().push(command.to_string());
        self.ack();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> ssh::Result<()> {
        self.inbound.extend_from_slice(data);
        self.process();
        Ok(())
    }

    async fn send_eof(&mut self) -> ssh::Result<()> {
        self.probe.eof_sent.store(true, Ordering::SeqCst);
        self.outbox.push_back(ChannelEvent::ExitStatus(0));
        self.outbox.push_back(ChannelEvent::Eof);
        self.outbox.push_back(ChannelEvent::Closed);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.outbox.pop_front()
    }

    async fn close(self) -> ssh::Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Either kind of fake channel, so one session type serves every test.
pub enum FakeChannel {
    Scripted(ScriptedChannel),
    Scp(ScpServerChannel),
}

impl From<ScriptedChannel> for FakeChannel {
    fn from(channel: ScriptedChannel) -> Self {
        FakeChannel::Scripted(channel)
    }
}

impl From<ScpServerChannel> for FakeChannel {
    fn from(channel: ScpServerChannel) -> Self {
        FakeChannel::Scp(channel)
    }
}

macro_rules! delegate {
    ($self:ident, $channel:ident => $call:expr) => {
        match $self {
            FakeChannel::Scripted($channel) => $call,
            FakeChannel::Scp($channel) => $call,
        }
    };
}

#[async_trait]
impl ExecChannel for FakeChannel {
    async fn request_pty(&mut self, term: &str) -> ssh::Result<()> {
        delegate!(self, c => c.request_pty(term).await)
    }

    async fn request_agent_forwarding(&mut self) -> ssh::Result<()> {
        delegate!(self, c => c.request_agent_forwarding().await)
    }

    async fn exec(&mut self, command: &str) -> ssh::Result<()> {
        delegate!(self, c => c.exec(command).await)
    }

    async fn send(&mut self, data: &[u8]) -> ssh::Result<()> {
        delegate!(self, c => c.send(data).await)
    }

    async fn send_eof(&mut self) -> ssh::Result<()> {
        delegate!(self, c => c.send_eof().await)
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        delegate!(self, c => c.next_event().await)
    }

    async fn close(self) -> ssh::Result<()> {
        delegate!(self, c => c.close().await)
    }
}

/// State of the in-memory remote filesystem.
#[derive(Default)]
pub struct MemoryFsState {
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub created_dirs: Vec<String>,
    pub fail_put_on: Option<String>,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct MemoryFs(pub Arc<Mutex<MemoryFsState>>);

#[allow(dead_code)]
impl MemoryFs {
    pub fn with_dirs(dirs: &[&str]) -> Self {
        let fs = Self::default();
        fs.0.lock().dirs.extend(dirs.iter().map(|d| d.to_string()));
        fs
    }

    pub fn failing_on(self, path: &str) -> Self {
        self.0.lock().fail_put_on = Some(path.to_string());
        self
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn exists(&mut self, path: &str) -> ssh::Result<bool> {
        let state = self.0.lock();
        Ok(state.dirs.contains(path) || state.files.contains_key(path))
    }

    async fn create_dir(&mut self, path: &str) -> ssh::Result<()> {
        let mut state = self.0.lock();
        state.dirs.insert(path.to_string());
        state.created_dirs.push(path.to_string());
        Ok(())
    }

    async fn put(
        &mut self,
        path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ssh::Result<u64> {
        if self.0.lock().fail_put_on.as_deref() == Some(path) {
            return Err(ssh::Error::Channel(format!("{path}: permission denied")));
        }
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        let len = data.len() as u64;
        self.0.lock().files.insert(path.to_string(), data);
        Ok(len)
    }

    async fn close(self) -> ssh::Result<()> {
        self.0.lock().closes += 1;
        Ok(())
    }
}

/// Session counters shared with the test.
#[derive(Default)]
pub struct SessionProbe {
    pub disconnects: AtomicUsize,
    pub channels_opened: AtomicUsize,
}

#[allow(dead_code)]
impl SessionProbe {
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub struct FakeSession {
    host: String,
    channels: Mutex<VecDeque<FakeChannel>>,
    files: Mutex<Option<MemoryFs>>,
    probe: Arc<SessionProbe>,
}

#[allow(dead_code)]
impl FakeSession {
    pub fn new(host: &str) -> (Self, Arc<SessionProbe>) {
        let probe = Arc::new(SessionProbe::default());
        let session = Self {
            host: host.to_string(),
            channels: Mutex::new(VecDeque::new()),
            files: Mutex::new(None),
            probe: probe.clone(),
        };
        (session, probe)
    }

    pub fn with_channel(self, channel: impl Into<FakeChannel>) -> Self {
        self.channels.lock().push_back(channel.into());
        self
    }

    pub fn with_files(self, files: MemoryFs) -> Self {
        *self.files.lock() = Some(files);
        self
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    type Channel = FakeChannel;
    type Files = MemoryFs;

    fn host(&self) -> &str {
        &self.host
    }

    async fn open_channel(&self) -> ssh::Result<FakeChannel> {
        self.probe.channels_opened.fetch_add(1, Ordering::SeqCst);
        self.channels
            .lock()
            .pop_front()
            .ok_or_else(|| ssh::Error::Channel("failed to open channel: refused".to_string()))
    }

    async fn open_files(&self) -> ssh::Result<MemoryFs> {
        self.files
            .lock()
            .take()
            .ok_or_else(|| ssh::Error::Channel("failed to start sftp subsystem".to_string()))
    }

    async fn disconnect(self) -> ssh::Result<()> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one prepared session, or fails like an unreachable host.
pub struct FakeSource {
    session: Mutex<Option<FakeSession>>,
    error: Option<String>,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn new(session: FakeSession) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            error: None,
        }
    }

    pub fn unreachable(reason: &str) -> Self {
        Self {
            session: Mutex::new(None),
            error: Some(reason.to_string()),
        }
    }
}

#[async_trait]
impl SessionSource for FakeSource {
    type Session = FakeSession;

    async fn obtain_session(&self) -> ssh::Result<FakeSession> {
        if let Some(reason) = &self.error {
            return Err(ssh::Error::Connection(reason.clone()));
        }
        self.session
            .lock()
            .take()
            .ok_or_else(|| ssh::Error::Connection("session already used".to_string()))
    }
}
