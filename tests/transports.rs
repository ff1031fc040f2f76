// ABOUTME: Tests for the transport adapters against scripted sessions and servers.
// ABOUTME: Every path must end with one terminal outcome and a released session.

mod support;

use deployer::artifacts::{ArtifactEntry, ArtifactSource};
use deployer::config::TargetSpec;
use deployer::diagnostics::Diagnostics;
use deployer::monitor::{ExecutionOptions, MonitorSettings};
use deployer::transport::{
    ExecTransport, Outcome, RunContext, ScpTransport, SftpTransport, Transport,
};
use std::path::Path;
use std::sync::Arc;
use support::{
    FakeSession, FakeSource, MemoryFs, finished_command, init_tracing, scp_server,
    scripted_channel,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn context() -> (Arc<Diagnostics>, RunContext) {
    let log = Arc::new(Diagnostics::default());
    let ctx = RunContext::new(log.clone(), CancellationToken::new());
    (log, ctx)
}

/// Write each `(remote, contents)` pair to a local file and list it as an artifact.
fn artifacts(dir: &Path, files: &[(&str, &str)]) -> ArtifactSource {
    files
        .iter()
        .enumerate()
        .map(|(i, (remote, contents))| {
            let local = dir.join(format!("artifact-{i}"));
            std::fs::write(&local, contents).unwrap();
            ArtifactEntry::new(local, *remote)
        })
        .collect()
}

fn target(raw: &str) -> TargetSpec {
    TargetSpec::parse(raw).unwrap()
}

mod exec {
    use super::*;

    /// Test: A command that exits 0
    /// Expected: Success and exactly one disconnect
    #[tokio::test]
    async fn runs_command_and_disconnects() {
        init_tracing();
        let (tx, channel, probe) = scripted_channel();
        let (session, session_probe) = FakeSession::new("app-01");
        let source = FakeSource::new(session.with_channel(channel));
        finished_command(&tx, "deployed\n", "", 0);

        let transport = ExecTransport::new(
            source,
            "./deploy.sh",
            ExecutionOptions::default(),
            MonitorSettings::default(),
        );
        let (log, ctx) = context();
        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Success);
        assert_eq!(session_probe.disconnects(), 1);
        assert_eq!(probe.commands(), vec!["./deploy.sh"]);
        assert!(log.messages().contains(&"deployed".to_string()));
    }

    /// Test: A failing command with fail-on-exit-code
    /// Expected: Failed outcome, and the session is still released
    #[tokio::test]
    async fn failed_command_still_disconnects() {
        let (tx, channel, _) = scripted_channel();
        let (session, session_probe) = FakeSession::new("app-01");
        let source = FakeSource::new(session.with_channel(channel));
        finished_command(&tx, "", "", 2);

        let options = ExecutionOptions {
            fail_build_on_exit_code: true,
            ..ExecutionOptions::default()
        };
        let transport = ExecTransport::new(source, "false", options, MonitorSettings::default());
        let (log, ctx) = context();

        assert!(Box::new(transport).run(&ctx).await.is_failure());
        assert_eq!(session_probe.disconnects(), 1);
        assert_eq!(log.problems()[0].identity, "ssh-exec-runner:2");
    }

    /// Test: Host is unreachable
    /// Expected: Failed with a deployment problem and no command run
    #[tokio::test]
    async fn connection_failure_fails_the_run() {
        let transport = ExecTransport::new(
            FakeSource::unreachable("connection refused"),
            "uptime",
            ExecutionOptions::default(),
            MonitorSettings::default(),
        );
        let (log, ctx) = context();

        let outcome = Box::new(transport).run(&ctx).await;
        assert!(outcome.is_failure());
        assert!(outcome.message().unwrap().contains("connection refused"));
        assert_eq!(log.problems()[0].identity, "ssh-exec-runner");
    }

    /// Test: Cancellation before the session is obtained
    /// Expected: Interrupted without opening anything
    #[tokio::test]
    async fn cancelled_before_connect() {
        let (session, session_probe) = FakeSession::new("app-01");
        let transport = ExecTransport::new(
            FakeSource::new(session),
            "uptime",
            ExecutionOptions::default(),
            MonitorSettings::default(),
        );
        let (log, ctx) = context();
        ctx.cancel.cancel();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Interrupted);
        assert_eq!(log.messages(), vec!["Interrupted."]);
        assert_eq!(session_probe.disconnects(), 0);
    }
}

mod scp {
    use super::*;

    /// Test: Files in nested directories go through one sink
    /// Expected: D/E directives bracket each directory and every file arrives intact
    #[tokio::test]
    async fn copies_tree_through_sink() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let files = artifacts(
            dir.path(),
            &[
                ("a.txt", "alpha"),
                ("lib/b.jar", "bravo"),
                ("lib/ext/c.so", ""),
                ("bin/d", "delta"),
            ],
        );
        let (channel, probe, received) = scp_server();
        let (session, session_probe) = FakeSession::new("web-01");
        let transport = ScpTransport::new(
            FakeSource::new(session.with_channel(channel)),
            target("web-01/srv/app"),
            files,
        );
        let (log, ctx) = context();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Success);
        assert_eq!(
            probe.commands(),
            vec!["mkdir -p -- 'srv/app' && scp -r -d -t -- 'srv/app'"]
        );

        let received = received.lock();
        assert_eq!(
            received.transcript,
            vec![
                "C0644 5 a.txt",
                "D0755 0 lib",
                "C0644 5 b.jar",
                "D0755 0 ext",
                "C0644 0 c.so",
                "E",
                "E",
                "D0755 0 bin",
                "C0644 5 d",
                "E",
            ]
        );
        assert_eq!(received.files["a.txt"], b"alpha");
        assert_eq!(received.files["lib/b.jar"], b"bravo");
        assert_eq!(received.files["lib/ext/c.so"], b"");
        assert_eq!(received.files["bin/d"], b"delta");
        assert!(probe.eof_sent.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(probe.closes(), 1);
        assert_eq!(session_probe.disconnects(), 1);
        assert!(
            log.messages()
                .contains(&"Uploaded [4] file(s) to [web-01/srv/app]".to_string())
        );
    }

    /// Test: The sink refuses one file
    /// Expected: Failed outcome, later files skipped, channel and session released
    #[tokio::test]
    async fn rejection_aborts_remaining_files() {
        let dir = TempDir::new().unwrap();
        let files = artifacts(
            dir.path(),
            &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")],
        );
        let (channel, probe, received) = scp_server();
        let (session, session_probe) = FakeSession::new("web-01");
        let transport = ScpTransport::new(
            FakeSource::new(session.with_channel(channel.refusing("b.txt"))),
            target("web-01"),
            files,
        );
        let (log, ctx) = context();

        let outcome = Box::new(transport).run(&ctx).await;
        assert!(outcome.is_failure());
        assert!(outcome.message().unwrap().contains("Permission denied"));
        assert_eq!(
            received.lock().files.keys().collect::<Vec<_>>(),
            vec!["a.txt"]
        );
        assert_eq!(log.problems()[0].identity, "scp-deploy-runner");
        assert_eq!(probe.commands(), vec!["scp -r -d -t ."]);
        assert_eq!(probe.closes(), 1);
        assert_eq!(session_probe.disconnects(), 1);
    }

    /// Test: Local artifact is missing
    /// Expected: Failed outcome naming the file, session released
    #[tokio::test]
    async fn missing_local_file_fails() {
        let (channel, _, received) = scp_server();
        let (session, session_probe) = FakeSession::new("web-01");
        let files: ArtifactSource = [ArtifactEntry::new("/nonexistent/app.war", "app.war")]
            .into_iter()
            .collect();
        let transport = ScpTransport::new(
            FakeSource::new(session.with_channel(channel)),
            target("web-01"),
            files,
        );
        let (_, ctx) = context();

        let outcome = Box::new(transport).run(&ctx).await;
        assert!(outcome.message().unwrap().contains("/nonexistent/app.war"));
        assert!(received.lock().files.is_empty());
        assert_eq!(session_probe.disconnects(), 1);
    }
}

mod sftp {
    use super::*;

    /// Test: Upload into a partly existing directory tree
    /// Expected: Only missing directories are created, each once
    #[tokio::test]
    async fn creates_missing_directories_once() {
        let dir = TempDir::new().unwrap();
        let files = artifacts(
            dir.path(),
            &[
                ("index.html", "<html/>"),
                ("css/site.css", "body{}"),
                ("css/print.css", "@media print{}"),
            ],
        );
        let fs = MemoryFs::with_dirs(&["srv"]);
        let (session, session_probe) = FakeSession::new("web-01");
        let transport = SftpTransport::new(
            FakeSource::new(session.with_files(fs.clone())),
            target("web-01/srv/www"),
            files,
        );
        let (_, ctx) = context();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Success);

        let state = fs.0.lock();
        assert_eq!(state.created_dirs, vec!["srv/www", "srv/www/css"]);
        assert_eq!(state.files["srv/www/index.html"], b"<html/>");
        assert_eq!(state.files["srv/www/css/site.css"], b"body{}");
        assert_eq!(state.files["srv/www/css/print.css"], b"@media print{}");
        assert_eq!(state.closes, 1);
        assert_eq!(session_probe.disconnects(), 1);
    }

    /// Test: Absolute base path
    /// Expected: Directories keep their leading slash
    #[tokio::test]
    async fn absolute_base_path_is_kept() {
        let dir = TempDir::new().unwrap();
        let files = artifacts(dir.path(), &[("app.jar", "jar")]);
        let fs = MemoryFs::with_dirs(&["/opt"]);
        let (session, _) = FakeSession::new("web-01");
        let transport = SftpTransport::new(
            FakeSource::new(session.with_files(fs.clone())),
            target("web-01//opt/app"),
            files,
        );
        let (_, ctx) = context();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Success);
        let state = fs.0.lock();
        assert_eq!(state.created_dirs, vec!["/opt/app"]);
        assert!(state.files.contains_key("/opt/app/app.jar"));
    }

    /// Test: The server rejects one upload
    /// Expected: Failed outcome, later files skipped, sftp and session closed
    #[tokio::test]
    async fn put_failure_stops_the_run() {
        let dir = TempDir::new().unwrap();
        let files = artifacts(dir.path(), &[("a", "1"), ("b", "2"), ("c", "3")]);
        let fs = MemoryFs::default().failing_on("b");
        let (session, session_probe) = FakeSession::new("web-01");
        let transport = SftpTransport::new(
            FakeSource::new(session.with_files(fs.clone())),
            target("web-01"),
            files,
        );
        let (log, ctx) = context();

        let outcome = Box::new(transport).run(&ctx).await;
        assert!(outcome.is_failure());
        assert_eq!(log.problems()[0].identity, "sftp-deploy-runner");

        let state = fs.0.lock();
        assert_eq!(state.files.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(state.closes, 1);
        assert_eq!(session_probe.disconnects(), 1);
    }

    /// Test: An entry whose remote path climbs with `..`
    /// Expected: Failed at that entry, sftp and session closed
    #[tokio::test]
    async fn parent_segments_fail_the_entry() {
        let dir = TempDir::new().unwrap();
        let files = artifacts(dir.path(), &[("ok.txt", "1"), ("../outside.txt", "2")]);
        let fs = MemoryFs::default();
        let (session, session_probe) = FakeSession::new("web-01");
        let transport = SftpTransport::new(
            FakeSource::new(session.with_files(fs.clone())),
            target("web-01/www"),
            files,
        );
        let (log, ctx) = context();

        assert!(Box::new(transport).run(&ctx).await.is_failure());
        assert_eq!(log.problems()[0].identity, "sftp-deploy-runner");

        let state = fs.0.lock();
        assert_eq!(state.files.keys().collect::<Vec<_>>(), vec!["www/ok.txt"]);
        assert_eq!(state.closes, 1);
        assert_eq!(session_probe.disconnects(), 1);
    }

    /// Test: The sftp subsystem cannot start
    /// Expected: Failed outcome and one disconnect
    #[tokio::test]
    async fn subsystem_failure_fails() {
        let (session, session_probe) = FakeSession::new("web-01");
        let transport = SftpTransport::new(
            FakeSource::new(session),
            target("web-01"),
            ArtifactSource::default(),
        );
        let (_, ctx) = context();

        assert!(Box::new(transport).run(&ctx).await.is_failure());
        assert_eq!(session_probe.disconnects(), 1);
    }

    /// Test: Nothing to upload
    /// Expected: Success with a "no artifacts" message
    #[tokio::test]
    async fn empty_artifact_list_succeeds() {
        let (session, _) = FakeSession::new("web-01");
        let transport = SftpTransport::new(
            FakeSource::new(session.with_files(MemoryFs::default())),
            target("web-01"),
            ArtifactSource::default(),
        );
        let (log, ctx) = context();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Success);
        assert!(log.messages().contains(&"No artifacts to upload".to_string()));
    }
}

mod ftp {
    use super::*;
    use deployer::transport::TransportError;
    use deployer::transport::ftp::{FtpClient, FtpConnector, FtpSettings, FtpTransport};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::io::Read;

    #[derive(Clone, Default)]
    struct Server {
        ops: Arc<Mutex<Vec<String>>>,
        dirs: Arc<Mutex<HashSet<String>>>,
        refuse_login: bool,
    }

    struct Client(Server);

    impl FtpClient for Client {
        fn current_dir(&mut self) -> deployer::transport::Result<String> {
            Ok("/home/deploy".to_string())
        }

        fn change_dir(&mut self, path: &str) -> deployer::transport::Result<()> {
            self.0.ops.lock().push(format!("CWD {path}"));
            if path.starts_with('/') || self.0.dirs.lock().contains(path) {
                Ok(())
            } else {
                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "550 No such directory",
                )))
            }
        }

        fn make_dir(&mut self, name: &str) -> deployer::transport::Result<()> {
            self.0.ops.lock().push(format!("MKD {name}"));
            self.0.dirs.lock().insert(name.to_string());
            Ok(())
        }

        fn put(&mut self, name: &str, reader: &mut dyn Read) -> deployer::transport::Result<u64> {
            let mut data = String::new();
            reader.read_to_string(&mut data)?;
            self.0.ops.lock().push(format!("STOR {name} {data}"));
            Ok(data.len() as u64)
        }

        fn quit(&mut self) -> deployer::transport::Result<()> {
            self.0.ops.lock().push("QUIT".to_string());
            Ok(())
        }
    }

    impl FtpConnector for Server {
        type Client = Client;

        fn connect(&self, settings: &FtpSettings) -> deployer::transport::Result<Client> {
            if self.refuse_login {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("530 Login incorrect for {}", settings.username),
                )));
            }
            Ok(Client(self.clone()))
        }
    }

    fn settings(raw: &str) -> FtpSettings {
        FtpSettings::new(&target(raw), "deploy", "secret")
    }

    /// Test: Upload into a relative base with a nested directory
    /// Expected: Directories created on demand, navigation only when it changes, then QUIT
    #[tokio::test]
    async fn uploads_with_on_demand_directories() {
        let dir = TempDir::new().unwrap();
        let files = artifacts(
            dir.path(),
            &[("a.txt", "A"), ("docs/b.txt", "B"), ("docs/c.txt", "C")],
        );
        let server = Server::default();
        let transport = FtpTransport::with_connector(
            server.clone(),
            settings("ftp://files.example.com/upload"),
            files,
        );
        let (log, ctx) = context();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Success);
        assert_eq!(
            *server.ops.lock(),
            vec![
                "CWD /home/deploy",
                "CWD upload",
                "MKD upload",
                "CWD upload",
                "STOR a.txt A",
                "CWD /home/deploy",
                "CWD upload",
                "CWD docs",
                "MKD docs",
                "CWD docs",
                "STOR b.txt B",
                "STOR c.txt C",
                "QUIT",
            ]
        );
        assert!(
            log.messages()
                .contains(&"Uploaded [3] file(s) to [files.example.com:21]".to_string())
        );
    }

    /// Test: Absolute base path
    /// Expected: Navigation starts at the server root
    #[tokio::test]
    async fn absolute_base_starts_at_root() {
        let dir = TempDir::new().unwrap();
        let files = artifacts(dir.path(), &[("app.zip", "Z")]);
        let server = Server::default();
        server.dirs.lock().insert("pub".to_string());
        let transport =
            FtpTransport::with_connector(server.clone(), settings("ftp.example.com//pub"), files);
        let (_, ctx) = context();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Success);
        assert_eq!(
            *server.ops.lock(),
            vec!["CWD /", "CWD pub", "STOR app.zip Z", "QUIT"]
        );
    }

    /// Test: Login is refused
    /// Expected: Failed outcome with an ftp deployment problem
    #[tokio::test]
    async fn login_failure_fails() {
        let server = Server {
            refuse_login: true,
            ..Server::default()
        };
        let transport = FtpTransport::with_connector(
            server.clone(),
            settings("ftp.example.com"),
            ArtifactSource::default(),
        );
        let (log, ctx) = context();

        let outcome = Box::new(transport).run(&ctx).await;
        assert!(outcome.message().unwrap().contains("530"));
        assert_eq!(log.problems()[0].identity, "ftp-deploy-runner");
        assert!(server.ops.lock().is_empty());
    }

    /// Test: Cancellation before login completes
    /// Expected: Interrupted outcome
    #[tokio::test]
    async fn cancelled_before_connect() {
        let transport = FtpTransport::with_connector(
            Server::default(),
            settings("ftp.example.com"),
            ArtifactSource::default(),
        );
        let (_, ctx) = context();
        ctx.cancel.cancel();

        assert_eq!(Box::new(transport).run(&ctx).await, Outcome::Interrupted);
    }
}
