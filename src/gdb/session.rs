//! Debugger session transport
//!
//! The dispatcher only needs three things from a session: whether it is
//! alive, a way to append a command line, and the text that arrives back.
//! [`GdbProcess`] provides them for a spawned gdb; [`ChannelSession`] for a
//! host that already owns a terminal REPL and forwards its traffic.

use crate::gdb::parser::ResponseBuffer;
use crate::gdb::types::GdbConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// "Debugger attached/running" predicate
pub trait SessionProbe: Send + Sync {
    fn is_running(&self) -> bool;
}

/// Shared liveness flag, flipped by whoever owns the stream
#[derive(Debug, Clone, Default)]
pub struct SessionFlag(Arc<AtomicBool>);

impl SessionFlag {
    pub fn new(running: bool) -> Self {
        Self(Arc::new(AtomicBool::new(running)))
    }

    pub fn set_running(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }
}

impl SessionProbe for SessionFlag {
    fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Line-oriented text I/O with the debugger
#[async_trait]
pub trait SessionIo: Send + 'static {
    /// Liveness probe that can be consulted without owning the session
    fn probe(&self) -> Arc<dyn SessionProbe>;

    /// Append one command line to the debugger input
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Next chunk of output text, `None` once the stream has ended.
    ///
    /// Must be cancel-safe: dropping the future loses no text.
    async fn read_chunk(&mut self) -> io::Result<Option<String>>;
}

/// A gdb child process driven over pipes
pub struct GdbProcess {
    child: Child,
    stdin: ChildStdin,
    output: mpsc::UnboundedReceiver<String>,
    flag: SessionFlag,
}

impl GdbProcess {
    /// Spawn gdb, wait for its first prompt and apply console settings
    pub async fn spawn(config: &GdbConfig, program: Option<&str>) -> Result<Self> {
        info!("Starting GDB: {}", config.gdb_path);

        let mut cmd = merged_output_command(config);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(program) = program {
            cmd.arg(program);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("Failed to get stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("Failed to get stdout"))?;

        let flag = SessionFlag::new(true);
        let (tx, output) = mpsc::unbounded_channel();
        tokio::spawn(pump(stdout, tx, flag.clone()));

        let mut process = Self {
            child,
            stdin,
            output,
            flag,
        };
        process.initialize(config).await?;

        info!("GDB started successfully");
        Ok(process)
    }

    async fn initialize(&mut self, config: &GdbConfig) -> Result<()> {
        let mut buffer = ResponseBuffer::new(config.prompt.clone());
        self.expect_prompt(&mut buffer, config).await?;

        for setting in [
            "set pagination off",
            "set confirm off",
            "set width 0",
            "set height 0",
        ] {
            self.write_line(setting).await?;
            self.expect_prompt(&mut buffer, config).await?;
        }
        Ok(())
    }

    async fn expect_prompt(&mut self, buffer: &mut ResponseBuffer, config: &GdbConfig) -> Result<()> {
        let deadline = tokio::time::Instant::now() + config.startup_timeout();
        loop {
            let chunk = tokio::time::timeout_at(deadline, self.output.recv())
                .await
                .map_err(|_| anyhow!("Timeout waiting for the gdb prompt"))?
                .ok_or_else(|| anyhow!("gdb exited during startup"))?;
            let frames = buffer.push(&chunk);
            if let Some(frame) = frames.into_iter().next() {
                debug!("Startup output: {:?}", frame);
                return Ok(());
            }
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// gdb writes error messages to stderr and the prompt to stdout. Two pipes
/// give no ordering between them, so stderr is redirected into stdout
/// inside the child and the session reads a single stream.
#[cfg(unix)]
fn merged_output_command(config: &GdbConfig) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(r#"exec "$0" "$@" 2>&1"#)
        .arg(&config.gdb_path)
        .args(&config.gdb_args);
    cmd
}

// TODO: merge stderr on Windows too; error lines are only logged there.
#[cfg(not(unix))]
fn merged_output_command(config: &GdbConfig) -> Command {
    warn!("stderr is not merged on this platform; debugger errors will not reach callers");
    let mut cmd = Command::new(&config.gdb_path);
    cmd.args(&config.gdb_args);
    cmd
}

/// Forward raw output to the session channel until EOF
async fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<String>, flag: SessionFlag)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(text).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Error reading GDB output: {}", e);
                break;
            }
        }
    }
    flag.set_running(false);
    info!("GDB output reader stopped");
}

#[async_trait]
impl SessionIo for GdbProcess {
    fn probe(&self) -> Arc<dyn SessionProbe> {
        Arc::new(self.flag.clone())
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    async fn read_chunk(&mut self) -> io::Result<Option<String>> {
        Ok(self.output.recv().await)
    }
}

/// Session backed by channels, for hosts that own the terminal REPL
pub struct ChannelSession {
    commands: mpsc::UnboundedSender<String>,
    output: mpsc::UnboundedReceiver<String>,
    flag: SessionFlag,
}

/// The host side of a [`ChannelSession`]
pub struct ChannelPeer {
    commands: mpsc::UnboundedReceiver<String>,
    output: mpsc::UnboundedSender<String>,
    flag: SessionFlag,
}

impl ChannelSession {
    /// A connected pair; the session starts out running
    pub fn pair() -> (ChannelSession, ChannelPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let flag = SessionFlag::new(true);
        (
            ChannelSession {
                commands: command_tx,
                output: output_rx,
                flag: flag.clone(),
            },
            ChannelPeer {
                commands: command_rx,
                output: output_tx,
                flag,
            },
        )
    }
}

impl ChannelPeer {
    /// Next command line written by the dispatcher
    pub async fn next_command(&mut self) -> Option<String> {
        self.commands.recv().await
    }

    pub fn try_next_command(&mut self) -> Option<String> {
        self.commands.try_recv().ok()
    }

    /// Feed debugger output text back to the dispatcher
    pub fn send_output(&self, text: impl Into<String>) -> bool {
        self.output.send(text.into()).is_ok()
    }

    pub fn set_running(&self, running: bool) {
        self.flag.set_running(running);
    }

    /// Liveness flag shared with the session
    pub fn flag(&self) -> SessionFlag {
        self.flag.clone()
    }
}

#[async_trait]
impl SessionIo for ChannelSession {
    fn probe(&self) -> Arc<dyn SessionProbe> {
        Arc::new(self.flag.clone())
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.commands
            .send(line.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host REPL closed"))
    }

    async fn read_chunk(&mut self) -> io::Result<Option<String>> {
        Ok(self.output.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::dispatcher::Dispatcher;
    use crate::gdb::error::DispatchError;
    use crate::gdb::testing::test_config;
    use tokio_test::assert_ok;

    /// Stand-in gdb that, like the real one, reports errors on stderr and
    /// prints its prompt on stdout
    #[cfg(unix)]
    const SCRIPTED_GDB: &str = r#"
printf '(gdb) '
while IFS= read -r line; do
  case "$line" in
    "print nope") echo 'No symbol "nope" in current context.' >&2 ;;
    "print 1") echo '$1 = 1' ;;
  esac
  printf '(gdb) '
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_gdb_errors_stay_with_their_command() {
        let config = GdbConfig {
            gdb_path: "sh".to_string(),
            gdb_args: vec!["-c".to_string(), SCRIPTED_GDB.to_string()],
            ..test_config()
        };
        let process = assert_ok!(GdbProcess::spawn(&config, None).await);
        let dispatcher = Dispatcher::spawn(process, &config);

        for _ in 0..20 {
            assert_eq!(
                dispatcher.request("print nope", None).await,
                Err(DispatchError::Debugger("No symbol \"nope\" in current context.".to_string()))
            );
            assert_eq!(assert_ok!(dispatcher.request("print 1", None).await), vec!["$1 = 1"]);
        }
    }

    #[tokio::test]
    async fn test_channel_session_round_trip() {
        let (mut session, mut peer) = ChannelSession::pair();
        let probe = session.probe();
        assert!(probe.is_running());

        session.write_line("info frame").await.unwrap();
        assert_eq!(peer.next_command().await.as_deref(), Some("info frame"));

        assert!(peer.send_output("Stack level 0\n(gdb) "));
        assert_eq!(
            session.read_chunk().await.unwrap().as_deref(),
            Some("Stack level 0\n(gdb) ")
        );

        peer.set_running(false);
        assert!(!probe.is_running());
    }

    #[tokio::test]
    async fn test_channel_session_reports_closed_host() {
        let (mut session, peer) = ChannelSession::pair();
        drop(peer);
        assert!(session.write_line("print 1").await.is_err());
        assert_eq!(session.read_chunk().await.unwrap(), None);
    }
}
