//! Session channel handling: the per-channel request state machine and the
//! plumbing that turns an SSH data stream into the shell's stdin/stdout.
//!
//! Channel requests arrive through the connection handler and are answered
//! from the state machine here; once `shell` or `exec` starts a program, the
//! program runs on its own task, reading lines pumped over an mpsc from the
//! channel's data packets and writing back through the session handle.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::events::{Event, Recorder};
use crate::shell::commands::{
    ByteSink, CommandContext, CommandIo, CommandRegistry, LineReader, SharedFs,
};

/// Backlog of unconsumed data packets per channel before the connection
/// handler starts exerting backpressure.
const STDIN_BACKLOG: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Fresh,
    PtyRequested,
    Running,
}

/// One session channel's lifecycle: `Fresh` until an optional `pty-req`,
/// `Running` once `shell` or `exec` started a program, closed when the
/// program finishes or the client goes away.
pub struct SessionChannel {
    recorder: Recorder,
    user: String,
    state: State,
    stdin_tx: Option<mpsc::Sender<Vec<u8>>>,
    stdin_rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl SessionChannel {
    pub fn new(recorder: Recorder, user: String) -> Self {
        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_BACKLOG);
        Self {
            recorder,
            user,
            state: State::Fresh,
            stdin_tx: Some(stdin_tx),
            stdin_rx: Some(stdin_rx),
        }
    }

    fn pty(&self) -> bool {
        self.state == State::PtyRequested
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    pub fn pty_request(&mut self, term: &str, cols: u32, rows: u32) -> bool {
        let accepted = self.state == State::Fresh;
        self.recorder.record(Event::ChannelRequest {
            request: "pty-req",
            payload: format!("term={term} cols={cols} rows={rows}"),
            accepted,
        });
        if accepted {
            self.state = State::PtyRequested;
        }
        accepted
    }

    pub fn env_request(&mut self, name: &str, value: &str) -> bool {
        self.recorder.record(Event::ChannelRequest {
            request: "env",
            payload: format!("{name}={value}"),
            accepted: true,
        });
        true
    }

    pub fn window_change(&mut self, cols: u32, rows: u32) -> bool {
        self.recorder.record(Event::ChannelRequest {
            request: "window-change",
            payload: format!("cols={cols} rows={rows}"),
            accepted: true,
        });
        true
    }

    pub fn subsystem_request(&mut self, name: &str) -> bool {
        self.recorder.record(Event::ChannelRequest {
            request: "subsystem",
            payload: name.to_string(),
            accepted: false,
        });
        false
    }

    /// Anything the state machine has no behavior for: logged, refused.
    pub fn refuse_request(&mut self, request: &'static str, payload: String) -> bool {
        self.recorder.record(Event::ChannelRequest {
            request,
            payload,
            accepted: false,
        });
        false
    }

    pub fn shell_request(
        &mut self,
        handle: Handle,
        id: ChannelId,
        fs: SharedFs,
        registry: Arc<CommandRegistry>,
        tasks: &mut JoinSet<()>,
    ) -> bool {
        self.start(
            handle,
            id,
            fs,
            registry,
            tasks,
            "shell",
            String::new(),
            vec!["sh".to_string()],
        )
    }

    pub fn exec_request(
        &mut self,
        handle: Handle,
        id: ChannelId,
        fs: SharedFs,
        registry: Arc<CommandRegistry>,
        tasks: &mut JoinSet<()>,
        command_line: &str,
    ) -> bool {
        let args = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();
        self.start(
            handle,
            id,
            fs,
            registry,
            tasks,
            "exec",
            command_line.to_string(),
            args,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn start(
        &mut self,
        handle: Handle,
        id: ChannelId,
        fs: SharedFs,
        registry: Arc<CommandRegistry>,
        tasks: &mut JoinSet<()>,
        request: &'static str,
        payload: String,
        args: Vec<String>,
    ) -> bool {
        if self.is_running() {
            return self.refuse_request(request, payload);
        }
        let Some(stdin_rx) = self.stdin_rx.take() else {
            return self.refuse_request(request, payload);
        };
        self.recorder.record(Event::ChannelRequest {
            request,
            payload,
            accepted: true,
        });
        let pty = self.pty();
        self.state = State::Running;
        let recorder = self.recorder.clone();
        let user = self.user.clone();
        tasks.spawn(async move {
            run_program(handle, id, recorder, fs, registry, user, pty, args, stdin_rx).await;
        });
        true
    }

    /// A data packet from the client, pumped into the running program's stdin.
    pub async fn data(&mut self, bytes: &[u8]) {
        if let Some(tx) = &self.stdin_tx {
            // A send failure means the program already finished; the bytes
            // have nowhere meaningful to go.
            let _ = tx.send(bytes.to_vec()).await;
        }
    }

    /// Client EOF: the program's next read sees end-of-stream.
    pub fn eof(&mut self) {
        self.stdin_tx = None;
    }

    pub fn closed(&self) {
        self.recorder.record(Event::ChannelClose {});
    }
}

/// Runs `args` to completion, then reports the exit status and closes the
/// channel, write side first.
#[allow(clippy::too_many_arguments)]
async fn run_program(
    handle: Handle,
    id: ChannelId,
    recorder: Recorder,
    fs: SharedFs,
    registry: Arc<CommandRegistry>,
    user: String,
    pty: bool,
    args: Vec<String>,
    stdin_rx: mpsc::Receiver<Vec<u8>>,
) {
    let mut ctx = CommandContext::new(user, pty, fs, registry).await;
    ctx.args = args;
    let mut stdin = LoggedLines::new(ChannelLineReader::new(stdin_rx), recorder.clone());
    let mut stdout = ChannelSink::new(handle.clone(), id);
    let mut io = CommandIo::merged(&mut stdin, &mut stdout);
    let status = match ctx.registry.clone().execute(&mut ctx, &mut io).await {
        Ok(status) => status,
        Err(err) => {
            log::debug!(
                "program on channel {:?} ended on I/O error: {}",
                recorder.channel_id(),
                err.source
            );
            err.status
        }
    };
    let _ = handle.exit_status_request(id, status).await;
    let _ = handle.eof(id).await;
    let _ = handle.close(id).await;
}

/// Line reader over the channel's data packets. Lines end at `\n` or a bare
/// `\r` (raw pty enter); `\r\n` counts once.
pub struct ChannelLineReader {
    rx: mpsc::Receiver<Vec<u8>>,
    buf: Vec<u8>,
}

impl ChannelLineReader {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }
}

#[async_trait]
impl LineReader for ChannelLineReader {
    async fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                let terminator = self.buf[pos];
                let line = self.buf[..pos].to_vec();
                self.buf.drain(..=pos);
                if terminator == b'\r' && self.buf.first() == Some(&b'\n') {
                    self.buf.remove(0);
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            match self.rx.recv().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "channel data stream closed",
                    ))
                }
            }
        }
    }
}

/// Logs every line the client manages to type as a `channel-input` event.
pub struct LoggedLines<R> {
    inner: R,
    recorder: Recorder,
}

impl<R> LoggedLines<R> {
    pub fn new(inner: R, recorder: Recorder) -> Self {
        Self { inner, recorder }
    }
}

#[async_trait]
impl<R: LineReader> LineReader for LoggedLines<R> {
    async fn read_line(&mut self) -> io::Result<String> {
        let line = self.inner.read_line().await?;
        self.recorder.record(Event::ChannelInput { input: &line });
        Ok(line)
    }
}

/// Byte sink writing to the channel's primary data stream through the
/// session handle; stderr shares it, merged by the caller.
pub struct ChannelSink {
    handle: Handle,
    id: ChannelId,
}

impl ChannelSink {
    pub fn new(handle: Handle, id: ChannelId) -> Self {
        Self { handle, id }
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.handle
            .data(self.id, CryptoVec::from_slice(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "ssh channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::ChannelLineReader;
    use crate::shell::commands::LineReader;

    async fn reader_over(chunks: Vec<&[u8]>) -> ChannelLineReader {
        let (tx, rx) = mpsc::channel(16);
        for chunk in chunks {
            tx.send(chunk.to_vec()).await.unwrap();
        }
        drop(tx);
        ChannelLineReader::new(rx)
    }

    #[tokio::test]
    async fn splits_lines_on_lf() {
        let mut reader = reader_over(vec![b"ls\nexit\n"]).await;
        assert_eq!(reader.read_line().await.unwrap(), "ls");
        assert_eq!(reader.read_line().await.unwrap(), "exit");
    }

    #[tokio::test]
    async fn reassembles_lines_across_packets() {
        let mut reader = reader_over(vec![b"cat pw", b"d.txt", b"\n"]).await;
        assert_eq!(reader.read_line().await.unwrap(), "cat pwd.txt");
    }

    #[tokio::test]
    async fn crlf_and_bare_cr_both_terminate() {
        let mut reader = reader_over(vec![b"one\r\ntwo\rthree\n"]).await;
        assert_eq!(reader.read_line().await.unwrap(), "one");
        assert_eq!(reader.read_line().await.unwrap(), "two");
        assert_eq!(reader.read_line().await.unwrap(), "three");
    }

    #[tokio::test]
    async fn eof_surfaces_as_unexpected_eof() {
        let mut reader = reader_over(vec![b"partial"]).await;
        let err = reader.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
