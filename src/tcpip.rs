//! Direct-tcpip channels forwarded into emulated application servers.
//!
//! No bytes ever reach a real upstream: the port decides which emulator
//! serves the channel, and an unknown port gets accepted and then closed.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::Handle;
use russh::ChannelId;
use tokio::sync::{mpsc, oneshot};

use crate::events::{Event, Recorder};
use crate::session::ChannelSink;
use crate::shell::commands::ByteSink;

/// An emulated application server behind a forwarded port. Observed request
/// dumps flow through `observed` while the connection is being served.
#[async_trait]
pub trait Emulator: Send + Sync {
    async fn serve(
        &self,
        stream: &mut ForwardStream,
        observed: mpsc::Sender<String>,
    ) -> io::Result<()>;

    /// The event an observed request dump becomes in the log.
    fn observed<'a>(&self, dump: &'a str) -> Event<'a>;
}

/// The two halves of a forwarded channel as an emulator sees them: incoming
/// data packets and a write path back to the client.
pub struct ForwardStream {
    rx: mpsc::Receiver<Vec<u8>>,
    sink: Box<dyn ByteSink>,
}

impl ForwardStream {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>, sink: Box<dyn ByteSink>) -> Self {
        Self { rx, sink }
    }

    /// The next data packet, or `None` at end of stream.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sink.write_all(buf).await
    }
}

/// Port -> emulator table, fixed at startup.
pub struct EmulatorRegistry {
    servers: HashMap<u32, Arc<dyn Emulator>>,
}

impl EmulatorRegistry {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    pub fn builtin() -> Arc<Self> {
        let mut registry = Self::new();
        registry.register(80, Arc::new(HttpEmulator));
        Arc::new(registry)
    }

    pub fn register(&mut self, port: u32, emulator: Arc<dyn Emulator>) {
        self.servers.insert(port, emulator);
    }

    pub fn get(&self, port: u32) -> Option<Arc<dyn Emulator>> {
        self.servers.get(&port).cloned()
    }
}

impl Default for EmulatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one forwarded channel to completion and closes it, write side
/// first. `emulator = None` is the unsupported-port case: the channel was
/// accepted and is now simply closed.
pub async fn run_forward(
    handle: Handle,
    id: ChannelId,
    recorder: Recorder,
    emulator: Option<Arc<dyn Emulator>>,
    data_rx: mpsc::Receiver<Vec<u8>>,
) {
    let Some(emulator) = emulator else {
        let _ = handle.close(id).await;
        return;
    };

    let (observed_tx, observed_rx) = mpsc::channel(1);
    let (done_tx, done_rx) = oneshot::channel();
    let sink = ChannelSink::new(handle.clone(), id);
    let serve_emulator = emulator.clone();
    tokio::spawn(async move {
        let mut stream = ForwardStream::new(data_rx, Box::new(sink));
        let _ = done_tx.send(serve_emulator.serve(&mut stream, observed_tx).await);
    });

    // Merge observed requests with the emulator's terminal result, dropping
    // each source once it finishes; pending observations are drained before
    // the channel goes down.
    let mut observed_rx = Some(observed_rx);
    let mut done_rx = Some(done_rx);
    while observed_rx.is_some() || done_rx.is_some() {
        tokio::select! {
            dump = recv_or_pending(&mut observed_rx) => match dump {
                Some(dump) => recorder.record(emulator.observed(&dump)),
                None => observed_rx = None,
            },
            result = done_or_pending(&mut done_rx) => {
                if let Ok(Err(err)) = result {
                    log::debug!(
                        "emulator on channel {:?} ended with error: {err}",
                        recorder.channel_id()
                    );
                }
                done_rx = None;
            }
        }
    }

    let _ = handle.eof(id).await;
    let _ = handle.close(id).await;
}

async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn done_or_pending(
    rx: &mut Option<oneshot::Receiver<io::Result<()>>>,
) -> Result<io::Result<()>, oneshot::error::RecvError> {
    match rx {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

const HTTP_NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";

/// The port-80 emulator: read HTTP/1.x requests one by one, dump each into
/// the event stream, answer every single one with a 404.
pub struct HttpEmulator;

#[async_trait]
impl Emulator for HttpEmulator {
    async fn serve(
        &self,
        stream: &mut ForwardStream,
        observed: mpsc::Sender<String>,
    ) -> io::Result<()> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let header_end = loop {
                if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                    break pos + 4;
                }
                match stream.recv().await {
                    Some(chunk) => buf.extend_from_slice(&chunk),
                    None if buf.is_empty() => return Ok(()),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-request",
                        ))
                    }
                }
            };
            let body_len = parse_headers(&buf[..header_end])?;
            while buf.len() < header_end + body_len {
                match stream.recv().await {
                    Some(chunk) => buf.extend_from_slice(&chunk),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-body",
                        ))
                    }
                }
            }
            let request: Vec<u8> = buf.drain(..header_end + body_len).collect();
            if observed
                .send(String::from_utf8_lossy(&request).into_owned())
                .await
                .is_err()
            {
                return Ok(());
            }
            stream.write_all(HTTP_NOT_FOUND).await?;
        }
    }

    fn observed<'a>(&self, dump: &'a str) -> Event<'a> {
        Event::HttpRequest { request: dump }
    }
}

/// Validate the request line and extract the Content-Length. Anything that
/// does not look like `METHOD TARGET HTTP/x.y` is a parse error that ends
/// the emulation.
fn parse_headers(header_block: &[u8]) -> io::Result<usize> {
    let text = std::str::from_utf8(header_block)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request is not UTF-8"))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, _target, version) = (parts.next(), parts.next(), parts.next());
    let well_formed = method.is_some_and(|m| !m.is_empty())
        && version.is_some_and(|v| v.starts_with("HTTP/"))
        && parts.next().is_none();
    if !well_formed {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed request line: {request_line:?}"),
        ));
    }
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "bad Content-Length")
                });
            }
        }
    }
    Ok(0)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Emulator, EmulatorRegistry, ForwardStream, HttpEmulator};
    use crate::shell::commands::ByteSink;

    /// A sink the test can keep a handle on after it moves into the stream.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    #[async_trait]
    impl ByteSink for SharedBuffer {
        async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }
    }

    async fn serve_http(chunks: Vec<&[u8]>) -> (std::io::Result<()>, Vec<String>, Vec<u8>) {
        let (data_tx, data_rx) = mpsc::channel(16);
        for chunk in chunks {
            data_tx.send(chunk.to_vec()).await.unwrap();
        }
        drop(data_tx);

        let response = SharedBuffer::default();
        let mut stream = ForwardStream::new(data_rx, Box::new(response.clone()));
        let (observed_tx, mut observed_rx) = mpsc::channel(16);
        let result = HttpEmulator.serve(&mut stream, observed_tx).await;

        let mut dumps = Vec::new();
        while let Some(dump) = observed_rx.recv().await {
            dumps.push(dump);
        }
        let written = response.0.lock().unwrap().clone();
        (result, dumps, written)
    }

    #[tokio::test]
    async fn answers_every_request_with_404() {
        let (result, dumps, written) =
            serve_http(vec![b"GET / HTTP/1.0\r\nHost: x\r\n\r\n"]).await;
        result.unwrap();
        assert_eq!(dumps, vec!["GET / HTTP/1.0\r\nHost: x\r\n\r\n"]);
        assert_eq!(written, b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn reads_bodies_and_split_packets() {
        let (result, dumps, written) = serve_http(vec![
            b"POST /login HTTP/1.1\r\nContent-Le",
            b"ngth: 9\r\n\r\nuser=root",
            b"GET /next HTTP/1.1\r\n\r\n",
        ])
        .await;
        result.unwrap();
        assert_eq!(dumps.len(), 2);
        assert!(dumps[0].ends_with("user=root"));
        assert_eq!(dumps[1], "GET /next HTTP/1.1\r\n\r\n");
        assert_eq!(
            written,
            [
                &b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"[..],
                &b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"[..]
            ]
            .concat()
        );
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error() {
        let (result, dumps, written) = serve_http(vec![b"SSH-2.0-OpenSSH_8.9\r\n\r\n"]).await;
        assert!(result.is_err());
        assert!(dumps.is_empty());
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn eof_mid_request_is_an_error_but_clean_eof_is_not() {
        let (result, _, _) = serve_http(vec![b"GET / HTTP/1.0\r\nHos"]).await;
        assert!(result.is_err());

        let (result, dumps, _) = serve_http(vec![]).await;
        result.unwrap();
        assert!(dumps.is_empty());
    }

    #[test]
    fn registry_serves_port_80_only() {
        let registry = EmulatorRegistry::builtin();
        assert!(registry.get(80).is_some());
        assert!(registry.get(25).is_none());
    }
}
