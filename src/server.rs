use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use russh::keys::{HashAlg, PublicKey};
use russh::server::{self, Auth, Handler, Msg, Response, Session};
use russh::{Channel, ChannelId, Error, Pty, Sig};
use ssh_encoding::Error as SshEncodingError;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::events::{Event, Recorder};
use crate::session::SessionChannel;
use crate::shell::commands::{CommandRegistry, SharedFs};
use crate::tcpip::{self, EmulatorRegistry};

/// Backlog of unconsumed data packets per forwarded channel.
const FORWARD_BACKLOG: usize = 64;

/// Per-channel state the connection routes requests and data into.
enum ChannelKind {
    Session(SessionChannel),
    Forward(ForwardChannel),
}

/// A direct-tcpip channel as the connection sees it: every request is
/// refused, data is pumped to the emulator task.
struct ForwardChannel {
    recorder: Recorder,
    data_tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl ForwardChannel {
    fn refuse_request(&self, request: &'static str, payload: String) -> bool {
        self.recorder.record(Event::ChannelRequest {
            request,
            payload,
            accepted: false,
        });
        false
    }
}

// One handler per established connection; owns the connection context, the
// channel table, and the handles of every channel task it spawned.
pub struct ConnectionHandler {
    config: Arc<Config>,
    fs: SharedFs,
    registry: Arc<CommandRegistry>,
    emulators: Arc<EmulatorRegistry>,
    recorder: Recorder,
    user: Option<String>,
    next_channel_id: u64,
    channels: HashMap<ChannelId, ChannelKind>,
    /// Outstanding channel tasks. The connection is not considered torn down
    /// until this set has drained.
    tasks: JoinSet<()>,
}

impl ConnectionHandler {
    fn allocate_channel_id(&mut self) -> u64 {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        id
    }

    fn emulated_user(&self) -> String {
        self.user.clone().unwrap_or_else(|| "user".to_string())
    }

    fn reply(
        session: &mut Session,
        channel: ChannelId,
        accepted: bool,
    ) -> Result<(), russh::Error> {
        if accepted {
            session.channel_success(channel)
        } else {
            session.channel_failure(channel)
        }
    }

    /// Let the client stew a little before the verdict, like a real sshd
    /// doing PAM work would.
    async fn auth_delay() {
        let delay = rand::rng().random_range(0..500);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
}

impl Handler for ConnectionHandler {
    type Error = russh::Error;

    fn auth_none(&mut self, user: &str) -> impl Future<Output = Result<Auth, Self::Error>> + Send {
        async move {
            self.user = Some(user.to_string());
            self.recorder.record(Event::NoAuth {
                user,
                accepted: false,
            });
            Ok(Auth::reject())
        }
    }

    fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> impl Future<Output = Result<Auth, Self::Error>> + Send {
        async move {
            self.user = Some(user.to_string());
            if !self.config.auth.password.enabled {
                return Ok(Auth::reject());
            }
            let accepted = self.config.password_verdict(user, password);
            self.recorder.record(Event::PasswordAuth {
                user,
                password,
                accepted,
            });
            Self::auth_delay().await;
            if accepted {
                Ok(Auth::Accept)
            } else {
                Ok(Auth::reject())
            }
        }
    }

    fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> impl Future<Output = Result<Auth, Self::Error>> + Send {
        let fingerprint = format!("{}", public_key.key_data().fingerprint(HashAlg::Sha256));
        async move {
            self.user = Some(user.to_string());
            if !self.config.auth.public_key.enabled {
                return Ok(Auth::reject());
            }
            let accepted = self.config.public_key_verdict();
            self.recorder.record(Event::PublicKeyAuth {
                user,
                fingerprint,
                accepted,
            });
            Self::auth_delay().await;
            if accepted {
                Ok(Auth::Accept)
            } else {
                Ok(Auth::reject())
            }
        }
    }

    fn auth_keyboard_interactive<'a>(
        &'a mut self,
        user: &str,
        _submethods: &str,
        response: Option<Response<'a>>,
    ) -> impl Future<Output = Result<Auth, Self::Error>> + Send {
        async move {
            self.user = Some(user.to_string());
            let method = &self.config.auth.keyboard_interactive;
            if !method.enabled {
                return Ok(Auth::reject());
            }
            let Some(response) = response else {
                // First round: pose the configured challenge.
                return Ok(Auth::Partial {
                    name: "".into(),
                    instructions: method.instruction.clone().into(),
                    prompts: method
                        .questions
                        .iter()
                        .map(|q| (q.text.clone().into(), q.echo))
                        .collect::<Vec<_>>()
                        .into(),
                });
            };
            let answers: Vec<String> = response
                .map(|answer| String::from_utf8_lossy(&answer).into_owned())
                .collect();
            let accepted = self.config.keyboard_interactive_verdict(user, &answers);
            self.recorder.record(Event::KeyboardInteractiveAuth {
                user,
                answers: &answers,
                accepted,
            });
            Self::auth_delay().await;
            if accepted {
                Ok(Auth::Accept)
            } else {
                Ok(Auth::reject())
            }
        }
    }

    fn authentication_banner(
        &mut self,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send {
        let banner = self.config.normalized_banner();
        async move { Ok(banner) }
    }

    fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        async move {
            let id = self.allocate_channel_id();
            let recorder = self.recorder.channel(id);
            recorder.record(Event::ChannelOpen {
                channel_type: "session",
                extra_data: String::new(),
            });
            let user = self.emulated_user();
            self.channels.insert(
                channel.id(),
                ChannelKind::Session(SessionChannel::new(recorder, user)),
            );
            Ok(true)
        }
    }

    fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        async move {
            let id = self.allocate_channel_id();
            let recorder = self.recorder.channel(id);
            let emulator = self.emulators.get(port_to_connect);
            recorder.record(Event::ChannelOpen {
                channel_type: "direct-tcpip",
                extra_data: format!(
                    "{originator_address}:{originator_port} -> {host_to_connect}:{port_to_connect}"
                ),
            });
            recorder.record(Event::TcpipForward {
                address: host_to_connect,
                port: port_to_connect,
                originator_address,
                originator_port,
                unsupported: emulator.is_none(),
            });
            if emulator.is_none() {
                log::info!("unsupported forward port {port_to_connect}, closing after accept");
            }

            let (data_tx, data_rx) = mpsc::channel(FORWARD_BACKLOG);
            let handle = session.handle();
            let channel_id = channel.id();
            let task_recorder = recorder.clone();
            self.tasks.spawn(async move {
                tcpip::run_forward(handle, channel_id, task_recorder, emulator, data_rx).await;
            });
            self.channels.insert(
                channel.id(),
                ChannelKind::Forward(ForwardChannel {
                    recorder,
                    data_tx: Some(data_tx),
                }),
            );
            Ok(true)
        }
    }

    fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => state.data(data).await,
                Some(ChannelKind::Forward(state)) => {
                    if let Some(tx) = &state.data_tx {
                        let _ = tx.send(data.to_vec()).await;
                    }
                }
                None => {}
            }
            Ok(())
        }
    }

    fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let accepted = match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => {
                    state.pty_request(term, col_width, row_height)
                }
                Some(ChannelKind::Forward(state)) => {
                    state.refuse_request("pty-req", term.to_string())
                }
                None => false,
            };
            Self::reply(session, channel, accepted)?;
            Ok(())
        }
    }

    fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let accepted = match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => {
                    state.env_request(variable_name, variable_value)
                }
                Some(ChannelKind::Forward(state)) => {
                    state.refuse_request("env", format!("{variable_name}={variable_value}"))
                }
                None => false,
            };
            Self::reply(session, channel, accepted)?;
            Ok(())
        }
    }

    fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let handle = session.handle();
            let accepted = match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => state.shell_request(
                    handle,
                    channel,
                    self.fs.clone(),
                    self.registry.clone(),
                    &mut self.tasks,
                ),
                Some(ChannelKind::Forward(state)) => {
                    state.refuse_request("shell", String::new())
                }
                None => false,
            };
            Self::reply(session, channel, accepted)?;
            Ok(())
        }
    }

    fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let command_line = String::from_utf8_lossy(data).into_owned();
            let handle = session.handle();
            let accepted = match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => state.exec_request(
                    handle,
                    channel,
                    self.fs.clone(),
                    self.registry.clone(),
                    &mut self.tasks,
                    &command_line,
                ),
                Some(ChannelKind::Forward(state)) => state.refuse_request("exec", command_line),
                None => false,
            };
            Self::reply(session, channel, accepted)?;
            Ok(())
        }
    }

    fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let accepted = match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => state.subsystem_request(name),
                Some(ChannelKind::Forward(state)) => {
                    state.refuse_request("subsystem", name.to_string())
                }
                None => false,
            };
            Self::reply(session, channel, accepted)?;
            Ok(())
        }
    }

    fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let accepted = match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => state.window_change(col_width, row_height),
                Some(ChannelKind::Forward(state)) => state.refuse_request(
                    "window-change",
                    format!("cols={col_width} rows={row_height}"),
                ),
                None => false,
            };
            Self::reply(session, channel, accepted)?;
            Ok(())
        }
    }

    fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let payload = format!("{signal:?}");
            match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => {
                    state.refuse_request("signal", payload);
                }
                Some(ChannelKind::Forward(state)) => {
                    state.refuse_request("signal", payload);
                }
                None => {}
            }
            session.channel_failure(channel)?;
            Ok(())
        }
    }

    fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            match self.channels.get_mut(&channel) {
                Some(ChannelKind::Session(state)) => {
                    state.eof();
                    // Nothing is running that could notice the EOF and close
                    // the channel for us.
                    if !state.is_running() {
                        session.close(channel)?;
                    }
                }
                Some(ChannelKind::Forward(state)) => {
                    state.data_tx = None;
                }
                None => {}
            }
            Ok(())
        }
    }

    fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            match self.channels.remove(&channel) {
                Some(ChannelKind::Session(state)) => state.closed(),
                Some(ChannelKind::Forward(state)) => {
                    state.recorder.record(Event::ChannelClose {})
                }
                None => {}
            }
            // Reap whatever channel tasks have already finished so the set
            // stays bounded on long-lived connections.
            while self.tasks.try_join_next().is_some() {}
            Ok(())
        }
    }

    fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let payload = format!("{address}:{port}");
        async move {
            self.recorder.record(Event::ChannelRequest {
                request: "tcpip-forward",
                payload,
                accepted: false,
            });
            Ok(false)
        }
    }

    fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let payload = format!("{address}:{port}");
        async move {
            self.recorder.record(Event::ChannelRequest {
                request: "cancel-tcpip-forward",
                payload,
                accepted: false,
            });
            Ok(false)
        }
    }

    fn streamlocal_forward(
        &mut self,
        socket_path: &str,
        _session: &mut Session,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let payload = socket_path.to_string();
        async move {
            self.recorder.record(Event::ChannelRequest {
                request: "streamlocal-forward",
                payload,
                accepted: false,
            });
            Ok(false)
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // The connection only counts as torn down once every channel task
        // has completed. The transport is gone at this point, so the tasks
        // are all seeing EOF on their pumps; hand the remaining handles to a
        // drainer that merges their termination.
        let mut tasks = std::mem::take(&mut self.tasks);
        if tasks.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let connection_id = self.recorder.connection_id();
                runtime.spawn(async move {
                    while tasks.join_next().await.is_some() {}
                    log::debug!("connection {connection_id} torn down, channel tasks drained");
                });
            }
            // No runtime left to wait on (process shutdown); cancel instead.
            Err(_) => tasks.abort_all(),
        }
    }
}

/// Builds one [`ConnectionHandler`] per accepted connection.
pub struct SshServerHandler {
    config: Arc<Config>,
    fs: SharedFs,
    registry: Arc<CommandRegistry>,
    emulators: Arc<EmulatorRegistry>,
}

impl SshServerHandler {
    pub fn new(
        config: Arc<Config>,
        fs: SharedFs,
        registry: Arc<CommandRegistry>,
        emulators: Arc<EmulatorRegistry>,
    ) -> Self {
        Self {
            config,
            fs,
            registry,
            emulators,
        }
    }
}

impl server::Server for SshServerHandler {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        let remote_addr = peer_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let recorder = Recorder::connection(remote_addr.clone());
        recorder.record(Event::Connection {
            remote_addr: &remote_addr,
        });
        log::info!("new connection from {remote_addr}");

        ConnectionHandler {
            config: self.config.clone(),
            fs: self.fs.clone(),
            registry: self.registry.clone(),
            emulators: self.emulators.clone(),
            recorder,
            user: None,
            next_channel_id: 0,
            channels: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    fn handle_session_error(&mut self, error: <Self::Handler as Handler>::Error) {
        match error {
            Error::Disconnect => {}
            Error::IO(err) => match err.kind() {
                ErrorKind::UnexpectedEof => {
                    log::debug!("client tore down TCP without an SSH disconnect");
                }
                ErrorKind::ConnectionReset => {
                    log::debug!("connection reset by peer");
                }
                _ => {
                    log::warn!("connection I/O error: {err}");
                }
            },
            Error::Elapsed(_) | Error::InactivityTimeout => {
                log::debug!("connection timed out");
            }
            Error::SshEncoding(SshEncodingError::Length) => {
                log::debug!("client sent a packet with an invalid length");
            }
            other => {
                log::warn!("connection error: {other:?}");
            }
        }
    }
}
