mod app;
mod config;
mod events;
mod keys;
mod server;
mod session;
mod shell;
mod tcpip;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use russh::server::Server as _;
use russh::{MethodKind, SshId};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::app::App;
use crate::config::Config;
use crate::server::SshServerHandler;
use crate::shell::commands::{CommandRegistry, SharedFs};
use crate::shell::filesystem::Filesystem;
use crate::tcpip::EmulatorRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .parse_env(env_logger::Env::default())
        .filter_level(log::LevelFilter::Info)
        .filter_module("russh", log::LevelFilter::Warn)
        .init();

    let app = App::parse();
    let config = Arc::new(match Config::load(&app.config) {
        Ok(config) => config,
        Err(err) => {
            log::error!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    });

    log::trace!("loading host keys");
    let keys = keys::load_or_generate_keys(&app.key_dir);

    log::trace!("seeding filesystem");
    let mut filesystem = Filesystem::seeded();
    if let Some(archive) = &config.filesystem.base_archive {
        match std::fs::File::open(archive) {
            Ok(file) => match filesystem.overlay_targz(file) {
                Ok(()) => log::info!("overlaid {} onto the filesystem", archive.display()),
                Err(err) => {
                    log::error!(
                        "failed to process {}: {err}; continuing with the bait seed",
                        archive.display()
                    );
                }
            },
            Err(err) => {
                log::error!(
                    "failed to open {}: {err}; continuing with the bait seed",
                    archive.display()
                );
            }
        }
    }
    let fs: SharedFs = Arc::new(RwLock::new(filesystem));
    let registry = CommandRegistry::builtin();
    let emulators = EmulatorRegistry::builtin();

    let mut methods = Vec::new();
    if config.auth.password.enabled {
        methods.push(MethodKind::Password);
    }
    if config.auth.public_key.enabled {
        methods.push(MethodKind::PublicKey);
    }
    if config.auth.keyboard_interactive.enabled {
        methods.push(MethodKind::KeyboardInteractive);
    }
    if methods.is_empty() {
        log::warn!("every authentication method is disabled; no client will get past auth");
    }

    let ssh_config = Arc::new(russh::server::Config {
        server_id: SshId::Standard(config.ssh.server_id.clone()),
        keys: vec![keys.ed25519, keys.rsa, keys.ecdsa],
        methods: methods.as_slice().into(),
        auth_rejection_time: std::time::Duration::from_secs(3),
        auth_rejection_time_initial: Some(std::time::Duration::from_secs(0)),
        inactivity_timeout: Some(std::time::Duration::from_secs(300)),
        keepalive_interval: Some(std::time::Duration::from_secs(20)),
        keepalive_max: 5,
        ..Default::default()
    });

    let mut tasks = Vec::with_capacity(app.interfaces.len());
    for interface in app.interfaces {
        let ssh_config = ssh_config.clone();
        let mut handler = SshServerHandler::new(
            config.clone(),
            fs.clone(),
            registry.clone(),
            emulators.clone(),
        );
        tasks.push(tokio::spawn(async move {
            log::info!("listening on {interface}");
            let socket = match create_socket_with_reuse(interface) {
                Ok(socket) => socket,
                Err(err) => {
                    log::error!("failed to bind {interface}: {err}");
                    return;
                }
            };
            if let Err(err) = handler.run_on_socket(ssh_config, &socket).await {
                log::error!("server on {interface} failed: {err}");
            }
        }));
    }

    wait_for_shutdown().await;
    log::info!("shutting down");
    tasks
        .into_iter()
        .for_each(|task: JoinHandle<()>| task.abort());
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Bind with SO_REUSEADDR and SO_REUSEPORT so an IPv4 and an IPv6 listener
/// can share a port on Linux hosts with bindv6only = 0.
fn create_socket_with_reuse(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;

    socket.bind(addr)?;
    socket.listen(1024)
}
