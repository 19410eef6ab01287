use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(
    version,
    about = "An SSH honeypot that records everything and executes nothing",
    long_about = "An SSH honeypot that records everything and executes nothing. \
Clients get a convincing SSH server with an emulated shell over an in-memory \
filesystem and emulated TCP forwarding; every authentication attempt, channel, \
request and command line ends up in the structured event log."
)]
pub struct App {
    /// Interfaces to listen on; ports below 1024 need CAP_NET_BIND_SERVICE
    #[arg(short = 'i', long = "interface", default_values_t = vec![
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 2222),
        SocketAddr::new(std::net::IpAddr::V6(Ipv6Addr::UNSPECIFIED), 2222),
    ], env = "INTERFACE")]
    pub interfaces: Vec<SocketAddr>,

    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "sirene.toml", env = "CONFIG_PATH")]
    pub config: PathBuf,

    /// Directory host keys are loaded from, generated on first start
    #[arg(short, long, default_value = "keys", env = "KEY_DIR")]
    pub key_dir: PathBuf,
}
