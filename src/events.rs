//! Structured telemetry. Every observable action of a client becomes one
//! JSON line on the `sirene::event` log target, enveloped with the connection
//! id, the remote address and (when channel-scoped) the channel id. The
//! operator picks the sink through the logger; we only guarantee the shape.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};
use serde::Serialize;
use uuid::Uuid;

pub static AUTH_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sshesame_auth_attempts_total",
        "Total number of authentication attempts",
        &["method", "accepted"]
    )
    .expect("registering the auth attempts counter in a fresh registry cannot fail")
});

#[derive(Serialize, Debug)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event<'a> {
    NoAuth {
        user: &'a str,
        accepted: bool,
    },
    PasswordAuth {
        user: &'a str,
        password: &'a str,
        accepted: bool,
    },
    PublicKeyAuth {
        user: &'a str,
        fingerprint: String,
        accepted: bool,
    },
    KeyboardInteractiveAuth {
        user: &'a str,
        answers: &'a [String],
        accepted: bool,
    },
    Connection {
        remote_addr: &'a str,
    },
    ChannelOpen {
        channel_type: &'a str,
        extra_data: String,
    },
    ChannelClose {},
    ChannelRequest {
        request: &'a str,
        payload: String,
        accepted: bool,
    },
    ChannelInput {
        input: &'a str,
    },
    TcpipForward {
        address: &'a str,
        port: u32,
        originator_address: &'a str,
        originator_port: u32,
        unsupported: bool,
    },
    HttpRequest {
        request: &'a str,
    },
}

impl Event<'_> {
    /// The auth method label, for events that are authentication attempts.
    fn auth_method(&self) -> Option<&'static str> {
        match self {
            Event::NoAuth { .. } => Some("none"),
            Event::PasswordAuth { .. } => Some("password"),
            Event::PublicKeyAuth { .. } => Some("publickey"),
            Event::KeyboardInteractiveAuth { .. } => Some("keyboard-interactive"),
            _ => None,
        }
    }

    fn accepted(&self) -> Option<bool> {
        match self {
            Event::NoAuth { accepted, .. }
            | Event::PasswordAuth { accepted, .. }
            | Event::PublicKeyAuth { accepted, .. }
            | Event::KeyboardInteractiveAuth { accepted, .. } => Some(*accepted),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    time: DateTime<Utc>,
    connection_id: Uuid,
    remote_addr: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<u64>,
    #[serde(flatten)]
    event: &'a Event<'a>,
}

/// Emits events for one connection, or for one channel of it once scoped
/// with [`Recorder::channel`]. Cloning is cheap; every handler task holds one.
#[derive(Clone, Debug)]
pub struct Recorder {
    connection_id: Uuid,
    remote_addr: String,
    channel_id: Option<u64>,
}

impl Recorder {
    pub fn connection(remote_addr: String) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            remote_addr,
            channel_id: None,
        }
    }

    /// Scope this recorder to a channel of its connection.
    pub fn channel(&self, channel_id: u64) -> Self {
        Self {
            channel_id: Some(channel_id),
            ..self.clone()
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.channel_id
    }

    pub fn record(&self, event: Event<'_>) {
        if let Some(method) = event.auth_method() {
            let accepted = if event.accepted().unwrap_or(false) {
                "true"
            } else {
                "false"
            };
            AUTH_ATTEMPTS.with_label_values(&[method, accepted]).inc();
        }
        let envelope = Envelope {
            time: Utc::now(),
            connection_id: self.connection_id,
            remote_addr: &self.remote_addr,
            channel_id: self.channel_id,
            event: &event,
        };
        match serde_json::to_string(&envelope) {
            Ok(line) => log::info!(target: "sirene::event", "{line}"),
            Err(err) => log::error!("failed to serialize event {event:?}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json(event: Event<'_>) -> serde_json::Value {
        let envelope = Envelope {
            time: Utc::now(),
            connection_id: Uuid::new_v4(),
            remote_addr: "192.0.2.7:50321",
            channel_id: Some(3),
            event: &event,
        };
        serde_json::to_value(&envelope).unwrap()
    }

    #[test]
    fn discriminants_are_kebab_case() {
        let cases: Vec<(Event, &str)> = vec![
            (
                Event::NoAuth {
                    user: "a",
                    accepted: false,
                },
                "no-auth",
            ),
            (
                Event::PasswordAuth {
                    user: "a",
                    password: "b",
                    accepted: true,
                },
                "password-auth",
            ),
            (
                Event::KeyboardInteractiveAuth {
                    user: "a",
                    answers: &[],
                    accepted: false,
                },
                "keyboard-interactive-auth",
            ),
            (Event::ChannelClose {}, "channel-close"),
            (
                Event::TcpipForward {
                    address: "x",
                    port: 25,
                    originator_address: "y",
                    originator_port: 1,
                    unsupported: true,
                },
                "tcpip-forward",
            ),
            (Event::HttpRequest { request: "GET /" }, "http-request"),
        ];
        for (event, tag) in cases {
            assert_eq!(to_json(event)["event"], tag);
        }
    }

    #[test]
    fn envelope_carries_scope_fields() {
        let value = to_json(Event::ChannelInput { input: "ls" });
        assert_eq!(value["remote_addr"], "192.0.2.7:50321");
        assert_eq!(value["channel_id"], 3);
        assert_eq!(value["input"], "ls");
        assert!(value["connection_id"].is_string());
        assert!(value["time"].is_string());
    }

    #[test]
    fn auth_events_feed_the_counter() {
        let recorder = Recorder::connection("192.0.2.7:50321".to_string());
        let before = AUTH_ATTEMPTS
            .with_label_values(&["password", "true"])
            .get();
        recorder.record(Event::PasswordAuth {
            user: "root",
            password: "hunter2",
            accepted: true,
        });
        let after = AUTH_ATTEMPTS
            .with_label_values(&["password", "true"])
            .get();
        assert_eq!(after, before + 1);
    }
}
