use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Honeypot behavior knobs, loaded from a TOML file. Every section is
/// optional; the defaults accept any password and refuse everything else,
/// which is the posture that attracts the most traffic.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Credentials that always get in, whatever the per-method verdicts say.
    pub valid_user: Option<String>,
    pub valid_pass: Option<String>,
    pub ssh: SshConfig,
    pub auth: AuthConfig,
    pub filesystem: FsConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SshConfig {
    pub banner: Option<String>,
    pub server_id: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            banner: None,
            server_id: "SSH-2.0-OpenSSH_9.6".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub password: PasswordAuth,
    pub public_key: PublicKeyAuth,
    pub keyboard_interactive: KeyboardInteractiveAuth,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PasswordAuth {
    pub enabled: bool,
    pub accepted: bool,
}

impl Default for PasswordAuth {
    fn default() -> Self {
        Self {
            enabled: true,
            accepted: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PublicKeyAuth {
    pub enabled: bool,
    pub accepted: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct KeyboardInteractiveAuth {
    pub enabled: bool,
    pub accepted: bool,
    pub instruction: String,
    pub questions: Vec<Question>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Question {
    pub text: String,
    #[serde(default)]
    pub echo: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct FsConfig {
    /// Optional gzipped tarball overlaid onto the bait filesystem at startup.
    pub base_archive: Option<PathBuf>,
}

impl Config {
    /// Load from `path`. A missing file is not an error; the defaults apply.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The pre-auth banner with SSH line endings: lone `\n` becomes `\r\n`
    /// and a trailing `\r\n` is guaranteed. `None` when unconfigured.
    pub fn normalized_banner(&self) -> Option<String> {
        let banner = self.ssh.banner.as_deref()?;
        if banner.is_empty() {
            return None;
        }
        let mut normalized = banner.replace("\r\n", "\n").replace('\n', "\r\n");
        if !normalized.ends_with("\r\n") {
            normalized.push_str("\r\n");
        }
        Some(normalized)
    }

    fn valid_credentials(&self, user: &str, secret: &str) -> bool {
        match (&self.valid_user, &self.valid_pass) {
            (Some(valid_user), Some(valid_pass)) => user == valid_user && secret == valid_pass,
            _ => false,
        }
    }

    pub fn password_verdict(&self, user: &str, password: &str) -> bool {
        self.auth.password.accepted || self.valid_credentials(user, password)
    }

    pub fn public_key_verdict(&self) -> bool {
        self.auth.public_key.accepted
    }

    /// First answer doubles as the password for the always-valid credentials.
    pub fn keyboard_interactive_verdict(&self, user: &str, answers: &[String]) -> bool {
        self.auth.keyboard_interactive.accepted
            || answers
                .first()
                .is_some_and(|answer| self.valid_credentials(user, answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_gets_ssh_line_endings() {
        let mut config = Config::default();
        config.ssh.banner = Some("Hello\nWorld".to_string());
        assert_eq!(
            config.normalized_banner().as_deref(),
            Some("Hello\r\nWorld\r\n")
        );
    }

    #[test]
    fn banner_existing_crlf_is_not_doubled() {
        let mut config = Config::default();
        config.ssh.banner = Some("Hello\r\nWorld\r\n".to_string());
        assert_eq!(
            config.normalized_banner().as_deref(),
            Some("Hello\r\nWorld\r\n")
        );
    }

    #[test]
    fn missing_banner_stays_missing() {
        assert_eq!(Config::default().normalized_banner(), None);
    }

    #[test]
    fn password_verdict_honors_accepted_flag_and_valid_credentials() {
        let mut config = Config::default();
        config.auth.password.accepted = false;
        config.valid_user = Some("dev".to_string());
        config.valid_pass = Some("hunter2".to_string());

        assert!(!config.password_verdict("root", "toor"));
        assert!(config.password_verdict("dev", "hunter2"));

        config.auth.password.accepted = true;
        assert!(config.password_verdict("root", "anything"));
    }

    #[test]
    fn keyboard_interactive_matches_user_and_first_answer() {
        let mut config = Config::default();
        config.valid_user = Some("dev".to_string());
        config.valid_pass = Some("hunter2".to_string());

        assert!(config.keyboard_interactive_verdict("dev", &["hunter2".to_string()]));
        assert!(!config.keyboard_interactive_verdict("dev", &["wrong".to_string()]));
        assert!(!config.keyboard_interactive_verdict("other", &["hunter2".to_string()]));
        assert!(!config.keyboard_interactive_verdict("dev", &[]));

        config.auth.keyboard_interactive.accepted = true;
        assert!(config.keyboard_interactive_verdict("anyone", &[]));
    }

    #[test]
    fn config_parses_the_documented_shape() {
        let config: Config = toml::from_str(
            r#"
            valid_user = "dev"
            valid_pass = "hunter2"

            [ssh]
            banner = "authorized access only"

            [auth.password]
            enabled = true
            accepted = false

            [auth.keyboard_interactive]
            enabled = true
            instruction = "Answer me"
            questions = [{ text = "Password: ", echo = false }]

            [filesystem]
            base_archive = "base.tar.gz"
            "#,
        )
        .unwrap();
        assert!(config.auth.password.enabled);
        assert!(!config.auth.password.accepted);
        assert_eq!(config.auth.keyboard_interactive.questions.len(), 1);
        assert_eq!(
            config.filesystem.base_archive.as_deref(),
            Some(std::path::Path::new("base.tar.gz"))
        );
    }
}
