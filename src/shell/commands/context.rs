use std::io;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::command_trait::{ByteSink, LineReader};
use super::registry::CommandRegistry;
use crate::shell::filesystem::{Filesystem, NodeId};

pub type SharedFs = Arc<RwLock<Filesystem>>;

/// Where a shell currently stands: a node id and the canonical path that
/// reaches it, kept in lockstep by `cd`.
#[derive(Clone, Debug)]
pub struct Cwd {
    pub node: NodeId,
    pub path: String,
}

/// The execution frame handed to every command. Cheap to clone; `sh` reuses
/// one frame across its loop, `su` derives a child frame with another user.
#[derive(Clone)]
pub struct CommandContext {
    pub args: Vec<String>,
    pub user: String,
    pub pty: bool,
    pub cwd: Cwd,
    pub fs: SharedFs,
    pub registry: Arc<CommandRegistry>,
    /// Shell nesting level, bumped by `su`.
    pub depth: u8,
}

impl CommandContext {
    pub async fn new(
        user: String,
        pty: bool,
        fs: SharedFs,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        let root = fs.read().await.root();
        Self {
            args: Vec::new(),
            user,
            pty,
            cwd: Cwd {
                node: root,
                path: "/".to_string(),
            },
            fs,
            registry,
            depth: 0,
        }
    }

    /// Derive the frame a nested program runs with.
    pub fn child(&self, args: Vec<String>) -> Self {
        let mut child = self.clone();
        child.args = args;
        child
    }
}

/// The streams of one command invocation. stderr is either its own sink or
/// merged into stdout (the arrangement session channels use).
pub struct CommandIo<'a> {
    stdin: &'a mut dyn LineReader,
    stdout: &'a mut dyn ByteSink,
    stderr: Option<&'a mut dyn ByteSink>,
}

impl<'a> CommandIo<'a> {
    pub fn new(
        stdin: &'a mut dyn LineReader,
        stdout: &'a mut dyn ByteSink,
        stderr: &'a mut dyn ByteSink,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr: Some(stderr),
        }
    }

    /// stdout and stderr share one sink.
    pub fn merged(stdin: &'a mut dyn LineReader, stdout: &'a mut dyn ByteSink) -> Self {
        Self {
            stdin,
            stdout,
            stderr: None,
        }
    }

    pub async fn read_line(&mut self) -> io::Result<String> {
        self.stdin.read_line().await
    }

    pub async fn write_out(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stdout.write_all(buf).await
    }

    pub async fn write_err(&mut self, buf: &[u8]) -> io::Result<()> {
        match &mut self.stderr {
            Some(stderr) => stderr.write_all(buf).await,
            None => self.stdout.write_all(buf).await,
        }
    }
}
