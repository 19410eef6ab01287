use std::fmt;
use std::io;

use async_trait::async_trait;

use super::context::{CommandContext, CommandIo};

/// Outcome of running a command: an exit status, or an I/O failure that still
/// carries the status the command had reached when its stream broke.
pub type CmdResult = Result<u32, CmdError>;

#[derive(Debug)]
pub struct CmdError {
    pub status: u32,
    pub source: io::Error,
}

impl CmdError {
    pub fn new(status: u32, source: io::Error) -> Self {
        Self { status, source }
    }
}

impl fmt::Display for CmdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exited {} on I/O error: {}", self.status, self.source)
    }
}

impl std::error::Error for CmdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<io::Error> for CmdError {
    fn from(source: io::Error) -> Self {
        Self { status: 0, source }
    }
}

/// Line-oriented stdin as the shell consumes it.
#[async_trait]
pub trait LineReader: Send {
    /// The next line without its terminator. EOF surfaces as
    /// `ErrorKind::UnexpectedEof`.
    async fn read_line(&mut self) -> io::Result<String>;
}

/// Byte-oriented stdout/stderr as commands produce it.
#[async_trait]
pub trait ByteSink: Send {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

#[async_trait]
impl ByteSink for Vec<u8> {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

/// A honeypot command: given its execution frame and streams, produce an exit
/// status. Implementations never touch anything outside the emulated state.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult;
}

/// Canned stdin for exercising the shell in tests.
#[cfg(test)]
pub struct ScriptedLines {
    lines: std::collections::VecDeque<String>,
}

#[cfg(test)]
impl ScriptedLines {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(lines: I) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl LineReader for ScriptedLines {
    async fn read_line(&mut self) -> io::Result<String> {
        self.lines
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "end of script"))
    }
}
