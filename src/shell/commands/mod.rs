mod builtin;
mod cat;
mod cd;
mod command_trait;
mod context;
mod echo;
mod ls;
mod mkdir;
mod pwd;
mod registry;
mod rm;
mod shell;
mod su;
mod touch;

pub use command_trait::{ByteSink, CmdError, CmdResult, Command, LineReader};
pub use context::{CommandContext, CommandIo, Cwd, SharedFs};
pub use registry::CommandRegistry;
