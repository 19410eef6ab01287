use std::collections::HashMap;
use std::sync::Arc;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};

/// The command table the shell dispatches through. Populated once at startup,
/// read-only afterwards.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// The built-in command set. `exit` is deliberately absent: it is control
    /// flow, intercepted by the shell loop before dispatch.
    pub fn builtin() -> Arc<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(super::shell::ShellCommand));
        registry.register(Arc::new(super::builtin::TrueCommand));
        registry.register(Arc::new(super::builtin::FalseCommand));
        registry.register(Arc::new(super::echo::EchoCommand));
        registry.register(Arc::new(super::cat::CatCommand));
        registry.register(Arc::new(super::ls::LsCommand));
        registry.register(Arc::new(super::touch::TouchCommand));
        registry.register(Arc::new(super::mkdir::MkdirCommand));
        registry.register(Arc::new(super::rm::RmCommand));
        registry.register(Arc::new(super::cd::CdCommand));
        registry.register(Arc::new(super::pwd::PwdCommand));
        registry.register(Arc::new(super::su::SuCommand));
        Arc::new(registry)
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name(), command);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Dispatch `ctx.args`. An empty argv is a successful no-op; an unknown
    /// name reports itself on stderr and exits 127.
    pub async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        let Some(name) = ctx.args.first().cloned() else {
            return Ok(0);
        };
        match self.commands.get(name.as_str()) {
            Some(command) => {
                let command = Arc::clone(command);
                command.execute(ctx, io).await
            }
            None => {
                io.write_err(format!("{name}: command not found\n").as_bytes())
                    .await?;
                Ok(127)
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
