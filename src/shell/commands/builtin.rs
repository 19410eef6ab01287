use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};

pub struct TrueCommand;

#[async_trait]
impl Command for TrueCommand {
    fn name(&self) -> &'static str {
        "true"
    }

    async fn execute(&self, _ctx: &mut CommandContext, _io: &mut CommandIo<'_>) -> CmdResult {
        Ok(0)
    }
}

pub struct FalseCommand;

#[async_trait]
impl Command for FalseCommand {
    fn name(&self) -> &'static str {
        "false"
    }

    async fn execute(&self, _ctx: &mut CommandContext, _io: &mut CommandIo<'_>) -> CmdResult {
        Ok(1)
    }
}
