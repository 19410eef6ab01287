use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};

/// How deep `su` is allowed to nest shells.
const MAX_SHELL_DEPTH: u8 = 16;

/// `su [user]` swaps the emulated user (default "root") and hands the session
/// to a nested shell; the outer shell resumes when the inner one exits. No
/// password is ever asked, which is the kind of generosity intruders expect
/// from a poorly secured box.
pub struct SuCommand;

#[async_trait]
impl Command for SuCommand {
    fn name(&self) -> &'static str {
        "su"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        if ctx.depth >= MAX_SHELL_DEPTH {
            io.write_err(b"su: failed to execute /bin/sh: Resource temporarily unavailable\n")
                .await?;
            return Ok(1);
        }
        let mut child = ctx.child(vec!["sh".to_string()]);
        child.user = ctx
            .args
            .get(1)
            .cloned()
            .unwrap_or_else(|| "root".to_string());
        child.depth = ctx.depth + 1;
        let registry = ctx.registry.clone();
        registry.execute(&mut child, io).await
    }
}
