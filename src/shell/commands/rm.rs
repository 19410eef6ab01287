use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};
use crate::shell::filesystem::{Filesystem, FsError};

/// `rm` removes files. Directories stay, and removing an existing entry is
/// reserved to root; a denial stops the walk like `touch`.
pub struct RmCommand;

#[async_trait]
impl Command for RmCommand {
    fn name(&self) -> &'static str {
        "rm"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        if ctx.args.len() < 2 {
            io.write_err(b"rm: missing operand\n").await?;
            return Ok(1);
        }
        let mut status = 0;
        for file in &ctx.args[1..] {
            let path = Filesystem::canonicalize(&ctx.cwd.path, file);
            let result = ctx.fs.write().await.remove(&path, &ctx.user);
            match result {
                Ok(()) => {}
                Err(FsError::PermissionDenied) => {
                    io.write_err(
                        format!("rm: cannot remove '{file}': Permission denied\n").as_bytes(),
                    )
                    .await?;
                    return Ok(1);
                }
                Err(err) => {
                    io.write_err(format!("rm: cannot remove '{file}': {err}\n").as_bytes())
                        .await?;
                    status = 1;
                }
            }
        }
        Ok(status)
    }
}
