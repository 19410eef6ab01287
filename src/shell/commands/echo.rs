use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};
use crate::shell::filesystem::{Filesystem, FsError};

/// `echo` with just enough redirection support to let intruders plant files:
/// a lone `>` token writes the preceding words into the named file instead of
/// stdout. No quoting, no appending.
pub struct EchoCommand;

#[async_trait]
impl Command for EchoCommand {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        let words = &ctx.args[1..];
        if let Some(pos) = words.iter().position(|w| w == ">") {
            let Some(target) = words.get(pos + 1) else {
                io.write_err(b"sh: syntax error near unexpected token 'newline'\n")
                    .await?;
                return Ok(2);
            };
            let content = words[..pos].join(" ");
            let path = Filesystem::canonicalize(&ctx.cwd.path, target);
            let result = ctx
                .fs
                .write()
                .await
                .write_file(&path, &ctx.user, Some(content.as_bytes()));
            return match result {
                Ok(()) => Ok(0),
                Err(FsError::PermissionDenied) => {
                    io.write_err(format!("echo: {target}: Permission denied\n").as_bytes())
                        .await?;
                    Ok(1)
                }
                Err(err) => {
                    io.write_err(format!("echo: {target}: {err}\n").as_bytes())
                        .await?;
                    Ok(1)
                }
            };
        }
        io.write_out(format!("{}\n", words.join(" ")).as_bytes())
            .await?;
        Ok(0)
    }
}
