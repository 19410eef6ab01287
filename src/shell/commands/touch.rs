use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};
use crate::shell::filesystem::{Filesystem, FsError};

const USAGE: &str = "usage: touch [-A [-][[hh]mm]SS] [-achm] [-r file] [-t [[CC]YY]MMDDhhmm[.SS]]\n[-d YYYY-MM-DDThh:mm:SS[.frac][tz]] file ...\n";

/// `touch` creates empty files. Re-touching an existing entry is reserved to
/// root (and leaves its content alone); the first denial stops the walk.
pub struct TouchCommand;

#[async_trait]
impl Command for TouchCommand {
    fn name(&self) -> &'static str {
        "touch"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        if ctx.args.len() < 2 {
            io.write_err(USAGE.as_bytes()).await?;
            return Ok(1);
        }
        for file in &ctx.args[1..] {
            let path = Filesystem::canonicalize(&ctx.cwd.path, file);
            let result = ctx.fs.write().await.write_file(&path, &ctx.user, None);
            match result {
                Ok(()) => {}
                Err(FsError::PermissionDenied) => {
                    io.write_err(
                        format!("touch: cannot touch \"{file}\" : Permission denied\n").as_bytes(),
                    )
                    .await?;
                    return Ok(1);
                }
                Err(err) => {
                    io.write_err(format!("touch: cannot touch '{file}': {err}\n").as_bytes())
                        .await?;
                    return Ok(1);
                }
            }
        }
        Ok(0)
    }
}
