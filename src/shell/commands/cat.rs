use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};

/// `cat` over the emulated tree. With no operands there is no stdin to
/// stream, so it quietly succeeds; each named file prints its content
/// followed by a newline.
pub struct CatCommand;

#[async_trait]
impl Command for CatCommand {
    fn name(&self) -> &'static str {
        "cat"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        if ctx.args.len() < 2 {
            return Ok(0);
        }
        let mut status = 0;
        for file in &ctx.args[1..] {
            let content = {
                let fs = ctx.fs.read().await;
                let (_, id) = fs.lookup(&ctx.cwd.path, file);
                id.and_then(|id| fs.read_file(id).map(<[u8]>::to_vec))
            };
            match content {
                Some(content) => {
                    io.write_out(&content).await?;
                    io.write_out(b"\n").await?;
                }
                None => {
                    io.write_err(format!("cat: {file}: No such file or directory\n").as_bytes())
                        .await?;
                    status = 1;
                }
            }
        }
        Ok(status)
    }
}
