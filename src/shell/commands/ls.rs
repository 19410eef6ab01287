use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};

/// `ls` prints the entries of the current directory, one per line.
pub struct LsCommand;

#[async_trait]
impl Command for LsCommand {
    fn name(&self) -> &'static str {
        "ls"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        let names = ctx
            .fs
            .read()
            .await
            .list(ctx.cwd.node)
            .unwrap_or_default();
        for name in names {
            io.write_out(format!("{name}\n").as_bytes()).await?;
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::super::command_trait::ScriptedLines;
    use super::super::context::{CommandContext, CommandIo};
    use super::super::registry::CommandRegistry;
    use crate::shell::filesystem::Filesystem;

    #[tokio::test]
    async fn lists_the_bait_files() {
        let fs = Arc::new(RwLock::new(Filesystem::seeded()));
        let mut ctx = CommandContext::new(
            "intruder".to_string(),
            false,
            fs,
            CommandRegistry::builtin(),
        )
        .await;
        ctx.args = vec!["ls".to_string()];
        let mut stdin = ScriptedLines::new(Vec::<String>::new());
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut io = CommandIo::new(&mut stdin, &mut out, &mut err);
        let status = ctx.registry.clone().execute(&mut ctx, &mut io).await.unwrap();

        assert_eq!(status, 0);
        let mut lines: Vec<&str> = std::str::from_utf8(&out).unwrap().lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["cc.txt", "pwd.txt", "usr.txt"]);
        assert!(err.is_empty());
    }
}
