use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo, Cwd};

/// `cd` moves the frame's current directory, keeping the node id and the
/// canonical path in lockstep. Without an argument it returns to the root;
/// `..` at the root stays put.
pub struct CdCommand;

#[async_trait]
impl Command for CdCommand {
    fn name(&self) -> &'static str {
        "cd"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        let target = match ctx.args.get(1) {
            None => "/".to_string(),
            Some(path) => path.clone(),
        };
        let resolved = {
            let fs = ctx.fs.read().await;
            let (canonical, id) = fs.lookup(&ctx.cwd.path, &target);
            id.filter(|id| fs.node(*id).is_some_and(|n| n.is_dir()))
                .map(|id| (canonical, id))
        };
        match resolved {
            Some((path, node)) => {
                ctx.cwd = Cwd { node, path };
                Ok(0)
            }
            None => {
                io.write_err(format!("cd: {target}: No such file or directory\n").as_bytes())
                    .await?;
                Ok(1)
            }
        }
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

    async fn frame() -> CommandContext {
        let fs = Arc::new(RwLock::new(Filesystem::seeded()));
        fs.write().await.mkdir_all("/tmp/work", "root").unwrap();
        CommandContext::new(
            "intruder".to_string(),
            false,
            fs,
            CommandRegistry::builtin(),
        )
        .await
    }

    async fn cd(ctx: &mut CommandContext, args: &[&str]) -> (u32, Vec<u8>) {
        ctx.args = args.iter().map(|s| s.to_string()).collect();
        let mut stdin = ScriptedLines::new(Vec::<String>::new());
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut io = CommandIo::new(&mut stdin, &mut out, &mut err);
        let status = ctx.registry.clone().execute(ctx, &mut io).await.unwrap();
        (status, err)
    }

    #[tokio::test]
    async fn moves_into_directories_and_back() {
        let mut ctx = frame().await;
        let (status, _) = cd(&mut ctx, &["cd", "tmp/work"]).await;
        assert_eq!(status, 0);
        assert_eq!(ctx.cwd.path, "/tmp/work");

        let (status, _) = cd(&mut ctx, &["cd", ".."]).await;
        assert_eq!(status, 0);
        assert_eq!(ctx.cwd.path, "/tmp");

        let (status, _) = cd(&mut ctx, &["cd"]).await;
        assert_eq!(status, 0);
        assert_eq!(ctx.cwd.path, "/");
    }

    #[tokio::test]
    async fn dotdot_at_root_is_a_noop() {
        let mut ctx = frame().await;
        let (status, err) = cd(&mut ctx, &["cd", ".."]).await;
        assert_eq!(status, 0);
        assert!(err.is_empty());
        assert_eq!(ctx.cwd.path, "/");
    }

    #[tokio::test]
    async fn missing_target_and_files_are_rejected() {
        let mut ctx = frame().await;
        let (status, err) = cd(&mut ctx, &["cd", "ghost"]).await;
        assert_eq!(status, 1);
        assert_eq!(err, b"cd: ghost: No such file or directory\n");
        assert_eq!(ctx.cwd.path, "/");

        let (status, err) = cd(&mut ctx, &["cd", "usr.txt"]).await;
        assert_eq!(status, 1);
        assert_eq!(err, b"cd: usr.txt: No such file or directory\n");
    }
}
