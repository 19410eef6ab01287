use async_trait::async_trait;

use super::command_trait::{CmdResult, Command};
use super::context::{CommandContext, CommandIo};
use crate::shell::filesystem::Filesystem;

/// `mkdir` creates every missing directory along each operand's path, the way
/// `mkdir -p` would. With operands it always exits 0; a file blocking the
/// walk is reported on stderr but leaves the status untouched.
pub struct MkdirCommand;

#[async_trait]
impl Command for MkdirCommand {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        if ctx.args.len() < 2 {
            io.write_err(b"mkdir: missing operand\n").await?;
            return Ok(1);
        }
        for dir in &ctx.args[1..] {
            let path = Filesystem::canonicalize(&ctx.cwd.path, dir);
            let result = ctx.fs.write().await.mkdir_all(&path, &ctx.user);
            if let Err(err) = result {
                io.write_err(
                    format!("mkdir: cannot create directory '{dir}': {err}\n").as_bytes(),
                )
                .await?;
            }
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

    async fn run(args: &[&str]) -> (u32, Vec<u8>, CommandContext) {
        let fs = Arc::new(RwLock::new(Filesystem::seeded()));
        let mut ctx = CommandContext::new(
            "intruder".to_string(),
            false,
            fs,
            CommandRegistry::builtin(),
        )
        .await;
        ctx.args = args.iter().map(|s| s.to_string()).collect();
        let mut stdin = ScriptedLines::new(Vec::<String>::new());
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut io = CommandIo::new(&mut stdin, &mut out, &mut err);
        let status = ctx.registry.clone().execute(&mut ctx, &mut io).await.unwrap();
        (status, err, ctx)
    }

    #[tokio::test]
    async fn no_operands_is_an_error() {
        let (status, err, _) = run(&["mkdir"]).await;
        assert_eq!(status, 1);
        assert_eq!(err, b"mkdir: missing operand\n");
    }

    #[tokio::test]
    async fn creates_nested_paths() {
        let (status, err, ctx) = run(&["mkdir", "a/b/c", "d"]).await;
        assert_eq!(status, 0);
        assert!(err.is_empty());
        let fs = ctx.fs.read().await;
        for path in ["/a/b/c", "/d"] {
            let (_, id) = fs.lookup("/", path);
            assert!(fs.node(id.unwrap()).unwrap().is_dir(), "{path}");
        }
    }

    #[tokio::test]
    async fn a_file_in_the_way_is_reported_but_still_exits_zero() {
        let (status, err, _) = run(&["mkdir", "usr.txt/sub"]).await;
        assert_eq!(status, 0);
        assert_eq!(
            err,
            b"mkdir: cannot create directory 'usr.txt/sub': Not a directory\n"
        );
    }
}
