use async_trait::async_trait;

use super::command_trait::{CmdError, CmdResult, Command};
use super::context::{CommandContext, CommandIo};

/// The emulated shell: prompt, read a line, tokenize, dispatch, repeat.
///
/// `exit` never reaches the registry; the loop intercepts it and returns
/// either the accumulated last-status or its parsed argument. Stdin EOF and
/// any I/O failure end the loop, carrying the last-status out with the error
/// so the channel handler can still report it.
pub struct ShellCommand;

#[async_trait]
impl Command for ShellCommand {
    fn name(&self) -> &'static str {
        "sh"
    }

    async fn execute(&self, ctx: &mut CommandContext, io: &mut CommandIo<'_>) -> CmdResult {
        let prompt = match (ctx.pty, ctx.user.as_str()) {
            (false, _) => "",
            (true, "root") => "# ",
            (true, _) => "$ ",
        };
        let mut last_status: u32 = 0;
        loop {
            io.write_out(prompt.as_bytes())
                .await
                .map_err(|e| CmdError::new(last_status, e))?;
            let line = io
                .read_line()
                .await
                .map_err(|e| CmdError::new(last_status, e))?;
            let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens[0] == "exit" {
                return Ok(match tokens.get(1) {
                    None => last_status,
                    Some(arg) => arg.parse::<u32>().unwrap_or(255),
                });
            }
            ctx.args = tokens;
            let registry = ctx.registry.clone();
            last_status = registry.execute(ctx, io).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::super::command_trait::{CmdResult, ScriptedLines};
    use super::super::context::{CommandContext, CommandIo, SharedFs};
    use super::super::registry::CommandRegistry;
    use crate::shell::filesystem::Filesystem;

    async fn run_shell(
        user: &str,
        pty: bool,
        fs: SharedFs,
        lines: Vec<&str>,
    ) -> (CmdResult, Vec<u8>, Vec<u8>) {
        let mut ctx = CommandContext::new(
            user.to_string(),
            pty,
            fs,
            CommandRegistry::builtin(),
        )
        .await;
        ctx.args = vec!["sh".to_string()];
        let mut stdin = ScriptedLines::new(lines);
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut io = CommandIo::new(&mut stdin, &mut out, &mut err);
        let result = ctx.registry.clone().execute(&mut ctx, &mut io).await;
        (result, out, err)
    }

    fn seeded() -> SharedFs {
        Arc::new(RwLock::new(Filesystem::seeded()))
    }

    #[tokio::test]
    async fn unknown_command_then_exit() {
        let (result, out, err) = run_shell("intruder", true, seeded(), vec!["foo", "exit"]).await;
        assert_eq!(result.unwrap(), 127);
        assert_eq!(out, b"$ $ ");
        assert_eq!(err, b"foo: command not found\n");
    }

    #[tokio::test]
    async fn prompt_follows_user_and_pty() {
        let (result, out, _) = run_shell("root", true, seeded(), vec!["exit"]).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, b"# ");

        let (result, out, _) = run_shell("intruder", false, seeded(), vec!["exit"]).await;
        assert_eq!(result.unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn empty_lines_just_reprompt() {
        let (result, out, _) = run_shell("intruder", true, seeded(), vec!["", "   ", "exit"]).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, b"$ $ $ ");
    }

    #[tokio::test]
    async fn exit_returns_last_status() {
        let (result, _, _) = run_shell("intruder", false, seeded(), vec!["false", "exit"]).await;
        assert_eq!(result.unwrap(), 1);

        let (result, _, _) =
            run_shell("intruder", false, seeded(), vec!["false", "true", "exit"]).await;
        assert_eq!(result.unwrap(), 0);
    }

    #[tokio::test]
    async fn exit_parses_its_argument() {
        let (result, _, _) = run_shell("intruder", false, seeded(), vec!["exit 7"]).await;
        assert_eq!(result.unwrap(), 7);

        let (result, _, _) = run_shell("intruder", false, seeded(), vec!["exit 4294967295"]).await;
        assert_eq!(result.unwrap(), u32::MAX);

        let (result, _, _) = run_shell("intruder", false, seeded(), vec!["exit banana"]).await;
        assert_eq!(result.unwrap(), 255);

        let (result, _, _) = run_shell("intruder", false, seeded(), vec!["exit -1"]).await;
        assert_eq!(result.unwrap(), 255);
    }

    #[tokio::test]
    async fn stdin_eof_carries_last_status_out() {
        let (result, _, _) = run_shell("intruder", false, seeded(), vec!["false"]).await;
        let err = result.unwrap_err();
        assert_eq!(err.status, 1);
        assert_eq!(err.source.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn bait_file_is_readable() {
        let (result, out, err) =
            run_shell("intruder", true, seeded(), vec!["cat pwd.txt", "exit"]).await;
        assert_eq!(result.unwrap(), 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("$2a$04$3ise9UoQ38ceyn6qUmb8neC8UyQnfNiog8ObMSPx.4KLV/vYU0XaC"));
        assert!(text.ends_with("\n$ "));
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn su_escalates_and_outer_shell_resumes() {
        let fs = seeded();
        let (result, _, err) = run_shell(
            "intruder",
            true,
            fs.clone(),
            vec!["su", "touch usr.txt", "exit", "exit"],
        )
        .await;
        assert_eq!(result.unwrap(), 0);
        assert!(err.is_empty(), "stderr: {}", String::from_utf8_lossy(&err));

        // Root's touch left the bait content alone.
        let fs = fs.read().await;
        let (_, id) = fs.lookup("/", "usr.txt");
        assert_eq!(
            fs.read_file(id.unwrap()).unwrap(),
            b"eberk0, cswyne, edan, aroullier, john, henk"
        );
    }

    #[tokio::test]
    async fn su_prompt_is_root_inside() {
        let (result, out, _) =
            run_shell("intruder", true, seeded(), vec!["su", "exit", "exit"]).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, b"$ # $ ");
    }

    #[tokio::test]
    async fn mkdir_cd_pwd_roundtrip() {
        let (result, out, err) = run_shell(
            "intruder",
            false,
            seeded(),
            vec!["mkdir a/b/c", "cd a/b/c", "pwd", "exit"],
        )
        .await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, b"/a/b/c\n");
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn touch_by_non_root_on_existing_file_is_denied() {
        let (result, _, err) = run_shell(
            "intruder",
            false,
            seeded(),
            vec!["touch usr.txt", "exit"],
        )
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(
            err,
            b"touch: cannot touch \"usr.txt\" : Permission denied\n"
        );
    }

    #[tokio::test]
    async fn mutations_are_visible_to_later_commands() {
        let (result, out, err) = run_shell(
            "intruder",
            false,
            seeded(),
            vec!["echo secret stash > loot.txt", "cat loot.txt", "exit"],
        )
        .await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, b"secret stash\n");
        assert!(err.is_empty());
    }
}
