//! Local and SSH command execution.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CollabError, Credentials, ExecOutput, RemoteExec};

/// Run a program to completion and capture its output. The child is killed
/// if the returned future is dropped, so callers can bound it with a timeout.
pub async fn run_program(program: &str, args: &[&str]) -> Result<ExecOutput, CollabError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CollabError::Spawn {
            program: program.to_string(),
            source,
        })?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        // Killed by signal
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Like [`run_program`] but a non-zero exit is an error.
pub async fn run_checked(program: &str, args: &[&str]) -> Result<ExecOutput, CollabError> {
    let output = run_program(program, args).await?;
    if !output.success() {
        return Err(CollabError::Exit {
            command: format!("{} {}", program, args.join(" ")),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

pub fn is_local(host: &str) -> bool {
    matches!(host, "" | "localhost" | "127.0.0.1" | "::1")
}

/// Build `ssh` arguments for a non-interactive remote command.
fn ssh_args(host: &str, credentials: &Credentials, command: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
    ];
    if let Some(identity) = &credentials.identity_file {
        args.push("-i".to_string());
        args.push(identity.to_string_lossy().into_owned());
    }
    args.push(match &credentials.user {
        Some(user) => format!("{}@{}", user, host),
        None => host.to_string(),
    });
    args.push("--".to_string());
    args.push(command.to_string());
    args
}

/// Runs commands through `sh -c` locally or `ssh` for other hosts.
pub struct CommandExec;

#[async_trait]
impl RemoteExec for CommandExec {
    async fn run(
        &self,
        host: &str,
        credentials: &Credentials,
        command: &str,
    ) -> Result<ExecOutput, CollabError> {
        if is_local(host) {
            return run_program("sh", &["-c", command]).await;
        }
        let args = ssh_args(host, credentials, command);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_program("ssh", &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_ssh_args() {
        let creds = Credentials {
            user: Some("ops".to_string()),
            identity_file: Some(PathBuf::from("/keys/id_ed25519")),
        };
        let args = ssh_args("db1", &creds, "systemctl restart mysql");
        assert_eq!(
            args[4..],
            ["-i", "/keys/id_ed25519", "ops@db1", "--", "systemctl restart mysql"]
        );
    }

    #[test]
    fn test_is_local() {
        assert!(is_local("localhost"));
        assert!(!is_local("db1.internal"));
    }

    #[tokio::test]
    async fn test_local_exec_captures_output() {
        let out = CommandExec
            .run("localhost", &Credentials::default(), "echo hello; exit 3")
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_run_checked_reports_exit() {
        let err = run_checked("sh", &["-c", "echo boom >&2; exit 1"]).await.unwrap_err();
        match err {
            CollabError::Exit { code, stderr, .. } => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
