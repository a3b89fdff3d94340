//! `SourceControl` over the `git` command line.
//!
//! Every call shells out to `git -C <checkout> …` and reads its stdout. Diffs
//! use `--name-status --no-renames -z` so a rename shows up as a delete plus
//! an add and paths never arrive quoted.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use deploydb_core::{ChangeKind, DiffEntry, RemoteAuth, SourceControl, SourceError};

/// Git CLI driver.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `git` executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run<I, S>(&self, args: I, envs: &[(&str, String)]) -> Result<String, SourceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let command = describe(&self.program, &args);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args).env("GIT_TERMINAL_PROMPT", "0");
        for (key, value) in envs {
            cmd.env(key, value);
        }

        tracing::debug!("running {command}");
        let output = cmd.output().map_err(|source| SourceError::Spawn {
            command: command.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(SourceError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|err| SourceError::Output {
            command,
            detail: format!("stdout is not UTF-8: {err}"),
        })
    }
}

impl SourceControl for GitCli {
    fn ensure_cloned(
        &self,
        remote: &RemoteAuth,
        branch: &str,
        path: &Path,
    ) -> Result<(), SourceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SourceError::Spawn {
                command: format!("mkdir {}", parent.display()),
                source,
            })?;
        }

        let mut envs = Vec::new();
        match remote {
            RemoteAuth::Ssh { key, .. } => {
                tracing::info!("cloning over SSH: {}", remote.url());
                envs.push((
                    "GIT_SSH_COMMAND",
                    format!("ssh -i {} -o IdentitiesOnly=yes", key.display()),
                ));
            }
            RemoteAuth::Https { .. } => {
                tracing::info!("cloning over HTTPS: {}", remote.url());
            }
        }

        let args: Vec<&OsStr> = vec![
            OsStr::new("clone"),
            OsStr::new("--branch"),
            OsStr::new(branch),
            OsStr::new("--single-branch"),
            OsStr::new(remote.url()),
            path.as_os_str(),
        ];
        self.run(args, &envs).map(|_| ())
    }

    fn pull(&self, path: &Path, branch: &str) -> Result<(), SourceError> {
        let args: Vec<&OsStr> = vec![
            OsStr::new("-C"),
            path.as_os_str(),
            OsStr::new("pull"),
            OsStr::new("--ff-only"),
            OsStr::new("origin"),
            OsStr::new(branch),
        ];
        self.run(args, &[]).map(|_| ())
    }

    fn diff(&self, path: &Path, from: &str, to: &str) -> Result<Vec<DiffEntry>, SourceError> {
        let args: Vec<&OsStr> = vec![
            OsStr::new("-C"),
            path.as_os_str(),
            OsStr::new("diff"),
            OsStr::new("--name-status"),
            OsStr::new("--no-renames"),
            OsStr::new("-z"),
            OsStr::new(from),
            OsStr::new(to),
            OsStr::new("--"),
        ];
        let stdout = self.run(args, &[])?;
        parse_name_status(&stdout).map_err(|detail| SourceError::Output {
            command: format!("git diff --name-status {from} {to}"),
            detail,
        })
    }

    fn head_revision(&self, path: &Path) -> Result<String, SourceError> {
        let args: Vec<&OsStr> = vec![
            OsStr::new("-C"),
            path.as_os_str(),
            OsStr::new("rev-parse"),
            OsStr::new("HEAD"),
        ];
        let stdout = self.run(args, &[])?;
        let head = stdout.trim();
        if head.is_empty() {
            return Err(SourceError::Output {
                command: "git rev-parse HEAD".to_string(),
                detail: "empty revision".to_string(),
            });
        }
        Ok(head.to_string())
    }
}

/// Parse `git diff --name-status -z` output: `<status>\0<path>\0` repeated.
pub(crate) fn parse_name_status(output: &str) -> Result<Vec<DiffEntry>, String> {
    let mut fields = output.split('\0').filter(|f| !f.is_empty());
    let mut entries = Vec::new();
    while let Some(status) = fields.next() {
        let path = fields
            .next()
            .ok_or_else(|| format!("status '{status}' without a path"))?;
        let kind = match status.chars().next() {
            Some('A') => ChangeKind::Added,
            Some('M') => ChangeKind::Modified,
            Some('D') => ChangeKind::Deleted,
            Some('T') => ChangeKind::TypeChanged,
            _ => return Err(format!("unsupported status '{status}' for {path}")),
        };
        entries.push(DiffEntry {
            kind,
            path: path.to_string(),
        });
    }
    Ok(entries)
}

fn describe(program: &Path, args: &[std::ffi::OsString]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}
