//! Subprocess plumbing shared by the external collaborators.
//!
//! Every tool invocation funnels through here so that command lines and tool
//! output land in the log the same way, and so a nonzero exit always carries
//! the tool's stderr in the error.

use anyhow::{bail, Context, Result};
use std::process::{Command, Output};
use tracing::debug;

pub(crate) fn command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv.split_first().context("empty tool command")?;
    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

pub(crate) fn run_logged(label: &str, command: &mut Command) -> Result<Output> {
    debug!("{label} command: {command:?}");
    let output = command.output().with_context(|| format!("run {label}"))?;
    log_output(label, &output);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{label} exited with {}: {}", output.status, stderr.trim());
    }
    Ok(output)
}

pub(crate) fn log_output(label: &str, output: &Output) {
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!("{label}: {line}");
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        debug!("{label}: {line}");
    }
}
