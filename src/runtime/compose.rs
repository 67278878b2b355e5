//! Implements Runtime on top of the `docker compose` command line.
use std::any::Any;
use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use serde::Deserialize;

use super::{ContainerInfo, Runtime, ServiceStatus};
use crate::config::Settings;
use crate::error::{Result, SshboxError};
use crate::limits::LiveLimits;
use crate::utils::{run_attached, run_captured};

#[derive(Debug, Clone)]
pub struct ComposeCli {
    compose_command: Vec<String>,
    docker_command: String,
    project: String,
    compose_file: PathBuf,
}

impl ComposeCli {
    pub fn new(settings: &Settings) -> Self {
        Self {
            compose_command: settings.compose_command.clone(),
            docker_command: settings.docker_command.clone(),
            project: settings.project.clone(),
            compose_file: settings.compose_file.clone(),
        }
    }

    fn compose(&self) -> Command {
        let (program, leading) = match self.compose_command.split_first() {
            Some((program, rest)) => (program.as_str(), rest),
            None => ("docker", &[][..]),
        };
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg("-p")
            .arg(&self.project)
            .arg("-f")
            .arg(&self.compose_file);
        cmd
    }

    fn stdout(&self, cmd: &mut Command) -> Result<String> {
        let output = run_captured(cmd)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Runtime for ComposeCli {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn services(&self) -> Result<Vec<String>> {
        let stdout = self.stdout(self.compose().args(["config", "--services"]))?;
        Ok(parse_lines(&stdout))
    }

    fn up(&self, service: &str, force_recreate: bool) -> Result<()> {
        let mut cmd = self.compose();
        cmd.args(["up", "-d", "--no-deps"]);
        if force_recreate {
            cmd.arg("--force-recreate");
        }
        cmd.arg(service);
        run_captured(&mut cmd)?;
        Ok(())
    }

    fn stop(&self, service: &str) -> Result<()> {
        run_captured(self.compose().args(["stop", service]))?;
        Ok(())
    }

    fn restart(&self, service: &str) -> Result<()> {
        run_captured(self.compose().args(["restart", service]))?;
        Ok(())
    }

    fn remove(&self, service: &str) -> Result<()> {
        run_captured(self.compose().args(["rm", "-f", "-s", service]))?;
        Ok(())
    }

    fn remove_volume(&self, volume: &str) -> Result<()> {
        // compose prefixes declared volumes with the project name
        let name = format!("{}_{}", self.project, volume);
        run_captured(Command::new(&self.docker_command).args(["volume", "rm", &name]))?;
        Ok(())
    }

    fn container_id(&self, service: &str) -> Result<Option<String>> {
        let stdout = self.stdout(self.compose().args(["ps", "-q", service]))?;
        Ok(parse_lines(&stdout).into_iter().next())
    }

    fn inspect(&self, container_id: &str) -> Result<ContainerInfo> {
        let stdout = self.stdout(Command::new(&self.docker_command).args(["inspect", container_id]))?;
        parse_inspect(&stdout)
    }

    fn status(&self, service: Option<&str>) -> Result<Vec<ServiceStatus>> {
        let mut cmd = self.compose();
        cmd.args(["ps", "--all", "--format", "json"]);
        if let Some(service) = service {
            cmd.arg(service);
        }
        let stdout = self.stdout(&mut cmd)?;
        parse_ps(&stdout)
    }

    fn logs(&self, service: &str, follow: bool, tail: Option<usize>) -> Result<()> {
        let mut cmd = self.compose();
        cmd.arg("logs");
        if follow {
            cmd.arg("-f");
        }
        if let Some(tail) = tail {
            cmd.arg("--tail").arg(tail.to_string());
        }
        cmd.arg(service);
        run_attached(&mut cmd)
    }

    fn exec_interactive(&self, service: &str, command: &[String]) -> Result<()> {
        run_attached(self.compose().arg("exec").arg(service).args(command))
    }
}

fn parse_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `compose ps --format json` prints a JSON array on older releases and one
/// object per line on newer ones.
fn parse_ps(stdout: &str) -> Result<Vec<ServiceStatus>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed).context("failed to parse compose ps output")?);
    }
    let mut statuses = Vec::new();
    for line in parse_lines(trimmed) {
        statuses.push(
            serde_json::from_str(&line)
                .with_context(|| format!("failed to parse compose ps line {:?}", line))?,
        );
    }
    Ok(statuses)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    host_config: LiveLimits,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
}

fn parse_inspect(stdout: &str) -> Result<ContainerInfo> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout.trim()).context("failed to parse inspect output")?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| SshboxError::Runtime {
            command: "inspect".to_owned(),
            stderr: "no such container".to_owned(),
        })?;
    Ok(ContainerInfo {
        running: entry.state.running,
        limits: entry.host_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_command_line() {
        let settings = Settings::with_root("/srv/sshbox");
        let cli = ComposeCli::new(&settings);
        let mut cmd = cli.compose();
        cmd.args(["up", "-d"]);
        assert_eq!(
            crate::utils::display_command(&cmd),
            "docker compose -p sshbox -f /srv/sshbox/compose.json up -d"
        );
    }

    #[test]
    fn test_legacy_compose_binary() {
        let mut settings = Settings::with_root("/srv/sshbox");
        settings.compose_command = vec!["docker-compose".to_string()];
        let cmd = ComposeCli::new(&settings).compose();
        assert_eq!(cmd.get_program(), "docker-compose");
    }

    #[test]
    fn test_parse_ps_array_and_lines() -> Result<()> {
        let array = r#"[{"Name":"alice-ssh","Service":"alice-ssh","State":"running","Status":"Up 2 minutes","Health":"healthy"}]"#;
        let lines = "{\"Name\":\"alice-ssh\",\"Service\":\"alice-ssh\",\"State\":\"running\",\"Status\":\"Up 2 minutes\",\"Health\":\"healthy\"}\n\
                     {\"Name\":\"bob-ssh\",\"Service\":\"bob-ssh\",\"State\":\"exited\",\"Status\":\"Exited (0)\"}\n";

        let from_array = parse_ps(array)?;
        let from_lines = parse_ps(lines)?;
        assert_eq!(from_array.len(), 1);
        assert_eq!(from_array[0], from_lines[0]);
        assert_eq!(from_lines[1].state, "exited");
        assert_eq!(from_lines[1].health, "");
        assert!(parse_ps("  \n")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_inspect() -> Result<()> {
        let stdout = r#"[{"Id":"abc","State":{"Status":"running","Running":true},"HostConfig":{"NanoCpus":1500000000,"Memory":536870912,"CpuQuota":0,"CpuPeriod":0}}]"#;
        let info = parse_inspect(stdout)?;
        assert!(info.running);
        assert_eq!(info.limits.cpus_display(), "1.500");
        assert_eq!(info.limits.memory_display(), "512.00 MiB");
        assert!(parse_inspect("[]").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(parse_lines("alice-ssh\n\nbob-ssh\n"), vec!["alice-ssh", "bob-ssh"]);
    }
}
