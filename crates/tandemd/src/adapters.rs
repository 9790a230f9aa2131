//! Command-backed collaborators.
//!
//! Each external system is driven by an operator-supplied shell command
//! from `tandem.toml`, run as `sh -c <command>` with the request passed
//! in `TANDEM_*` environment variables. A non-zero exit is a failure and
//! its stderr becomes the error message. The last non-empty stdout line
//! is the command's answer where one is expected.
//!
//! Child processes are killed when the awaiting future is dropped, so an
//! aborted run does not leave a build or launch running behind it.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use tandem_core::{
    ArtifactRef, DeploymentDescriptors, EnvironmentName, ReleaseError, ReleaseResult,
    TandemConfig, TargetGroupId,
};
use tandem_pipeline::{BuildCollaborator, BuildOutput, SourceRepository, SourceSnapshot};
use tandem_shift::ComputePlatform;

/// Run `command` through `sh -c`, returning stdout on success.
async fn run_command(command: &str, env: &[(&str, String)]) -> Result<String, String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .kill_on_drop(true);

    debug!(command, "running collaborator command");
    let output = cmd
        .output()
        .await
        .map_err(|e| format!("failed to spawn `{command}`: {e}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!(command, stderr = %stderr.trim(), "collaborator stderr");
    }
    if !output.status.success() {
        return Err(format!("`{command}` exited with {}: {}", output.status, stderr.trim()));
    }
    Ok(stdout)
}

fn last_line(stdout: &str) -> Option<&str> {
    stdout.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

fn not_configured(field: &str) -> String {
    format!("{field} is not configured")
}

// ── Source ─────────────────────────────────────────────────────

/// Fetches source through `source.fetch_command`.
///
/// Env: `TANDEM_REVISION` for an exact revision, `TANDEM_BRANCH` for a
/// branch head. A branch fetch must print the resolved revision.
pub struct CommandSource {
    fetch_command: Option<String>,
}

impl CommandSource {
    pub fn new(fetch_command: Option<String>) -> Self {
        Self { fetch_command }
    }
}

#[async_trait]
impl SourceRepository for CommandSource {
    async fn fetch_revision(&self, revision: &str) -> ReleaseResult<SourceSnapshot> {
        let Some(command) = &self.fetch_command else {
            return Ok(SourceSnapshot {
                revision: revision.to_string(),
            });
        };
        let stdout = run_command(command, &[("TANDEM_REVISION", revision.to_string())])
            .await
            .map_err(ReleaseError::SourceFetch)?;
        Ok(SourceSnapshot {
            revision: last_line(&stdout).unwrap_or(revision).to_string(),
        })
    }

    async fn fetch_branch(&self, branch: &str) -> ReleaseResult<SourceSnapshot> {
        let command = self
            .fetch_command
            .as_deref()
            .ok_or_else(|| ReleaseError::SourceFetch(not_configured("source.fetch_command")))?;
        let stdout = run_command(command, &[("TANDEM_BRANCH", branch.to_string())])
            .await
            .map_err(ReleaseError::SourceFetch)?;
        let revision = last_line(&stdout)
            .ok_or_else(|| ReleaseError::SourceFetch(format!("fetch of {branch} printed no revision")))?;
        Ok(SourceSnapshot {
            revision: revision.to_string(),
        })
    }
}

// ── Build ──────────────────────────────────────────────────────

/// Builds and pushes images through `build.command`.
///
/// Env: `TANDEM_REVISION`, `TANDEM_REPOSITORY`, `TANDEM_TAG`, `TANDEM_IMAGE`.
/// A printed `sha256:` line is taken as the pushed digest; without one the
/// digest is left unknown.
pub struct CommandBuilder {
    command: Option<String>,
}

impl CommandBuilder {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BuildCollaborator for CommandBuilder {
    async fn build(&self, revision: &str, target: &ArtifactRef) -> ReleaseResult<BuildOutput> {
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| ReleaseError::Build(not_configured("build.command")))?;
        let image = target.image();
        let stdout = run_command(
            command,
            &[
                ("TANDEM_REVISION", revision.to_string()),
                ("TANDEM_REPOSITORY", target.repository.clone()),
                ("TANDEM_TAG", target.tag.to_string()),
                ("TANDEM_IMAGE", image.clone()),
            ],
        )
        .await
        .map_err(ReleaseError::Build)?;

        let digest = last_line(&stdout)
            .filter(|line| line.starts_with("sha256:"))
            .map(str::to_string);
        if digest.is_none() {
            warn!(%image, revision, "build printed no digest");
        }
        Ok(BuildOutput {
            tag: target.tag.clone(),
            digest,
        })
    }
}

// ── Platform ───────────────────────────────────────────────────

/// Drives the compute platform through the `[platform]` commands.
pub struct CommandPlatform {
    update_command: Option<String>,
    launch_command: Option<String>,
    deregister_command: Option<String>,
}

impl CommandPlatform {
    pub fn from_config(config: &TandemConfig) -> Self {
        Self {
            update_command: config.platform.update_command.clone(),
            launch_command: config.platform.launch_command.clone(),
            deregister_command: config.platform.deregister_command.clone(),
        }
    }
}

fn descriptor_env(task_set: &str, descriptors: &DeploymentDescriptors) -> Vec<(&'static str, String)> {
    let td = &descriptors.task_definition;
    vec![
        ("TANDEM_TASK_SET", task_set.to_string()),
        ("TANDEM_FAMILY", td.family.clone()),
        ("TANDEM_ENVIRONMENT", td.environment.to_string()),
        ("TANDEM_IMAGE", td.image.clone()),
        ("TANDEM_CONTAINER_NAME", td.container_name.clone()),
        ("TANDEM_CONTAINER_PORT", td.container_port.to_string()),
        ("TANDEM_CPU_UNITS", td.shape.cpu_units.to_string()),
        ("TANDEM_MEMORY_MIB", td.shape.memory_mib.to_string()),
        ("TANDEM_DESIRED_COUNT", td.desired_count.to_string()),
        ("TANDEM_SOURCE_REVISION", descriptors.source_revision.clone()),
    ]
}

#[async_trait]
impl ComputePlatform for CommandPlatform {
    async fn update_in_place(
        &self,
        environment: EnvironmentName,
        task_set: &str,
        descriptors: &DeploymentDescriptors,
    ) -> ReleaseResult<()> {
        let command = self
            .update_command
            .as_deref()
            .ok_or_else(|| ReleaseError::DeployLaunch(not_configured("platform.update_command")))?;
        debug!(%environment, task_set, "updating environment in place");
        run_command(command, &descriptor_env(task_set, descriptors))
            .await
            .map_err(ReleaseError::DeployLaunch)?;
        Ok(())
    }

    async fn launch_task_set(
        &self,
        target_group: &TargetGroupId,
        task_set: &str,
        descriptors: &DeploymentDescriptors,
    ) -> ReleaseResult<()> {
        let command = self
            .launch_command
            .as_deref()
            .ok_or_else(|| ReleaseError::DeployLaunch(not_configured("platform.launch_command")))?;
        let mut env = descriptor_env(task_set, descriptors);
        env.push(("TANDEM_TARGET_GROUP", target_group.to_string()));
        run_command(command, &env).await.map_err(ReleaseError::DeployLaunch)?;
        Ok(())
    }

    async fn deregister_task_set(&self, target_group: &TargetGroupId, task_set: &str) -> ReleaseResult<()> {
        let Some(command) = self.deregister_command.as_deref() else {
            warn!(%target_group, task_set, "platform.deregister_command is not configured; task set left running");
            return Ok(());
        };
        run_command(
            command,
            &[
                ("TANDEM_TARGET_GROUP", target_group.to_string()),
                ("TANDEM_TASK_SET", task_set.to_string()),
            ],
        )
        .await
        .map_err(ReleaseError::DeployLaunch)?;
        Ok(())
    }
}
