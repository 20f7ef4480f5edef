//! Resource runtime backed by the `docker` CLI.
//!
//! Each operation runs one `docker` subcommand via `tokio::process::Command`
//! and converts its exit status and output into a [`VmResult`].

use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use vmgate_core::runtime::{ResourceRuntime, ResourceStatus};
use vmgate_core::{ResourceName, VmError, VmResult};

/// Default bound for docker invocations other than `run`.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime that manages containers through the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    /// Path or name of the docker binary.
    binary: String,
    /// Image every session container is started from.
    image: String,
    /// Private network the containers join. No ports are published.
    network: String,
    /// Bound for every call except `docker run`, which may pull the image.
    command_timeout: Duration,
}

impl DockerRuntime {
    pub fn new(
        binary: impl Into<String>,
        image: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            image: image.into(),
            network: network.into(),
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run `docker <args>` under the command timeout and capture its output.
    async fn run(&self, args: &[&str]) -> VmResult<Output> {
        tokio::time::timeout(self.command_timeout, self.run_unbounded(args))
            .await
            .map_err(|_| VmError::Timeout)?
    }

    /// Run `docker <args>` to completion, however long it takes.
    async fn run_unbounded(&self, args: &[&str]) -> VmResult<Output> {
        debug!(binary = %self.binary, ?args, "running docker");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        cmd.output()
            .await
            .map_err(|e| VmError::Runtime(format!("failed to run {}: {e}", self.binary)))
    }

    async fn inspect_raw(&self, name: &ResourceName) -> VmResult<Vec<u8>> {
        let output = self.run(&["inspect", name.as_str()]).await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(classify_failure(name, &output))
        }
    }

    /// `docker run` is not bounded: a first start may pull a large image, and
    /// killing it midway can leave a created container nobody knows about.
    async fn create_container(&self, name: &ResourceName) -> VmResult<String> {
        let output = self
            .run_unbounded(&[
                "run",
                "-d",
                "--name",
                name.as_str(),
                "--network",
                self.network.as_str(),
                self.image.as_str(),
            ])
            .await
            .map_err(|e| VmError::Provisioning {
                message: e.to_string(),
                output: String::new(),
            })?;

        if !output.status.success() {
            let combined = combined_output(&output);
            warn!(resource = %name, status = %output.status, output = %combined, "docker run failed");
            return Err(VmError::Provisioning {
                message: format!("docker run exited with {}", output.status),
                output: combined,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn inspect_status(&self, name: &ResourceName) -> VmResult<ResourceStatus> {
        let raw = self.inspect_raw(name).await?;
        parse_status(name, &raw, &self.network)
    }

    async fn describe_container(&self, name: &ResourceName) -> VmResult<serde_json::Value> {
        let raw = self.inspect_raw(name).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn container_logs(&self, name: &ResourceName) -> VmResult<String> {
        let output = self.run(&["logs", name.as_str()]).await?;
        if output.status.success() {
            Ok(combined_output(&output))
        } else {
            Err(classify_failure(name, &output))
        }
    }

    async fn checked(&self, name: &ResourceName, args: &[&str]) -> VmResult<()> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_failure(name, &output))
        }
    }
}

impl ResourceRuntime for DockerRuntime {
    fn create<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<String>> {
        Box::pin(self.create_container(name))
    }

    fn inspect<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<ResourceStatus>> {
        Box::pin(self.inspect_status(name))
    }

    fn describe<'a>(
        &'a self,
        name: &'a ResourceName,
    ) -> BoxFuture<'a, VmResult<serde_json::Value>> {
        Box::pin(self.describe_container(name))
    }

    fn logs<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<String>> {
        Box::pin(self.container_logs(name))
    }

    fn stop<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<()>> {
        Box::pin(async move { self.checked(name, &["stop", name.as_str()]).await })
    }

    fn destroy<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<()>> {
        Box::pin(async move { self.checked(name, &["rm", "-f", name.as_str()]).await })
    }
}

// ── docker inspect output ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct InspectEntry {
    #[serde(rename = "State", default)]
    state: InspectState,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: Option<BTreeMap<String, InspectNetwork>>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Extract running state and address from `docker inspect` JSON.
///
/// The address on `preferred_network` wins; otherwise the first network with
/// a non-empty address is used.
fn parse_status(
    name: &ResourceName,
    raw: &[u8],
    preferred_network: &str,
) -> VmResult<ResourceStatus> {
    let entries: Vec<InspectEntry> = serde_json::from_slice(raw)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| VmError::ResourceNotFound(name.to_string()))?;

    let networks = entry.network_settings.networks.unwrap_or_default();
    let parse = |n: &InspectNetwork| n.ip_address.trim().parse::<IpAddr>().ok();
    let address = networks
        .get(preferred_network)
        .and_then(parse)
        .or_else(|| networks.values().find_map(parse));

    Ok(ResourceStatus {
        running: entry.state.running,
        address,
    })
}

/// Map a failed docker invocation to `ResourceNotFound` or `Runtime`.
fn classify_failure(name: &ResourceName, output: &Output) -> VmError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("No such object") || stderr.contains("No such container") {
        VmError::ResourceNotFound(name.to_string())
    } else {
        VmError::Runtime(format!(
            "docker exited with {}: {}",
            output.status,
            stderr.trim()
        ))
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}
