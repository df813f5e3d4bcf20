//! Docker CLI backend
//!
//! Drives a local Docker (or compatible) engine by shelling out to its CLI.
//! Each runtime operation maps onto one or two `docker` invocations.

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::spec::{
    ContainerAddress, ContainerSpec, LabelSelector, ReadinessProbe, StartedContainer,
    HOST_GATEWAY_NAME,
};
use crate::Result;

/// Default readiness bound when the caller supplies none
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Docker CLI configuration
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// CLI binary to invoke
    pub binary: String,
    /// Host on which published ports are reachable
    pub host: String,
    /// Delay between readiness polls
    pub poll_interval: Duration,
    /// Readiness bound used when none is given
    pub default_timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            binary: std::env::var("MOCKBOX_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
            host: std::env::var("MOCKBOX_DOCKER_HOST_ADDR")
                .unwrap_or_else(|_| "localhost".to_string()),
            poll_interval: Duration::from_millis(500),
            default_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl DockerConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Container runtime backed by the `docker` command line
pub struct DockerCli {
    config: DockerConfig,
}

impl DockerCli {
    pub fn new(config: DockerConfig) -> Self {
        DockerCli { config }
    }

    /// Create client from environment variables
    pub fn from_env() -> Self {
        Self::new(DockerConfig::from_env())
    }

    /// Run a docker subcommand, returning stdout on success.
    async fn run(&self, args: &[String]) -> Result<String> {
        let output = self.output(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(RuntimeError::CommandFailed {
                command: format!("{} {}", self.config.binary, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn output(&self, args: &[String]) -> Result<std::process::Output> {
        debug!("{} {}", self.config.binary, args.join(" "));
        Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RuntimeError::Unavailable(format!(
                    "`{}` not found in PATH",
                    self.config.binary
                )),
                _ => RuntimeError::Io(e),
            })
    }

    /// Combined stdout and stderr of the container so far
    async fn logs(&self, container_id: &str) -> Result<String> {
        let output = self.output(&args(&["logs", container_id])).await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} logs {}", self.config.binary, container_id),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn is_running(&self, container_id: &str) -> Result<bool> {
        let out = self
            .run(&args(&["inspect", "-f", "{{.State.Running}}", container_id]))
            .await?;
        Ok(out.trim() == "true")
    }

    async fn poll_until_ready(&self, container_id: &str, probe: &ReadinessProbe) -> Result<()> {
        match probe {
            ReadinessProbe::LogMessage { pattern } => {
                let regex = Regex::new(pattern)?;
                loop {
                    let logs = self.logs(container_id).await?;
                    if logs.lines().any(|line| regex.is_match(line)) {
                        return Ok(());
                    }
                    if !self.is_running(container_id).await? {
                        return Err(RuntimeError::ContainerExited {
                            container_id: container_id.to_string(),
                        });
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
            ReadinessProbe::PortOpen { port } => {
                let host_port = self.mapped_port(container_id, *port).await?;
                let addr = format!("{}:{}", self.config.host, host_port);
                loop {
                    if tokio::net::TcpStream::connect(&addr).await.is_ok() {
                        return Ok(());
                    }
                    if !self.is_running(container_id).await? {
                        return Err(RuntimeError::ContainerExited {
                            container_id: container_id.to_string(),
                        });
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn is_available(&self) -> bool {
        match self
            .run(&args(&["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(version) => {
                debug!("Docker server version {}", version.trim());
                true
            }
            Err(e) => {
                debug!("Docker not available: {}", e);
                false
            }
        }
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        if self.run(&args(&["network", "inspect", name])).await.is_ok() {
            return Ok(());
        }
        match self.run(&args(&["network", "create", name])).await {
            Ok(_) => {
                info!("Created container network {}", name);
                Ok(())
            }
            // Another process created it between inspect and create.
            Err(RuntimeError::CommandFailed { stderr, .. }) if stderr.contains("already exists") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer> {
        let out = self.run(&run_args(spec)).await?;
        let id = out
            .lines()
            .last()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RuntimeError::InvalidOutput("docker run printed no id".to_string()))?
            .to_string();

        info!(
            "Started container {} from {}",
            &id[..12.min(id.len())],
            spec.image
        );
        Ok(StartedContainer {
            id,
            host: self.config.host.clone(),
        })
    }

    async fn wait_ready(
        &self,
        container_id: &str,
        probe: &ReadinessProbe,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        tokio::time::timeout(timeout, self.poll_until_ready(container_id, probe))
            .await
            .map_err(|_| RuntimeError::ReadinessTimeout {
                container_id: container_id.to_string(),
                timeout_secs: timeout.as_secs(),
            })?
    }

    async fn mapped_port(&self, container_id: &str, container_port: u16) -> Result<u16> {
        let out = self
            .run(&args(&[
                "port",
                container_id,
                &format!("{}/tcp", container_port),
            ]))
            .await?;
        parse_port_output(&out)
    }

    async fn locate(
        &self,
        selector: &LabelSelector,
        container_port: u16,
    ) -> Result<Option<ContainerAddress>> {
        let filter = format!("label={}", selector.as_filter());
        let out = self
            .run(&args(&["ps", "-q", "--filter", &filter]))
            .await?;

        for id in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match self.mapped_port(id, container_port).await {
                Ok(port) => {
                    return Ok(Some(ContainerAddress {
                        id: id.to_string(),
                        host: self.config.host.clone(),
                        port,
                    }));
                }
                Err(e) => {
                    debug!("Container {} does not publish {}: {}", id, container_port, e);
                }
            }
        }
        Ok(None)
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        match self.run(&args(&["rm", "-f", "-v", container_id])).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { stderr, .. }) if stderr.contains("No such container") => {
                warn!("Container {} was already gone", container_id);
                Err(RuntimeError::ContainerNotFound(container_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Build the `docker run` argument list for a spec
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut out = args(&["run", "-d"]);
    for (key, value) in &spec.labels {
        out.push("--label".to_string());
        out.push(format!("{}={}", key, value));
    }
    if let Some(network) = &spec.network {
        out.push("--network".to_string());
        out.push(network.clone());
        for alias in &spec.network_aliases {
            out.push("--network-alias".to_string());
            out.push(alias.clone());
        }
    }
    for (key, value) in &spec.env {
        out.push("-e".to_string());
        out.push(format!("{}={}", key, value));
    }
    for port in &spec.exposed_ports {
        out.push("-p".to_string());
        out.push(port.to_string());
    }
    if spec.access_to_host {
        out.push("--add-host".to_string());
        out.push(format!("{}:host-gateway", HOST_GATEWAY_NAME));
    }
    out.push(spec.image.clone());
    out
}

/// Parse `docker port` output such as `0.0.0.0:49153` or `[::]:49153`
pub fn parse_port_output(output: &str) -> Result<u16> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|line| line.rsplit(':').next())
        .and_then(|port| port.parse::<u16>().ok())
        .ok_or_else(|| RuntimeError::InvalidOutput(format!("cannot parse port from {:?}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_full_spec() {
        let spec = ContainerSpec::new("quay.io/microcks/microcks-uber:latest")
            .with_label("mockbox-dev-service", "default")
            .with_network("mockbox-shared")
            .with_network_alias("mockbox-default-1a2b3c4d")
            .with_env("TEST_CALLBACK_URL", "http://mockbox-default-1a2b3c4d:8080")
            .with_exposed_port(8080)
            .with_exposed_port(9090)
            .with_access_to_host(true);

        let argv = run_args(&spec);
        assert_eq!(&argv[..2], &["run".to_string(), "-d".to_string()]);
        assert!(argv
            .windows(2)
            .any(|w| w[0] == "--label" && w[1] == "mockbox-dev-service=default"));
        assert!(argv
            .windows(2)
            .any(|w| w[0] == "--network-alias" && w[1] == "mockbox-default-1a2b3c4d"));
        assert!(argv.windows(2).any(|w| w[0] == "-p" && w[1] == "9090"));
        assert!(argv
            .windows(2)
            .any(|w| w[0] == "--add-host" && w[1] == "host.docker.internal:host-gateway"));
        assert_eq!(argv.last().unwrap(), "quay.io/microcks/microcks-uber:latest");
    }

    #[test]
    fn test_run_args_without_network_skips_aliases() {
        let spec = ContainerSpec::new("img").with_network_alias("orphan");
        let argv = run_args(&spec);
        assert!(!argv.contains(&"--network-alias".to_string()));
        assert!(!argv.contains(&"--add-host".to_string()));
    }

    #[test]
    fn test_parse_port_output_ipv4_and_ipv6() {
        assert_eq!(parse_port_output("0.0.0.0:49153\n[::]:49153\n").unwrap(), 49153);
        assert_eq!(parse_port_output("[::]:32768").unwrap(), 32768);
    }

    #[test]
    fn test_parse_port_output_garbage() {
        assert!(parse_port_output("").is_err());
        assert!(parse_port_output("no port here").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let cli = DockerCli::new(DockerConfig {
            binary: "definitely-not-a-container-runtime".to_string(),
            ..DockerConfig::default()
        });
        assert!(!cli.is_available().await);

        let err = cli.ensure_network("x").await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
