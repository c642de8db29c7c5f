//! Exec job provider
//!
//! Runs a one-shot script either on the host or inside a throwaway
//! container. The job's pid and exit code are recorded as properties; a
//! non-zero exit is a provider failure so the resource lands in
//! `failed` and is retried on the next apply.

use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::docker::DockerCli;
use super::Provider;
use crate::resource::{ExecSpec, Resource, Spec};

pub struct ExecProvider {
    docker: DockerCli,
}

impl ExecProvider {
    pub fn new() -> Self {
        Self {
            docker: DockerCli::new(),
        }
    }

    fn run_local(&self, spec: &ExecSpec, resource: &mut Resource) -> Result<()> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&spec.script)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().context("failed to spawn exec script")?;
        resource.set_property("pid", child.id() as u64);

        let deadline = Instant::now() + Duration::from_secs(spec.timeout);
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() > deadline => {
                    child.kill().ok();
                    child.wait().ok();
                    bail!("exec script timed out after {}s", spec.timeout);
                }
                None => std::thread::sleep(Duration::from_millis(100)),
            }
        };

        let code = status.code().unwrap_or(-1);
        resource.set_property("exit_code", code as i64);
        if !status.success() {
            bail!("exec script exited with status {code}");
        }
        Ok(())
    }

    fn run_in_container(&self, image: &str, spec: &ExecSpec, resource: &mut Resource) -> Result<()> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];

        if let Some(dir) = &spec.working_directory {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(spec.script.clone());

        self.docker.run_checked(args)?;
        resource.set_property("exit_code", 0);
        Ok(())
    }
}

impl Provider for ExecProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::Exec(spec) = resource.spec.clone() else {
            bail!("resource {} is not an exec job", resource.id());
        };

        match &spec.image {
            Some(image) => self.run_in_container(image, &spec, resource),
            None => self.run_local(&spec, resource),
        }
    }

    fn destroy(&self, _resource: &mut Resource) -> Result<()> {
        // One-shot jobs leave nothing behind.
        Ok(())
    }

    fn refresh(&self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    fn changed(&self, _resource: &Resource) -> Result<bool> {
        // Jobs re-run only when their declared text changes.
        Ok(false)
    }
}
