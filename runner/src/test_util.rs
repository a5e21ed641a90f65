//! Scratch workspaces with shell scripts standing in for simulators and build tools.

use crate::{command::SimulatorCommand, experiment::ExperimentSpec, output::RunContext};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let workspace = Self {
            dir: TempDir::new().unwrap(),
        };
        fs::create_dir_all(workspace.run_dir()).unwrap();

        workspace
    }

    pub fn cwd(&self) -> &Path {
        self.dir.path()
    }

    pub fn run_dir(&self) -> PathBuf {
        self.dir.path().join("results").join("run")
    }

    pub fn context(&self) -> RunContext {
        RunContext {
            cwd: self.cwd().to_path_buf(),
            run_dir: self.run_dir(),
        }
    }

    /// install an executable shell script at `<cwd>/<group>/<group>`
    pub fn simulator(&self, group: &str, body: &str) -> PathBuf {
        let dir = self.cwd().join(group);
        fs::create_dir_all(&dir).unwrap();

        let path = dir.join(group);
        write_script(&path, body);

        path
    }

    /// install an executable shell script at `<cwd>/<name>`
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.cwd().join(name);
        write_script(&path, body);

        path
    }

    pub fn spec(&self, group: &str, benchmark: &str, args: &[&str]) -> ExperimentSpec {
        ExperimentSpec::new(group, benchmark, args.iter().copied()).unwrap()
    }

    pub fn command(&self, group: &str, benchmark: &str, args: &[&str]) -> SimulatorCommand {
        SimulatorCommand::build(&self.spec(group, benchmark, args), &self.context())
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
