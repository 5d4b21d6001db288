//! `vagrant` CLI binding.

use crate::{
    CommandOutput, CommandStream, Machine, MachineInfo, MachineState, ProviderError, Result,
    VagrantTool,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use vm_core::{capture_command, is_tool_installed, stream_command_lines};

// Constants for Vagrant provider
const VAGRANT: &str = "vagrant";
const VAGRANTFILE: &str = "Vagrantfile";
const BOX_PROVIDER: &str = "virtualbox";

/// Factory for [`CliMachine`] handles.
#[derive(Debug, Clone, Default)]
pub struct CliVagrant;

impl CliVagrant {
    pub fn new() -> Result<Self> {
        if !is_tool_installed(VAGRANT) {
            return Err(ProviderError::DependencyNotFound("Vagrant".into()));
        }
        Ok(Self)
    }
}

impl VagrantTool for CliVagrant {
    fn open(&self, path: &Path) -> Result<Arc<dyn Machine>> {
        Ok(Arc::new(CliMachine::new(path)?))
    }
}

/// A Vagrant environment driven through the `vagrant` binary.
#[derive(Debug, Clone)]
pub struct CliMachine {
    dir: PathBuf,
    vagrantfile: PathBuf,
}

impl CliMachine {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(ProviderError::InvalidPath(format!(
                "{} is not absolute",
                path.display()
            )));
        }
        if path.exists() && !path.is_dir() {
            return Err(ProviderError::InvalidPath(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        Ok(Self {
            dir: path.to_path_buf(),
            vagrantfile: path.join(VAGRANTFILE),
        })
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        Ok(capture_command(VAGRANT, args, self.working_dir())?)
    }

    /// `vagrant box` and `global-status` work from anywhere; fall back to
    /// the root when the environment directory has not been created yet.
    fn working_dir(&self) -> &Path {
        if self.dir.is_dir() {
            &self.dir
        } else {
            Path::new("/")
        }
    }

    fn require_vagrantfile(&self) -> Result<()> {
        if !self.vagrantfile.is_file() {
            return Err(ProviderError::NotFound(format!(
                "no Vagrantfile at {}",
                self.vagrantfile.display()
            )));
        }
        Ok(())
    }

    /// Spawns `vagrant <args>` on its own thread and returns its live output.
    fn spawn(&self, args: Vec<String>, box_name: Option<String>) -> Result<CommandStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let dir = self.working_dir().to_path_buf();
        let label = format!("vagrant-{}", args.first().map(String::as_str).unwrap_or("cmd"));

        debug!("Starting vagrant {:?} in {}", args, dir.display());

        std::thread::Builder::new().name(label).spawn(move || {
            let mut already_exists = false;
            let result = stream_command_lines(VAGRANT, &args, &dir, |line| {
                if box_name.is_some() && line.contains("already exists") {
                    already_exists = true;
                }
                // The receiver may have been abandoned; keep draining the process.
                let _ = tx.send(CommandOutput::Line(line.to_string()));
            });

            if let Err(err) = result {
                let err = match box_name {
                    Some(name) if already_exists => ProviderError::BoxAlreadyExists(name),
                    _ => err.into(),
                };
                let _ = tx.send(CommandOutput::Error(err));
            }
        })?;

        Ok(rx)
    }
}

impl Machine for CliMachine {
    fn vagrantfile_path(&self) -> &Path {
        &self.dir
    }

    fn list(&self) -> Result<Vec<MachineInfo>> {
        let output = self.capture(&["global-status", "--prune", "--machine-readable"])?;
        Ok(parse_global_status(&output))
    }

    fn create(&self, vagrantfile: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&self.vagrantfile, vagrantfile)?;
        Ok(())
    }

    fn provider(&self) -> Result<String> {
        self.require_vagrantfile()?;
        let output = self.capture(&["status", "--machine-readable"])?;
        machine_readable_value(&output, "provider-name")
            .ok_or_else(|| ProviderError::Parse("no provider-name in vagrant status".into()))
    }

    fn status(&self) -> Result<MachineState> {
        self.require_vagrantfile()?;
        let output = self.capture(&["status", "--machine-readable"])?;
        machine_readable_value(&output, "state")
            .map(|state| MachineState::parse(&state))
            .ok_or_else(|| ProviderError::Parse("no state in vagrant status".into()))
    }

    fn version(&self) -> Result<String> {
        let output = self.capture(&["--version"])?;
        parse_version(&output)
    }

    fn box_add(&self, name: &str) -> Result<CommandStream> {
        let args = vec![
            "box".to_string(),
            "add".to_string(),
            name.to_string(),
            "--provider".to_string(),
            BOX_PROVIDER.to_string(),
        ];
        self.spawn(args, Some(name.to_string()))
    }

    fn up(&self) -> Result<CommandStream> {
        self.require_vagrantfile()?;
        self.spawn(vec!["up".to_string()], None)
    }

    fn halt(&self) -> Result<CommandStream> {
        self.require_vagrantfile()?;
        self.spawn(vec!["halt".to_string()], None)
    }

    fn destroy(&self) -> Result<CommandStream> {
        self.require_vagrantfile()?;
        self.spawn(vec!["destroy".to_string(), "--force".to_string()], None)
    }
}

/// Splits a `--machine-readable` record into `(target, type, data)`.
///
/// Records look like `1434050346,default,state,running`; the data column
/// may itself contain commas.
fn machine_readable_record(line: &str) -> Option<(&str, &str, &str)> {
    let mut parts = line.splitn(4, ',');
    let _timestamp = parts.next()?;
    let target = parts.next()?;
    let kind = parts.next()?;
    let data = parts.next().unwrap_or("");
    Some((target, kind, data))
}

fn machine_readable_value(output: &str, kind: &str) -> Option<String> {
    output
        .lines()
        .filter_map(machine_readable_record)
        .find(|(_, k, _)| *k == kind)
        .map(|(_, _, data)| data.trim().to_string())
}

/// Parses `vagrant global-status --machine-readable`, which emits one
/// `machine-home` record followed by one `state` record per machine.
fn parse_global_status(output: &str) -> Vec<MachineInfo> {
    let mut machines = Vec::new();
    let mut home: Option<PathBuf> = None;

    for (_, kind, data) in output.lines().filter_map(machine_readable_record) {
        match kind {
            "machine-home" => home = Some(PathBuf::from(data.trim())),
            "state" => {
                if let Some(path) = home.take() {
                    machines.push(MachineInfo {
                        vagrantfile_path: path,
                        state: MachineState::parse(data),
                    });
                }
            }
            _ => {}
        }
    }

    machines
}

fn parse_version(output: &str) -> Result<String> {
    let re = Regex::new(r"Vagrant\s+(\S+)").map_err(|e| ProviderError::Parse(e.to_string()))?;
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ProviderError::Parse(format!("unexpected version output: {}", output.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_readable_value() {
        let output = "1434050346,default,metadata,provider,virtualbox\n\
                      1434050346,default,provider-name,virtualbox\n\
                      1434050346,default,state,poweroff\n\
                      1434050346,default,state-human-short,poweroff\n";

        assert_eq!(
            machine_readable_value(output, "provider-name").as_deref(),
            Some("virtualbox")
        );
        assert_eq!(machine_readable_value(output, "state").as_deref(), Some("poweroff"));
        assert_eq!(machine_readable_value(output, "missing"), None);
    }

    #[test]
    fn test_parse_global_status() {
        let output = "1,,metadata,machine-count,2\n\
                      1,,machine-id,a1b2c3\n\
                      1,,provider-name,virtualbox\n\
                      1,,machine-home,/home/user/vm/a\n\
                      1,,state,running\n\
                      1,,machine-id,d4e5f6\n\
                      1,,provider-name,virtualbox\n\
                      1,,machine-home,/home/user/vm/b\n\
                      1,,state,not_created\n";

        let machines = parse_global_status(output);
        assert_eq!(
            machines,
            vec![
                MachineInfo {
                    vagrantfile_path: PathBuf::from("/home/user/vm/a"),
                    state: MachineState::Running,
                },
                MachineInfo {
                    vagrantfile_path: PathBuf::from("/home/user/vm/b"),
                    state: MachineState::NotCreated,
                },
            ]
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("Vagrant 2.4.1\n").unwrap(), "2.4.1");
        assert!(parse_version("command not found").is_err());
    }

    #[test]
    fn test_cli_machine_rejects_relative_and_file_paths() {
        assert!(matches!(
            CliMachine::new(Path::new("relative/dir")),
            Err(ProviderError::InvalidPath(_))
        ));

        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            CliMachine::new(file.path()),
            Err(ProviderError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_cli_machine_construction_leaves_filesystem_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("not-yet-created");

        let machine = CliMachine::new(&target).unwrap();

        assert!(!target.exists());
        assert_eq!(machine.vagrantfile_path(), target.as_path());
    }

    #[test]
    fn test_create_writes_vagrantfile() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("box");
        let machine = CliMachine::new(&target).unwrap();

        machine.create("Vagrant.configure(\"2\") do |config|\nend\n").unwrap();

        let written = std::fs::read_to_string(target.join(VAGRANTFILE)).unwrap();
        assert!(written.starts_with("Vagrant.configure"));
    }

    #[test]
    fn test_streaming_commands_require_vagrantfile() {
        let dir = tempfile::tempdir().unwrap();
        let machine = CliMachine::new(dir.path()).unwrap();

        assert!(matches!(machine.up(), Err(ProviderError::NotFound(_))));
        assert!(matches!(machine.halt(), Err(ProviderError::NotFound(_))));
        assert!(matches!(machine.destroy(), Err(ProviderError::NotFound(_))));
    }
}
