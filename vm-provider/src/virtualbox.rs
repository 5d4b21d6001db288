//! VirtualBox port-forwarding rules, read through `VBoxManage`.

use crate::{ForwardedPort, PortForwarding, ProviderError, Result};
use regex::Regex;
use std::path::Path;
use vm_core::{capture_command, is_tool_installed};

const VBOXMANAGE: &str = "VBoxManage";

#[derive(Debug, Clone, Default)]
pub struct VBoxManage;

impl VBoxManage {
    pub fn new() -> Result<Self> {
        if !is_tool_installed(VBOXMANAGE) {
            return Err(ProviderError::DependencyNotFound("VirtualBox".into()));
        }
        Ok(Self)
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        Ok(capture_command(VBOXMANAGE, args, Path::new("/"))?)
    }
}

impl PortForwarding for VBoxManage {
    fn lookup_name(&self, name: &str) -> Result<String> {
        let output = self.run(&["list", "vms"])?;
        match_vm_name(&parse_vm_names(&output), name)
    }

    fn forwarded_ports(&self, vm_name: &str) -> Result<Vec<ForwardedPort>> {
        let output = self.run(&["showvminfo", vm_name, "--machinereadable"])?;
        parse_forwarding_rules(&output)
    }
}

/// Parses `VBoxManage list vms` lines of the form `"name" {uuid}`.
fn parse_vm_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix('"')?;
            let end = rest.rfind('"')?;
            Some(rest[..end].to_string())
        })
        .collect()
}

/// Finds the VM backing box `name`: an exact match wins, otherwise the first
/// Vagrant-generated `<name>_<machine>_<suffix>` VM.
pub(crate) fn match_vm_name(names: &[String], name: &str) -> Result<String> {
    if let Some(exact) = names.iter().find(|n| n.as_str() == name) {
        return Ok(exact.clone());
    }

    let prefix = format!("{}_", name);
    names
        .iter()
        .find(|n| n.starts_with(&prefix))
        .cloned()
        .ok_or_else(|| ProviderError::NotFound(format!("no VirtualBox VM named {:?}", name)))
}

/// Parses `Forwarding(N)="rule,proto,host-ip,host-port,guest-ip,guest-port"`
/// lines from `showvminfo --machinereadable`.
fn parse_forwarding_rules(output: &str) -> Result<Vec<ForwardedPort>> {
    let re = Regex::new(r#"^Forwarding\(\d+\)="([^"]*)""#)
        .map_err(|e| ProviderError::Parse(e.to_string()))?;

    let mut ports = Vec::new();
    for line in output.lines() {
        let Some(caps) = re.captures(line.trim()) else {
            continue;
        };
        let fields: Vec<&str> = caps[1].split(',').collect();
        if fields.len() != 6 {
            return Err(ProviderError::Parse(format!("malformed forwarding rule: {}", line)));
        }

        let parse_port = |value: &str| -> Result<u16> {
            if value.is_empty() {
                return Ok(0);
            }
            value
                .parse()
                .map_err(|_| ProviderError::Parse(format!("invalid port {:?} in {}", value, line)))
        };

        ports.push(ForwardedPort {
            host_port: parse_port(fields[3])?,
            guest_port: parse_port(fields[5])?,
        });
    }

    Ok(ports)
}
