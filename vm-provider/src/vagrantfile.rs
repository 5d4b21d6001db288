//! Vagrantfile generation.

use crate::{ForwardedPort, Result};
use serde::Serialize;
use tera::{Context as TeraContext, Tera};

const VAGRANTFILE_TEMPLATE: &str = r#"# -*- mode: ruby -*-
# vi: set ft=ruby :

VAGRANTFILE_API_VERSION = "2"

$script = <<SCRIPT
#!/bin/bash
export PROVISION_DATA="{{ provision_data }}"
export USERNAME="{{ username }}"
{{ custom_script }}
SCRIPT

Vagrant.configure(VAGRANTFILE_API_VERSION) do |config|
  config.vm.box = "{{ box }}"
  config.vm.hostname = "{{ hostname }}"
{% for port in forwarded_ports %}
  config.vm.network "forwarded_port", guest: {{ port.guest | default(value=0) }}, host: {{ port.host | default(value=0) }}, auto_correct: true
{%- endfor %}

  config.vm.provider "virtualbox" do |vb|
    vb.customize ["modifyvm", :id, "--memory", "{{ memory }}", "--cpus", "{{ cpus }}"]
  end

  config.vm.provision "shell", inline: $script, privileged: true
end
"#;

/// Values substituted into the generated Vagrantfile.
#[derive(Debug, Clone, Serialize)]
pub struct VagrantfileSpec {
    pub username: String,
    pub hostname: String,
    #[serde(rename = "box")]
    pub box_name: String,
    pub memory: u32,
    pub cpus: u32,
    pub provision_data: String,
    pub custom_script: String,
    pub forwarded_ports: Vec<ForwardedPort>,
}

pub fn render_vagrantfile(spec: &VagrantfileSpec) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("Vagrantfile", VAGRANTFILE_TEMPLATE)?;

    let context = TeraContext::from_serialize(spec)?;
    Ok(tera.render("Vagrantfile", &context)?)
}
