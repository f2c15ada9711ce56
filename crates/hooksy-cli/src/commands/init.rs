//! `hooksy init`: write a starter config file.

use std::path::Path;

use anyhow::{bail, Context, Result};

use hooksy_core::config::{global_config_path, project_config_path};

const STARTER_CONFIG: &str = r#"version: "1"

settings:
  log_level: info
  default_decision: allow
  trace:
    enabled: true

rules:
  PreToolUse:
    - name: block-rm-rf
      description: Deny recursive forced deletes of the filesystem root.
      priority: 100
      conditions:
        tool_name: "^Bash$"
        input:
          command:
            - pattern: 'rm\s+-rf\s+/'
              message: dangerous delete
      decision: deny

  PostToolUse:
    - name: detect-aws-key
      description: Block tool output that leaks an AWS access key.
      priority: 100
      conditions:
        response:
          - pattern: 'AKIA[0-9A-Z]{16}'
      decision: block
      system_message: AWS credentials detected in output

allowlist: []
sequence_rules: []

llm:
  enabled: false
"#;

pub fn run(project_dir: Option<&Path>, global: bool, force: bool) -> Result<()> {
    let path = if global {
        global_config_path()
    } else {
        project_config_path(project_dir)
    };

    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, STARTER_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("Wrote starter config to {}", path.display());
    Ok(())
}
