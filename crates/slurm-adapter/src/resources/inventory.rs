use std::future::Future;
use std::pin::Pin;
use std::process::Output;

use anyhow::Context;
use bstr::ByteSlice;
use tokio::process::Command;

/// Output of one invocation of the inventory command.
///
/// A failed invocation may still carry the part of the output that was printed before the
/// failure, it is parsed like the output of a successful one.
#[derive(Debug, Default)]
pub struct InventoryOutput {
    pub stdout: String,
    pub error: Option<anyhow::Error>,
}

impl InventoryOutput {
    pub fn success(stdout: String) -> Self {
        Self {
            stdout,
            error: None,
        }
    }

    pub fn failed(stdout: String, error: anyhow::Error) -> Self {
        Self {
            stdout,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Something that can print one `key=value` summary line per compute node.
pub trait InventorySource: Send + Sync {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = InventoryOutput> + Send + '_>>;
}

/// Runs a shell command (by default `scontrol show nodes --oneliner`) to get the node
/// inventory.
pub struct CommandInventory {
    command: String,
}

impl CommandInventory {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl InventorySource for CommandInventory {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = InventoryOutput> + Send + '_>> {
        Box::pin(async move {
            log::debug!("Running inventory command `{}`", self.command);
            let output = Command::new("bash")
                .arg("-c")
                .arg(&self.command)
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("Inventory command `{}` start failed", self.command));
            let output = match output {
                Ok(output) => output,
                Err(error) => return InventoryOutput::failed(String::new(), error),
            };

            let stdout = output.stdout.to_str_lossy().into_owned();
            match check_command_output(&output) {
                Ok(()) => InventoryOutput::success(stdout),
                Err(error) => InventoryOutput::failed(
                    stdout,
                    error.context(format!(
                        "Inventory command `{}` execution failed",
                        self.command
                    )),
                ),
            }
        })
    }
}

pub fn check_command_output(output: &Output) -> anyhow::Result<()> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
        ));
    }
    Ok(())
}
