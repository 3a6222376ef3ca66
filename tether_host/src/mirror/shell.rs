//! Proxy for a shell session hosted by a target driver process.

use crate::channel::SharedChannel;
use std::time::Duration;
use tether_common::proto::{Bits, Request};
use tether_common::{TetherError, TetherResult};

/// Output of one batch of shell commands, index-aligned per command.
#[derive(Debug, Clone, Default)]
pub struct CommandResults {
    /// Standard output per command
    pub stdouts: Vec<String>,
    /// Standard error per command
    pub stderrs: Vec<String>,
    /// Exit code per command
    pub exit_codes: Vec<i32>,
}

impl CommandResults {
    /// Whether every command exited with code zero.
    pub fn succeeded(&self) -> bool {
        !self.exit_codes.is_empty() && self.exit_codes.iter().all(|&code| code == 0)
    }
}

/// Host-side proxy for one shell terminal on the target.
pub struct ShellMirror {
    instance_name: String,
    bits: Bits,
    enabled: bool,
    conn_timeout: Option<Duration>,
    channel: SharedChannel,
}

impl ShellMirror {
    pub(crate) fn new(channel: SharedChannel, instance_name: &str, bits: Bits) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            bits,
            enabled: true,
            conn_timeout: None,
            channel,
        }
    }

    /// Run commands in the remote shell and collect their outputs.
    ///
    /// # Errors
    /// `UserInput` if this terminal has been disabled; channel errors
    /// otherwise.
    pub fn execute(&self, commands: &[String]) -> TetherResult<CommandResults> {
        if !self.enabled {
            return Err(TetherError::UserInput(format!(
                "shell terminal '{}' is disabled",
                self.instance_name
            )));
        }
        let response = self.channel.lock().send(&Request::ExecuteShell {
            commands: commands.to_vec(),
        })?;
        Ok(CommandResults {
            stdouts: response.stdout,
            stderrs: response.stderr,
            exit_codes: response.exit_code,
        })
    }

    /// Apply a TCP connection timeout to this terminal's transport.
    pub fn set_conn_timeout(&mut self, timeout: Option<Duration>) -> TetherResult<()> {
        self.channel.lock().set_timeout(timeout)?;
        self.conn_timeout = timeout;
        Ok(())
    }

    /// Currently applied connection timeout.
    pub fn conn_timeout(&self) -> Option<Duration> {
        self.conn_timeout
    }

    /// Enable or disable this terminal.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether commands may be executed through this terminal.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Terminal instance name.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Bit-width of the shell driver process.
    pub fn bits(&self) -> Bits {
        self.bits
    }

    /// The command channel backing this mirror.
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

impl std::fmt::Debug for ShellMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellMirror")
            .field("instance_name", &self.instance_name)
            .field("bits", &self.bits)
            .field("enabled", &self.enabled)
            .finish()
    }
}
