use std::ffi::OsString;
use std::process::Stdio;

use tokio::process::Command;

use crate::request::{AclCommand, AclResult};

pub const DEFAULT_SETFACL: &str = "setfacl";

/// Applies ACL changes by running `setfacl` directly.
///
/// This assumes the process already holds the rights to modify ACLs on the
/// target; the external command is the only privilege boundary.
#[derive(Clone, Debug)]
pub struct ExecDispatcher {
    program: OsString,
}

impl Default for ExecDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SETFACL)
    }
}

impl ExecDispatcher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self { program: program.into() }
    }

    /// `-m` merges the entry into the ACL, `-x` deletes it.
    pub fn arguments(command: &AclCommand) -> [String; 3] {
        let flag = if command.action.is_removal() { "-x" } else { "-m" };
        [flag.to_string(), command.entry.clone(), command.path.clone()]
    }

    pub async fn apply(&self, command: &AclCommand) -> AclResult {
        let output = Command::new(&self.program)
            .args(Self::arguments(command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                return AclResult::failure(format!(
                    "failed to execute {}: {}",
                    self.program.to_string_lossy(),
                    err
                ))
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() {
            AclResult::ok(combined)
        } else {
            log::debug!(
                "{} exited with {} for entry={} path={}",
                self.program.to_string_lossy(),
                output.status,
                command.entry,
                command.path
            );
            AclResult::failure(combined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AclEntry;

    fn command(action: &str) -> AclCommand {
        AclCommand::prepare("/data", &AclEntry::new("user", "alice", "rwx", action))
            .expect("valid command")
    }

    #[test]
    fn set_actions_use_merge_flag() {
        assert_eq!(ExecDispatcher::arguments(&command("add")), ["-m", "user:alice:rwx", "/data"]);
        assert_eq!(
            ExecDispatcher::arguments(&command("modify")),
            ["-m", "user:alice:rwx", "/data"]
        );
    }

    #[test]
    fn remove_uses_delete_flag() {
        assert_eq!(
            ExecDispatcher::arguments(&command("remove")),
            ["-x", "user:alice:rwx", "/data"]
        );
    }

    #[tokio::test]
    async fn successful_command_reports_its_output() {
        let dispatcher = ExecDispatcher::new("echo");
        let result = dispatcher.apply(&command("add")).await;
        assert_eq!(result, AclResult::ok("-m user:alice:rwx /data\n"));
    }

    #[tokio::test]
    async fn failing_command_reports_failure_with_output() {
        let dispatcher = ExecDispatcher::new("false");
        let result = dispatcher.apply(&command("remove")).await;
        assert_eq!(result, AclResult::failure(""));
    }

    #[tokio::test]
    async fn missing_program_is_a_failure_result() {
        let dispatcher = ExecDispatcher::new("/nonexistent/setfacl-binary");
        let result = dispatcher.apply(&command("add")).await;
        assert!(!result.success);
        assert!(result.message.starts_with("failed to execute /nonexistent/setfacl-binary"));
    }
}
