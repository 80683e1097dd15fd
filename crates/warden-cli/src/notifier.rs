use crate::config::NotifierConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use warden_core::{WardenError, WardenResult};
use warden_orchestrator::AgentNotifier;

/// Messages an agent by running a command once per message.
///
/// `{agent_id}` and `{message}` in the arguments are replaced before the
/// call; arguments are passed as-is, never through a shell. Standard output
/// is the agent's reply. A non-zero exit is reported with its stderr as a
/// raw notifier error, so the retry policy can classify it.
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    fn render_args(&self, agent_id: &str, message: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{agent_id}", agent_id)
                    .replace("{message}", message)
            })
            .collect()
    }
}

#[async_trait]
impl AgentNotifier for CommandNotifier {
    async fn send(&self, agent_id: &str, message: &str) -> WardenResult<String> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.render_args(agent_id, message));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // A timed-out attempt drops this future; take the child with it.
        cmd.kill_on_drop(true);

        info!(
            program = %self.program,
            agent_id,
            message_len = message.len(),
            "Notifying agent"
        );
        let output = cmd.output().await.map_err(|e| {
            WardenError::Notifier(format!("Failed to run '{}': {e}", self.program))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WardenError::Notifier(format!(
                "'{}' failed for agent {agent_id} (exit {}): {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(stdout.trim().to_string())
    }
}

/// Logs messages instead of delivering them.
pub struct LogNotifier;

#[async_trait]
impl AgentNotifier for LogNotifier {
    async fn send(&self, agent_id: &str, message: &str) -> WardenResult<String> {
        info!(agent_id, message, "Agent message (no notifier command configured)");
        Ok(String::new())
    }
}

pub fn from_config(config: &NotifierConfig) -> Arc<dyn AgentNotifier> {
    match &config.command {
        Some(program) => {
            let mut notifier = CommandNotifier::new(program.clone(), config.args.clone());
            if let Some(dir) = &config.working_dir {
                notifier = notifier.with_working_dir(dir.clone());
            }
            Arc::new(notifier)
        }
        None => Arc::new(LogNotifier),
    }
}
