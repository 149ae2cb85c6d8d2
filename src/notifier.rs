/// Notification delivery through an external messaging CLI.
use crate::config::NotifyConfig;
use std::process::Stdio;
use tokio::process::Command;

/// Delivers a message somewhere a human will see it.
///
/// Fire-and-forget: implementations log failures and never report them back,
/// so callers update their state whether or not delivery worked.
pub trait Notifier {
    async fn send(&self, text: &str);
}

/// Sends via `<command> send --to <recipient> --text <text> --service <service>`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: String,
    recipient: String,
    service: String,
}

impl CommandNotifier {
    pub fn new(command: &str, recipient: &str, service: &str) -> Self {
        Self {
            command: command.to_string(),
            recipient: recipient.to_string(),
            service: service.to_string(),
        }
    }

    pub fn from_config(notify: &NotifyConfig) -> Self {
        Self::new(&notify.command, &notify.recipient, &notify.service)
    }

    fn build_args(&self, text: &str) -> Vec<String> {
        vec![
            "send".to_string(),
            "--to".to_string(),
            self.recipient.clone(),
            "--text".to_string(),
            text.to_string(),
            "--service".to_string(),
            self.service.clone(),
        ]
    }
}

impl Notifier for CommandNotifier {
    async fn send(&self, text: &str) {
        let args = self.build_args(text);
        tracing::info!(
            command = %self.command,
            recipient = %self.recipient,
            service = %self.service,
            "sending idle notification"
        );

        let status = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await;

        match status {
            Ok(s) if s.success() => tracing::debug!("notification command succeeded"),
            Ok(s) => tracing::warn!(exit_code = ?s.code(), "notification command failed"),
            Err(e) => tracing::warn!(
                error = %e,
                command = %self.command,
                "failed to spawn notification command"
            ),
        }
    }
}

/// Render the notification text, replacing `{minutes}` with whole idle minutes.
pub fn render_message(template: &str, idle_secs: f64) -> String {
    let minutes = (idle_secs / 60.0).floor().max(0.0) as u64;
    template.replace("{minutes}", &minutes.to_string())
}

/// Test double that records every message instead of delivering it.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.sent.lock().unwrap().push(text.to_string());
    }
}
