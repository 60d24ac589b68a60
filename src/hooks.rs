//! User-configured side effects attached to break and posture lifecycle events.
//!
//! Hooks are fire-and-forget: a failing command is logged and never reaches
//! the state machine that triggered it.

use std::{
    collections::BTreeMap,
    process::{Command, Stdio},
    thread,
};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEvent {
    BreakStart,
    BreakEnd,
    NotificationShown,
    NotificationClosed,
    UserGone,
    AmbiguousDetection,
    OutsideActiveHours,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BreakStart => "break-start",
            HookEvent::BreakEnd => "break-end",
            HookEvent::NotificationShown => "notification-shown",
            HookEvent::NotificationClosed => "notification-closed",
            HookEvent::UserGone => "user-gone",
            HookEvent::AmbiguousDetection => "ambiguous-detection",
            HookEvent::OutsideActiveHours => "outside-active-hours",
        }
    }
}

/// Shell commands to run per lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookBundle {
    commands: BTreeMap<HookEvent, Vec<String>>,
}

impl HookBundle {
    pub fn with(mut self, event: HookEvent, command: impl Into<String>) -> Self {
        self.commands.entry(event).or_default().push(command.into());
        self
    }

    pub fn commands_for(&self, event: HookEvent) -> &[String] {
        self.commands
            .get(&event)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.commands.values().all(Vec::is_empty)
    }
}

pub trait HookRunner: Send + Sync {
    /// Runs whatever `hooks` has registered for `event`. Must not block on
    /// the hook itself and must not propagate failures.
    fn run(&self, hooks: &HookBundle, event: HookEvent);
}

/// Runs hook commands through the platform shell, each on its own reaper
/// thread so exit codes can be logged without blocking the caller.
#[derive(Debug, Default, Clone)]
pub struct CommandHookRunner;

impl CommandHookRunner {
    pub fn new() -> Self {
        Self
    }

    fn shell(command: &str) -> Command {
        #[cfg(target_os = "windows")]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        }

        #[cfg(not(target_os = "windows"))]
        {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

impl HookRunner for CommandHookRunner {
    fn run(&self, hooks: &HookBundle, event: HookEvent) {
        for command in hooks.commands_for(event) {
            debug!("Running {} hook: {}", event.as_str(), command);

            let child = Self::shell(command)
                .env("RESTWISE_EVENT", event.as_str())
                .stdin(Stdio::null())
                .spawn();

            let mut child = match child {
                Ok(child) => child,
                Err(err) => {
                    error!("Failed to start {} hook '{}': {}", event.as_str(), command, err);
                    continue;
                }
            };

            let label = format!("{} hook '{}'", event.as_str(), command);
            let reaper = thread::Builder::new()
                .name("hook-reaper".into())
                .spawn(move || match child.wait() {
                    Ok(status) if status.success() => {}
                    Ok(status) => warn!("{label} exited with {status}"),
                    Err(err) => error!("Failed to wait for {label}: {err}"),
                });
            if let Err(err) = reaper {
                error!("Failed to spawn hook reaper thread: {err}");
            }
        }
    }
}
