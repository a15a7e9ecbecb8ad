use crate::blinds::{CommandKind, TelemetryRecord};
use serde::Serialize;
use std::fmt;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Auto,
    Manual,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Manual => "manual",
        }
    }

    pub fn toggled(&self) -> Mode {
        match self {
            Mode::Auto => Mode::Manual,
            Mode::Manual => Mode::Auto,
        }
    }

    /// Command that switches the service into this mode
    pub fn command(&self) -> CommandKind {
        match self {
            Mode::Auto => CommandKind::Auto,
            Mode::Manual => CommandKind::Manual,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locally tracked motion of the blind. Only meaningful in manual mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionStatus {
    #[default]
    Idle,
    Opening,
    Opened,
    Closing,
    Closed,
}

impl MotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionStatus::Idle => "idle",
            MotionStatus::Opening => "opening",
            MotionStatus::Opened => "opened",
            MotionStatus::Closing => "closing",
            MotionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for MotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PollSucceeded(Vec<TelemetryRecord>),
    PollFailed,
    CommandStarted(CommandKind),
    CommandSucceeded(CommandKind),
    CommandFailed { command: CommandKind, cause: String },
    /// Local timer standing in for the blind finishing an open or close
    SettleTimerFired(CommandKind),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub mode: Mode,
    pub motion: MotionStatus,
    pub message: String,
    pub telemetry: Vec<TelemetryRecord>,
    /// Set until the first poll comes back, successful or not
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: Mode::Auto,
            motion: MotionStatus::Idle,
            message: String::new(),
            telemetry: vec![],
            loading: true,
        }
    }
}

impl SessionState {
    /// Open and close are only accepted under manual control.
    pub fn accepts(&self, command: CommandKind) -> bool {
        match command {
            CommandKind::Open | CommandKind::Close => self.mode == Mode::Manual,
            CommandKind::Auto | CommandKind::Manual => true,
        }
    }

    /// Single entry point for every state change.
    /// Returns whether anything observable changed.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::PollSucceeded(records) => {
                let changed = self.loading || self.telemetry != records;
                self.telemetry = records;
                self.loading = false;
                changed
            }
            SessionEvent::PollFailed => std::mem::replace(&mut self.loading, false),
            SessionEvent::CommandStarted(command) => {
                self.set_message(format!("Sending {} command...", command))
            }
            SessionEvent::CommandSucceeded(command) => match command {
                CommandKind::Auto | CommandKind::Manual => {
                    self.mode = if command == CommandKind::Auto {
                        Mode::Auto
                    } else {
                        Mode::Manual
                    };
                    self.set_message(format!("System switched to {} mode", self.mode));
                    true
                }
                CommandKind::Open | CommandKind::Close if self.mode == Mode::Auto => {
                    debug!("Ignoring {} result, system is in auto mode", command);
                    false
                }
                CommandKind::Open => self.set_motion(MotionStatus::Opening),
                CommandKind::Close => self.set_motion(MotionStatus::Closing),
            },
            SessionEvent::CommandFailed { command, cause } => {
                debug!("Command {} failed, keeping mode and motion", command);
                self.set_message(format!("Error: {}", cause))
            }
            SessionEvent::SettleTimerFired(command) if self.mode == Mode::Auto => {
                debug!("Ignoring {} settle, system is in auto mode", command);
                false
            }
            SessionEvent::SettleTimerFired(command) => match (command, self.motion) {
                (CommandKind::Open, MotionStatus::Opening) => {
                    self.set_motion(MotionStatus::Opened)
                }
                (CommandKind::Close, MotionStatus::Closing) => {
                    self.set_motion(MotionStatus::Closed)
                }
                (command, motion) => {
                    debug!("Ignoring stale {} settle while {}", command, motion);
                    false
                }
            },
        }
    }

    fn set_motion(&mut self, motion: MotionStatus) -> bool {
        self.motion = motion;
        self.set_message(motion.as_str().to_owned());
        true
    }

    fn set_message(&mut self, message: String) -> bool {
        if self.message == message {
            return false;
        }
        self.message = message;
        true
    }
}
