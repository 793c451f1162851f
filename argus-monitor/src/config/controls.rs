//! Operator controls read between cycles.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tracing::prelude::*;

/// Operator-adjustable switches, stored next to the history file so
/// they can be flipped while the monitor runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Controls {
    /// Suppresses alert delivery while set. State transitions are still
    /// classified and recorded; missed transitions are not replayed
    /// when the flag clears.
    pub alerts_paused: bool,
}

/// Re-reads the controls file before each cycle.
///
/// A missing file means defaults. A malformed or unreadable file keeps
/// the previously read values rather than silently unpausing.
#[derive(Debug)]
pub struct ControlsReader {
    path: PathBuf,
    current: Controls,
}

impl ControlsReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            current: Controls::default(),
        }
    }

    /// Refresh from disk and return the effective controls.
    pub fn refresh(&mut self) -> &Controls {
        match std::fs::read(&self.path) {
            Ok(raw) => match serde_json::from_slice::<Controls>(&raw) {
                Ok(controls) => {
                    if controls != self.current {
                        info!(
                            alerts_paused = controls.alerts_paused,
                            "Controls changed"
                        );
                    }
                    self.current = controls;
                }
                Err(error) => {
                    warn!(
                        path = %self.path.display(),
                        %error,
                        "Ignoring malformed controls file"
                    );
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => {
                self.current = Controls::default();
            }
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    %error,
                    "Failed to read controls file, keeping previous"
                );
            }
        }
        &self.current
    }

    pub fn current(&self) -> &Controls {
        &self.current
    }
}
