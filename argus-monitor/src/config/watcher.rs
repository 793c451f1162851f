//! Mtime-based config reloading.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::tracing::prelude::*;

use super::{ConfigError, MonitorConfig};

/// Checks the config file's modification time between cycles and
/// reloads the file when it changes.
///
/// Writers are expected to replace the file atomically (write to a
/// temporary name, then rename into place), so a changed mtime always
/// refers to a complete file. A reload that fails to read, parse or
/// validate keeps the previous config and leaves the recorded mtime
/// untouched, so the next call tries again.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Load the config file and start watching it.
    pub fn load(path: PathBuf) -> Result<(MonitorConfig, Self), ConfigError> {
        let config = MonitorConfig::load(&path)?;
        let last_modified = modified(&path);
        Ok((
            config,
            Self {
                path,
                last_modified,
            },
        ))
    }

    /// Reload the config if the file changed since the last successful
    /// load. Returns `None` when the file is unchanged, unreadable or
    /// invalid.
    pub fn maybe_reload(&mut self) -> Option<MonitorConfig> {
        let current = modified(&self.path)?;
        if Some(current) == self.last_modified {
            return None;
        }

        match MonitorConfig::load(&self.path) {
            Ok(config) => {
                self.last_modified = Some(current);
                info!(path = %self.path.display(), "Reloaded config");
                Some(config)
            }
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    %error,
                    "Config changed but failed to load, keeping previous"
                );
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "argus-watcher-{name}-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn should_not_reload_an_unchanged_file() {
        let path = temp_config("unchanged", "{}");
        let (_, mut watcher) = ConfigWatcher::load(path.clone()).unwrap();

        assert!(watcher.maybe_reload().is_none());
        assert!(watcher.maybe_reload().is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn should_reload_when_the_mtime_changes() {
        let path = temp_config("changed", "{}");
        let (config, mut watcher) = ConfigWatcher::load(path.clone()).unwrap();
        assert_eq!(config.interval_seconds, 120);

        std::fs::write(&path, r#"{"interval_seconds": 300}"#).unwrap();
        set_mtime(&path, SystemTime::now() + Duration::from_secs(5));

        let reloaded = watcher.maybe_reload().unwrap();
        assert_eq!(reloaded.interval_seconds, 300);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn should_retry_after_a_failed_reload() {
        let path = temp_config("retry", "{}");
        let (_, mut watcher) = ConfigWatcher::load(path.clone()).unwrap();

        // Both writes carry the same mtime. The malformed one must not
        // mark that mtime as seen, or the fix would be missed.
        let bumped = SystemTime::now() + Duration::from_secs(5);
        std::fs::write(&path, "not json").unwrap();
        set_mtime(&path, bumped);
        assert!(watcher.maybe_reload().is_none());

        std::fs::write(&path, r#"{"interval_seconds": 60}"#).unwrap();
        set_mtime(&path, bumped);
        let reloaded = watcher.maybe_reload().unwrap();
        assert_eq!(reloaded.interval_seconds, 60);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn should_keep_the_previous_config_when_the_file_disappears() {
        let path = temp_config("missing", "{}");
        let (_, mut watcher) = ConfigWatcher::load(path.clone()).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(watcher.maybe_reload().is_none());
    }

    #[test]
    fn should_reject_an_invalid_reload_and_keep_watching() {
        let path = temp_config("invalid", "{}");
        let (_, mut watcher) = ConfigWatcher::load(path.clone()).unwrap();

        std::fs::write(&path, r#"{"interval_seconds": 0}"#).unwrap();
        set_mtime(&path, SystemTime::now() + Duration::from_secs(5));
        assert!(watcher.maybe_reload().is_none());

        std::fs::write(&path, r#"{"interval_seconds": 90}"#).unwrap();
        set_mtime(&path, SystemTime::now() + Duration::from_secs(10));
        let reloaded = watcher.maybe_reload().unwrap();
        assert_eq!(reloaded.interval_seconds, 90);

        let _ = std::fs::remove_file(&path);
    }
}
