use anyhow::{Context, Result};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    error::ConfigError,
    hooks::HookBundle,
    models::{
        calibration, ActiveHours, BreakConfig, BreakKind, CalibrationMeasurement, MarginPercents,
    },
};

pub const MIN_SAMPLING_INTERVAL_MS: u64 = 100;
pub const MAX_SAMPLING_INTERVAL_MS: u64 = 5_000;

/// Frame reads per sampling cycle before the cycle is abandoned.
pub const CAPTURE_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostureSettings {
    pub sampling_interval_ms: u64,
    pub margins: MarginPercents,
    /// Closer than this counts as too close once calibrated.
    pub min_distance_cm: f64,
    /// Report every Nth accepted sample while posture is bad.
    pub callback_every: u32,
    pub no_face_threshold: u32,
    pub multi_face_threshold: u32,
    pub calibrations: Vec<CalibrationMeasurement>,
    pub hooks: HookBundle,
}

impl Default for PostureSettings {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 1_000,
            margins: MarginPercents::default(),
            min_distance_cm: 50.0,
            callback_every: 2,
            no_face_threshold: 20,
            multi_face_threshold: 5,
            calibrations: Vec::new(),
            hooks: HookBundle::default(),
        }
    }
}

impl PostureSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SAMPLING_INTERVAL_MS..=MAX_SAMPLING_INTERVAL_MS)
            .contains(&self.sampling_interval_ms)
        {
            return Err(ConfigError::SamplingInterval {
                value_ms: self.sampling_interval_ms,
                min_ms: MIN_SAMPLING_INTERVAL_MS,
                max_ms: MAX_SAMPLING_INTERVAL_MS,
            });
        }
        self.margins.validate()?;
        if !(self.min_distance_cm.is_finite() && self.min_distance_cm > 0.0) {
            return Err(ConfigError::NonPositive("minimum distance"));
        }
        for (name, value) in [
            ("callback cadence", self.callback_every),
            ("no-face threshold", self.no_face_threshold),
            ("multi-face threshold", self.multi_face_threshold),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCount(name));
            }
        }
        Ok(())
    }

    /// Mean focal length over all calibrations; `None` while uncalibrated.
    pub fn focal_length(&self) -> Option<f64> {
        calibration::mean_focal_length(&self.calibrations)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub breaks: BTreeMap<BreakKind, BreakConfig>,
    pub active_hours: ActiveHours,
    pub posture: PostureSettings,
}

impl Default for Preferences {
    fn default() -> Self {
        Self::with_breaks(BreakKind::default_config)
    }
}

impl Preferences {
    /// Short work durations for trying the app out by hand.
    pub fn debug() -> Self {
        Self::with_breaks(BreakKind::debug_config)
    }

    fn with_breaks(config_for: fn(&BreakKind) -> BreakConfig) -> Self {
        Self {
            breaks: BreakKind::ALL
                .iter()
                .map(|kind| (*kind, config_for(kind)))
                .collect(),
            active_hours: ActiveHours::default(),
            posture: PostureSettings::default(),
        }
    }

    pub fn break_config(&self, kind: BreakKind) -> BreakConfig {
        self.breaks
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_config())
    }

    /// Fills in categories missing from an older or hand-edited file and
    /// swaps every section that fails validation for its `defaults`
    /// counterpart. Calibrations survive a posture reset.
    fn repaired(mut self, defaults: &Preferences) -> Self {
        for kind in BreakKind::ALL {
            let valid = match self.breaks.get(&kind).map(|config| config.validate(kind)) {
                Some(Ok(())) => true,
                Some(Err(err)) => {
                    warn!("{err}; using default {kind} settings");
                    false
                }
                None => false,
            };
            if !valid {
                self.breaks.insert(kind, defaults.break_config(kind));
            }
        }

        if let Err(err) = self.active_hours.validate() {
            warn!("{err}; using default active hours");
            self.active_hours = defaults.active_hours.clone();
        }

        if let Err(err) = self.posture.validate() {
            warn!("{err}; using default posture settings");
            let calibrations = std::mem::take(&mut self.posture.calibrations);
            self.posture = PostureSettings {
                calibrations,
                ..defaults.posture.clone()
            };
        }
        self
    }
}

/// JSON-file backed preferences. Edits are validated before they are
/// applied; a failed write is logged and the in-memory value still wins.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Preferences>,
}

impl SettingsStore {
    /// Never fails: a missing or unreadable file yields `defaults`, and any
    /// invalid section of a readable one is replaced from `defaults`.
    pub fn new(path: PathBuf, defaults: Preferences) -> Self {
        let data = match Self::load(&path) {
            Ok(Some(prefs)) => prefs.repaired(&defaults),
            Ok(None) => defaults,
            Err(err) => {
                warn!("using default preferences: {err:#}");
                defaults
            }
        };

        Self {
            path,
            data: RwLock::new(data),
        }
    }

    fn load(path: &Path) -> Result<Option<Preferences>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let prefs = serde_json::from_str(&contents)
            .with_context(|| format!("Corrupt settings file {}", path.display()))?;
        Ok(Some(prefs))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preferences(&self) -> Preferences {
        self.read().clone()
    }

    pub fn break_config(&self, kind: BreakKind) -> BreakConfig {
        self.read().break_config(kind)
    }

    pub fn active_hours(&self) -> ActiveHours {
        self.read().active_hours.clone()
    }

    pub fn posture(&self) -> PostureSettings {
        self.read().posture.clone()
    }

    pub fn update_break_config(&self, kind: BreakKind, config: BreakConfig) -> Result<(), ConfigError> {
        config.validate(kind)?;
        let mut guard = self.write();
        guard.breaks.insert(kind, config);
        self.persist_logged(&guard);
        Ok(())
    }

    pub fn update_active_hours(&self, hours: ActiveHours) -> Result<(), ConfigError> {
        hours.validate()?;
        let mut guard = self.write();
        guard.active_hours = hours;
        self.persist_logged(&guard);
        Ok(())
    }

    pub fn update_posture(&self, posture: PostureSettings) -> Result<(), ConfigError> {
        posture.validate()?;
        let mut guard = self.write();
        guard.posture = posture;
        self.persist_logged(&guard);
        Ok(())
    }

    pub fn add_calibration(&self, measurement: CalibrationMeasurement) {
        let mut guard = self.write();
        guard.posture.calibrations.push(measurement);
        self.persist_logged(&guard);
    }

    pub fn clear_calibrations(&self) {
        let mut guard = self.write();
        guard.posture.calibrations.clear();
        self.persist_logged(&guard);
    }

    fn persist_logged(&self, data: &Preferences) {
        if let Err(err) = self.persist(data) {
            error!("failed to save preferences: {err:#}");
        }
    }

    fn persist(&self, data: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, Preferences> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Preferences> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::models::TimeSpan;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join("restwise/settings.json"), Preferences::default())
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.preferences(), Preferences::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path, Preferences::debug());
        assert_eq!(store.preferences(), Preferences::debug());
    }

    #[test]
    fn accepted_edits_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut micro = store.break_config(BreakKind::Micro);
        micro.work = TimeSpan::from_minutes(15);
        store.update_break_config(BreakKind::Micro, micro.clone()).unwrap();
        store.add_calibration(CalibrationMeasurement::from_detection(60.0, 120.0, Utc::now()).unwrap());

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.break_config(BreakKind::Micro), micro);
        assert_eq!(reloaded.posture().calibrations.len(), 1);
        assert_eq!(reloaded.posture().focal_length(), Some(450.0));
    }

    #[test]
    fn rejected_edits_are_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let backwards = ActiveHours {
            enabled: true,
            start: TimeSpan::from_minutes(18 * 60),
            end: TimeSpan::from_minutes(9 * 60),
            ..ActiveHours::default()
        };
        assert!(matches!(
            store.update_active_hours(backwards),
            Err(ConfigError::ActiveHoursOrder { .. })
        ));

        let mut posture = store.posture();
        posture.sampling_interval_ms = 10;
        assert!(store.update_posture(posture).is_err());

        assert!(!store.path().exists());
        assert_eq!(store.preferences(), Preferences::default());
    }

    #[test]
    fn partial_file_is_completed_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "posture": { "callbackEvery": 4 } }"#).unwrap();

        let store = SettingsStore::new(path, Preferences::default());
        assert_eq!(store.posture().callback_every, 4);
        assert_eq!(store.posture().no_face_threshold, 20);
        assert_eq!(
            store.break_config(BreakKind::Stretch),
            BreakKind::Stretch.default_config()
        );
    }

    #[test]
    fn invalid_sections_on_disk_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut on_disk = Preferences::default();
        let micro = on_disk.breaks.get_mut(&BreakKind::Micro).unwrap();
        micro.work = TimeSpan::ZERO;
        micro.break_duration = None;
        let stretch = on_disk.breaks.get_mut(&BreakKind::Stretch).unwrap();
        stretch.work = TimeSpan::from_minutes(35);
        on_disk.active_hours = ActiveHours {
            enabled: true,
            start: TimeSpan::from_minutes(18 * 60),
            end: TimeSpan::from_minutes(9 * 60),
            ..ActiveHours::default()
        };
        on_disk.posture.sampling_interval_ms = 0;
        on_disk.posture.calibrations =
            vec![CalibrationMeasurement::from_detection(60.0, 120.0, Utc::now()).unwrap()];
        fs::write(&path, serde_json::to_string(&on_disk).unwrap()).unwrap();

        let store = SettingsStore::new(path, Preferences::default());
        assert_eq!(store.break_config(BreakKind::Micro), BreakKind::Micro.default_config());
        assert_eq!(store.break_config(BreakKind::Stretch).work, TimeSpan::from_minutes(35));
        assert_eq!(store.active_hours(), ActiveHours::default());

        let posture = store.posture();
        assert_eq!(posture.sampling_interval_ms, 1_000);
        assert_eq!(posture.calibrations, on_disk.posture.calibrations);
        for kind in BreakKind::ALL {
            assert_eq!(store.break_config(kind).validate(kind), Ok(()));
        }
        assert_eq!(posture.validate(), Ok(()));
    }

    #[test]
    fn uncalibrated_settings_have_no_focal_length() {
        assert_eq!(PostureSettings::default().focal_length(), None);
    }

    #[test]
    fn posture_counts_must_be_positive() {
        let settings = PostureSettings {
            callback_every: 0,
            ..PostureSettings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::ZeroCount("callback cadence"))
        );
    }
}
