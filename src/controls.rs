//! The one edit path for user settings. An accepted edit is validated,
//! persisted and applied to the running scheduler and posture loop before
//! the call returns; a rejected one touches neither.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::{
    breaks::BreakScheduler,
    error::ConfigError,
    models::{ActiveHours, BreakConfig, BreakKind, CalibrationMeasurement},
    posture::PostureLoopManager,
    settings::{PostureSettings, SettingsStore},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub struct Controls {
    settings: Arc<SettingsStore>,
    scheduler: BreakScheduler,
    posture: Option<PostureLoopManager>,
}

impl Controls {
    pub fn new(settings: Arc<SettingsStore>, scheduler: BreakScheduler) -> Self {
        Self {
            settings,
            scheduler,
            posture: None,
        }
    }

    pub fn with_posture(mut self, manager: PostureLoopManager) -> Self {
        self.posture = Some(manager);
        self
    }

    pub fn scheduler(&self) -> &BreakScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn posture(&self) -> Option<&PostureLoopManager> {
        self.posture.as_ref()
    }

    /// Toggles a category without disturbing the timing of the others.
    pub fn set_enabled(&self, kind: BreakKind, enabled: bool) -> Result<(), ConfigError> {
        let mut config = self.settings.break_config(kind);
        config.enabled = enabled;
        self.settings.update_break_config(kind, config)?;
        self.scheduler.set_enabled(kind, enabled);
        Ok(())
    }

    /// Restarts the category's timing; a showing notification for it is
    /// cancelled.
    pub fn update_break_config(&self, kind: BreakKind, config: BreakConfig) -> Result<(), ConfigError> {
        self.settings.update_break_config(kind, config.clone())?;
        self.scheduler.update_schedule(kind, config)
    }

    pub fn set_active_hours(&self, hours: ActiveHours) -> Result<(), ConfigError> {
        self.settings.update_active_hours(hours.clone())?;
        self.scheduler.set_active_hours(hours)
    }

    pub async fn update_posture(&self, posture: PostureSettings) -> Result<(), ConfigError> {
        self.settings.update_posture(posture.clone())?;
        if let Some(manager) = &self.posture {
            manager.apply_settings(&posture).await?;
        }
        Ok(())
    }

    pub async fn start_posture(&self) -> Result<()> {
        self.manager()?.start(&self.settings.posture()).await
    }

    pub async fn stop_posture(&self) -> Result<()> {
        self.manager()?.stop(true).await
    }

    /// Measures, stores and applies a calibration in one step.
    pub async fn calibrate(&self, known_distance_cm: f64) -> Result<CalibrationMeasurement> {
        let manager = self.manager()?;
        let measurement = manager.calibrate(known_distance_cm).await?;
        self.settings.add_calibration(measurement.clone());
        manager.apply_settings(&self.settings.posture()).await?;
        Ok(measurement)
    }

    pub async fn clear_calibrations(&self) -> Result<(), ConfigError> {
        self.settings.clear_calibrations();
        if let Some(manager) = &self.posture {
            manager.apply_settings(&self.settings.posture()).await?;
        }
        Ok(())
    }

    /// Stops the posture loop and the scheduler.
    pub async fn shutdown(&self) {
        if let Some(manager) = &self.posture {
            if let Err(err) = manager.stop(true).await {
                log_warn!("failed to stop posture loop: {err:#}");
            }
        }
        self.scheduler.shutdown().await;
    }

    fn manager(&self) -> Result<&PostureLoopManager> {
        self.posture
            .as_ref()
            .ok_or_else(|| anyhow!("posture monitoring needs a camera and face detector"))
    }
}
