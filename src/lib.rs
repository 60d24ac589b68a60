pub mod breaks;
pub mod clock;
pub mod console;
pub mod controls;
pub mod db;
pub mod error;
pub mod hooks;
pub mod models;
pub mod posture;
pub mod settings;
pub mod ui;
mod utils;

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};

use breaks::BreakScheduler;
use clock::SystemClock;
use controls::Controls;
use db::Database;
use hooks::CommandHookRunner;
use posture::{Camera, FaceDetector, PostureLoopManager};
use settings::{Preferences, SettingsStore};
use ui::UiBridge;

const APP_DIR: &str = "restwise";

/// Explicit settings file location, overriding the platform config dir.
pub const CONFIG_ENV: &str = "RESTWISE_CONFIG";
/// `1` switches the defaults to second-scale work durations.
pub const DEBUG_ENV: &str = "RESTWISE_DEBUG";

fn debug_mode() -> bool {
    env::var(DEBUG_ENV).is_ok_and(|value| value == "1")
}

fn settings_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let config_dir = dirs::config_dir().ok_or_else(|| anyhow!("no config directory on this platform"))?;
    Ok(config_dir.join(APP_DIR).join("settings.json"))
}

fn open_history() -> Result<Database> {
    let data_dir = dirs::data_dir().ok_or_else(|| anyhow!("no data directory on this platform"))?;
    let app_dir = data_dir.join(APP_DIR);
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("failed to create {}", app_dir.display()))?;
    Database::new(app_dir.join("history.sqlite3"))
}

/// Camera and face detector for the posture loop. Detection is not part of
/// this crate, so a binary that has one hands it to [`run_with`].
pub struct PostureDevice {
    pub camera: Box<dyn Camera>,
    pub detector: Arc<dyn FaceDetector>,
}

async fn run_app(device: Option<PostureDevice>) -> Result<()> {
    let defaults = if debug_mode() {
        info!("debug durations enabled");
        Preferences::debug()
    } else {
        Preferences::default()
    };
    let settings = Arc::new(SettingsStore::new(settings_path()?, defaults));
    let prefs = settings.preferences();

    let history = match open_history() {
        Ok(db) => Some(db),
        Err(err) => {
            warn!("break history disabled: {err:#}");
            None
        }
    };

    let (ui, events) = UiBridge::new();
    let hooks = Arc::new(CommandHookRunner::new());
    let mut scheduler = BreakScheduler::new(
        &prefs.breaks,
        prefs.active_hours,
        Arc::new(SystemClock),
        ui.clone(),
        hooks.clone(),
    );
    if let Some(db) = &history {
        scheduler = scheduler.with_history(db.clone());
    }
    scheduler.start();

    let mut controls = Controls::new(settings, scheduler);
    if let Some(device) = device {
        let manager = PostureLoopManager::new(device.camera, device.detector, hooks, ui);
        controls = controls.with_posture(manager);
        if let Err(err) = controls.start_posture().await {
            warn!("posture monitoring not started: {err:#}");
        }
    } else {
        info!("no face detector configured; posture monitoring off");
    }

    let result = console::run(&controls, events, history).await;
    controls.shutdown().await;
    result
}

pub fn run() {
    run_with(None)
}

/// Runs the app, with posture monitoring when `device` is given.
pub fn run_with(device: Option<PostureDevice>) {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Restwise starting up...");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run_app(device)) {
        error!("Restwise stopped: {err:#}");
        std::process::exit(1);
    }
}
