//! Startup configuration.
//!
//! Values come from the built-in defaults, then an optional JSON file, then the
//! `HOST` and `PORT` environment variables. Nothing changes after startup.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    scheduler::{Limits, SchedulerConfig},
    solver::SolverParams,
};

/// Environment variable naming the config file when no path is passed on the command line.
pub const CONFIG_ENV: &str = "TOMOGRAPH_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    pub workers: usize,
    pub queue_capacity: usize,
    /// CPU ceiling in percent.
    pub cpu_limit: f64,
    /// Memory ceiling in percent.
    pub mem_limit: f64,
    pub max_defer_secs: f64,
    pub max_requeues: Option<u32>,
    pub sample_window_ms: u64,

    pub max_iterations: usize,
    pub tolerance: f64,
    pub min_iterations: usize,
    pub epsilon: f64,

    pub signal_root: PathBuf,
    pub signal_extension: String,
    pub history_path: PathBuf,

    pub telemetry_path: Option<PathBuf>,
    pub telemetry_interval_ms: u64,

    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let solver = SolverParams::default();

        Self {
            host: "0.0.0.0".into(),
            port: 7776,
            workers: 4,
            queue_capacity: 100,
            cpu_limit: 90.0,
            mem_limit: 90.0,
            max_defer_secs: 1.0,
            max_requeues: None,
            sample_window_ms: 500,
            max_iterations: solver.max_iterations,
            tolerance: solver.tolerance,
            min_iterations: solver.min_iterations,
            epsilon: solver.epsilon,
            signal_root: PathBuf::from("."),
            signal_extension: "csv".into(),
            history_path: PathBuf::from("teste.json"),
            telemetry_path: None,
            telemetry_interval_ms: 500,
            max_frame_len: 1_000_000,
        }
    }
}

impl ServerConfig {
    /// Loads the configuration the server starts with.
    ///
    /// # Arguments
    /// * `path` - A JSON file to read. When `None`, the file named by `TOMOGRAPH_CONFIG`
    ///   is read if that variable is set, otherwise the defaults are used.
    ///
    /// # Returns
    /// The validated configuration, with `HOST`/`PORT` applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = env::var_os(CONFIG_ENV).map(PathBuf::from);

        let mut cfg = match path.or(from_env.as_deref()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        cfg.apply_env(|var| env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The defaults with `HOST`/`PORT` applied, ignoring any config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env(|var| env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var: "PORT", value: port })?;
        }

        Ok(())
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }

        for (name, limit) in [("cpu_limit", self.cpu_limit), ("mem_limit", self.mem_limit)] {
            if !(limit > 0.0 && limit <= 100.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in (0, 100], got {limit}"
                )));
            }
        }

        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid("max_iterations must be at least 1".into()));
        }

        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }

        if !(self.max_defer_secs >= 0.0 && self.max_defer_secs.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "max_defer_secs must be a non-negative number of seconds, got {}",
                self.max_defer_secs
            )));
        }

        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid("max_frame_len must be at least 1".into()));
        }

        Ok(())
    }

    /// The `host:port` pair to listen on.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn solver_params(&self) -> SolverParams {
        SolverParams {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            min_iterations: self.min_iterations,
            epsilon: self.epsilon,
        }
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_window_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            limits: Limits {
                cpu: self.cpu_limit,
                mem: self.mem_limit,
            },
            max_defer: Duration::from_secs_f64(self.max_defer_secs),
            max_requeues: self.max_requeues,
            sample_retry: self.sample_window(),
        }
    }
}
