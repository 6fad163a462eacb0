//! Pulse Controller
//!
//! Attaches a simulated pulse device, plays a pulse program through it and
//! reports how the run went.

use pulse_engine::{
    ConsumerStats, ConsumerThread, DeviceConfig, DeviceError, FeedReport, Parked, Polled,
    PulseDevice, SimulatedHardware,
};
use pulse_ring::{Cell, RingSnapshot, Status};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Controller errors
#[derive(Debug, Error)]
pub enum CtlError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cannot read program {path}: {source}")]
    ProgramFile {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid program: {0}")]
    Program(#[from] serde_json::Error),

    #[error("Program contains no cells")]
    EmptyProgram,

    #[error("Logging setup failed: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// How the consumer thread waits for expiries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Polled,
    #[default]
    Parked,
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CtlConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Simulated timer rate (default: 1 MHz)
    pub tick_rate_hz: u64,
    /// Cells to play; the program repeats until this many are queued
    pub cell_count: usize,
    /// JSON array of cells; `None` plays the built-in square wave
    pub program: Option<String>,
    /// Half-period of the built-in square wave, in cell delay units
    pub base_delay: usize,
    /// Consumer wait strategy
    pub trigger: TriggerMode,
    /// Sleep slice for the parked trigger, in microseconds
    pub park_slice_us: u64,
    /// Producer poll period in milliseconds
    pub pace_ms: u64,
    /// Fill level the producer keeps; `None` keeps the ring full
    pub high_water: Option<usize>,
    /// Device settings
    pub device: DeviceConfig,
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tick_rate_hz: 1_000_000,
            cell_count: 1000,
            program: None,
            base_delay: 1000,
            trigger: TriggerMode::Parked,
            park_slice_us: 50,
            pace_ms: 5,
            high_water: None,
            device: DeviceConfig::default(),
        }
    }
}

impl CtlConfig {
    /// Load from an optional file, then `PULSE_CTL_*` environment overrides.
    ///
    /// Nested device settings use a double underscore, e.g.
    /// `PULSE_CTL_DEVICE__CAPACITY=32`.
    pub fn load(path: Option<&str>) -> Result<Self, CtlError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config: CtlConfig = builder
            .add_source(
                config::Environment::with_prefix("PULSE_CTL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.device.validate()?;
        Ok(config)
    }

    fn parked_trigger(&self) -> Parked {
        Parked {
            slice: Duration::from_micros(self.park_slice_us.max(1)),
        }
    }
}

/// Initialize logging at `level`, falling back to info for unknown names
pub fn init_logging(level: &str) -> Result<(), CtlError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Parse a JSON array of cells
pub fn parse_program(json: &str) -> Result<Vec<Cell>, CtlError> {
    let cells: Vec<Cell> = serde_json::from_str(json)?;
    if cells.is_empty() {
        return Err(CtlError::EmptyProgram);
    }
    Ok(cells)
}

pub fn load_program(path: impl AsRef<Path>) -> Result<Vec<Cell>, CtlError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| CtlError::ProgramFile {
        path: path.display().to_string(),
        source,
    })?;
    let cells = parse_program(&json)?;
    info!("Loaded {} cells from {}", cells.len(), path.display());
    Ok(cells)
}

/// Square wave on output 0 with a 1:2 duty cycle
pub fn default_program(base_delay: usize) -> Vec<Cell> {
    (0..2)
        .map(|i| {
            let delay = ((i % 2) + 1) * base_delay;
            if i % 2 == 0 {
                Cell::set(delay, 1)
            } else {
                Cell::clear(delay, 1)
            }
        })
        .collect()
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every cell was played
    Completed,
    /// The engine ran dry before the program ended
    Starved { unsent: usize },
    /// The engine left RUNNING for another reason, e.g. a stop from elsewhere
    Interrupted { status: Status },
}

/// Summary printed at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub cells: usize,
    pub primed: usize,
    pub feed: FeedReport,
    pub consumer: ConsumerStats,
    pub ring: RingSnapshot,
    pub outputs: u32,
    pub elapsed_ms: u64,
}

/// Play the configured program on a simulated device
pub async fn run(config: &CtlConfig) -> Result<RunReport, CtlError> {
    let program = match &config.program {
        Some(path) => load_program(path)?,
        None => default_program(config.base_delay),
    };
    let cells: Vec<Cell> = program
        .iter()
        .copied()
        .cycle()
        .take(config.cell_count)
        .collect();

    let hardware = Arc::new(SimulatedHardware::new(config.tick_rate_hz));
    let device = PulseDevice::attach(config.device.clone(), Arc::clone(&hardware))?;
    let (mut producer, engine) = device.split();
    let consumer = match config.trigger {
        TriggerMode::Polled => ConsumerThread::spawn(engine, Polled)?,
        TriggerMode::Parked => ConsumerThread::spawn(engine, config.parked_trigger())?,
    };

    let pace = Duration::from_millis(config.pace_ms);
    let high_water = config.high_water.unwrap_or_else(|| producer.capacity());
    let started = Instant::now();

    let mut source = cells.iter().copied();
    let primed = producer.prime(&mut source)?;
    producer.start()?;

    let feed = producer.feed(source, high_water, pace).await?;
    let outcome = match feed.interrupted {
        None => {
            producer.drain(pace).await;
            RunOutcome::Completed
        }
        Some(Status::Underrun) => {
            let unsent = cells.len() - primed - feed.pushed;
            warn!("Engine starved with {} cells still to send", unsent);
            RunOutcome::Starved { unsent }
        }
        Some(status) => RunOutcome::Interrupted { status },
    };

    let consumer = consumer.shutdown();
    let ring = producer.snapshot();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if ring.status != Status::Running {
        producer.reset()?;
    }

    info!(
        "Run finished in {} ms: {} cells applied, {} underruns",
        elapsed_ms, consumer.applied, consumer.underruns
    );

    Ok(RunReport {
        outcome,
        cells: cells.len(),
        primed,
        feed,
        consumer,
        ring,
        outputs: hardware.outputs(),
        elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CtlConfig::default();
        assert_eq!(config.trigger, TriggerMode::Parked);
        assert_eq!(config.tick_rate_hz, 1_000_000);
        assert!(config.device.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let config: CtlConfig = serde_json::from_str(
            r#"{
                "trigger": "polled",
                "cell_count": 10,
                "device": { "capacity": 16 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.trigger, TriggerMode::Polled);
        assert_eq!(config.cell_count, 10);
        assert_eq!(config.device.capacity, Some(16));
        assert_eq!(config.device.initial_ticks, 1000);
        assert_eq!(config.pace_ms, 5);
    }

    #[test]
    fn test_second_logging_install_is_reported() {
        let _ = init_logging("debug");
        assert!(matches!(init_logging("info"), Err(CtlError::Logging(_))));
    }

    #[test]
    fn test_default_program_alternates() {
        let program = default_program(1000);
        assert_eq!(program, vec![Cell::set(1000, 1), Cell::clear(2000, 1)]);
    }

    #[test]
    fn test_parse_program() {
        let cells = parse_program(
            r#"[
                { "delay": 500, "set_mask": 1 },
                { "delay": 250, "clear_mask": 1, "set_mask": 2 }
            ]"#,
        )
        .unwrap();
        assert_eq!(cells, vec![Cell::set(500, 1), Cell::new(250, 1, 2)]);

        assert!(matches!(parse_program("[]"), Err(CtlError::EmptyProgram)));
        assert!(matches!(parse_program("{"), Err(CtlError::Program(_))));
    }

    #[test]
    fn test_missing_program_file() {
        let err = load_program("/nonexistent/pulse-program.json").unwrap_err();
        assert!(matches!(err, CtlError::ProgramFile { .. }));
    }

    #[test]
    fn test_program_file_round_trip() {
        let path = std::env::temp_dir().join(format!("pulse-ctl-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{ "delay": 40, "set_mask": 4 }]"#).unwrap();
        let cells = load_program(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cells, vec![Cell::set(40, 4)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_plays_whole_program() {
        let config = CtlConfig {
            cell_count: 40,
            base_delay: 500,
            pace_ms: 1,
            device: DeviceConfig {
                capacity: Some(32),
                initial_ticks: 50,
                ..Default::default()
            },
            ..Default::default()
        };

        let report = run(&config).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.cells, 40);
        assert_eq!(report.primed, 16);
        assert_eq!(report.primed + report.feed.pushed, 40);
        assert_eq!(report.feed.interrupted, None);
        assert_eq!(report.consumer.applied, 40);
        assert_eq!(report.ring.status, Status::Underrun);
        // Last cell of each period clears output 0
        assert_eq!(report.outputs, 0);
    }
}
