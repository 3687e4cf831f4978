//! TC66C bridge - polls a USB power meter over BLE and publishes to MQTT.
//!
//! Run with: `cargo run -p tc66-bridge -- <DEVICE> <BROKER>`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tc66_bridge::{BridgeOptions, Config, MqttBus, Orchestrator, signal};
use tc66_core::{ConnectionConfig, Device};

/// Publish TC66C measurements to an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "tc66-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Bluetooth address of the meter (overrides config).
    device: Option<String>,

    /// MQTT broker, e.g. `tcp://localhost:1883` (overrides config).
    broker: Option<String>,

    /// Poll interval in milliseconds; 0 polls back to back.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Log verbosity. Defaults to `RUST_LOG`, then `info`.
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Topic segment identifying the meter.
    #[arg(short = 'a', long)]
    device_alias: Option<String>,

    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep polling after a cycle times out or returns a malformed frame.
    #[arg(long)]
    skip_failed_cycles: bool,

    /// Poll once, publish, and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.log_level);

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    apply_overrides(&mut config, &args);

    let options = BridgeOptions::from_config(&config)?;
    let cancel = CancellationToken::new();
    signal::install(cancel.clone())?;

    info!(
        "Bridging {} to {} as {}/{}",
        options.device, config.mqtt.broker, options.namespace, options.alias
    );

    let connection = ConnectionConfig::default()
        .connection_timeout(config.device.connect_timeout())
        .discovery_timeout(config.device.discovery_timeout())
        .operation_timeout(config.polling.operation_timeout());
    let client_id = config.client_id();

    let orchestrator = Orchestrator::new(options, cancel.clone());
    let report = orchestrator
        .run(
            Device::connect(&config.device.address, connection, &cancel),
            MqttBus::connect(&config.mqtt, &client_id, &cancel),
        )
        .await;

    Ok(report.status().into())
}

fn init_logging(level: Option<LogLevel>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!(
            "warn,tc66_bridge={0},tc66_core={0}",
            level.as_str()
        )),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,tc66_bridge=info,tc66_core=info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(device) = &args.device {
        config.device.address = device.clone();
    }
    if let Some(broker) = &args.broker {
        config.mqtt.broker = broker.clone();
    }
    if let Some(interval) = args.interval {
        config.polling.interval_ms = interval;
    }
    if let Some(alias) = &args.device_alias {
        config.device.alias = Some(alias.clone());
    }
    if args.skip_failed_cycles {
        config.polling.skip_failed_cycles = true;
    }
    if args.once {
        config.polling.max_cycles = Some(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_are_well_formed() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_positional_arguments() {
        let args = Args::parse_from(["tc66-bridge", "AA:BB:CC:DD:EE:FF", "localhost:1884"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.mqtt.broker, "localhost:1884");
        assert_eq!(config.polling.interval_ms, 2000);
        assert!(config.polling.max_cycles.is_none());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "tc66-bridge",
            "AA:BB:CC:DD:EE:FF",
            "localhost",
            "--interval",
            "0",
            "--log-level",
            "debug",
            "--device-alias",
            "Desk Meter",
            "--skip-failed-cycles",
            "--once",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.polling.interval_ms, 0);
        assert_eq!(config.alias(), "Desk_Meter");
        assert!(config.polling.skip_failed_cycles);
        assert_eq!(config.polling.max_cycles, Some(1));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        assert!(Args::try_parse_from(["tc66-bridge", "--log-level", "trace"]).is_err());
    }
}
