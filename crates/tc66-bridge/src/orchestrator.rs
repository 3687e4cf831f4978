//! The poll loop.
//!
//! [`Orchestrator::run`] owns one bridge run from start to finish:
//!
//! 1. connect to the meter, then to the broker
//! 2. resolve the meter's characteristics
//! 3. poll until cancelled, a fatal error occurs or the cycle limit is hit
//! 4. shut down: wait for the last publish, disconnect the bus, disconnect
//!    the meter
//!
//! Every fatal condition takes the same shutdown path and the first one
//! determines the [`RunReport`]'s error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tc66_core::{GattLink, RequestOptions, Session, codec, request_measurement, resolve};

use crate::bus::{MessageBus, PublishError, messages_for};
use crate::config::Config;
use crate::cycle::{PollCycle, WaitPlan, next_wait};
use crate::error::{BridgeError, ExitStatus};
use crate::scheduler::PublishScheduler;

/// Settings for one bridge run.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOptions {
    /// Meter address, used in log messages.
    pub device: String,
    /// First topic segment.
    pub namespace: String,
    /// Second topic segment.
    pub alias: String,
    /// Target cycle length; zero polls back to back.
    pub interval: Duration,
    /// Timeouts for each measurement request.
    pub request: RequestOptions,
    /// Time allowed for characteristic resolution.
    pub resolve_timeout: Duration,
    /// Time allowed for each publish.
    pub publish_timeout: Duration,
    /// Time allowed for each disconnect during shutdown.
    pub shutdown_timeout: Duration,
    /// Keep polling after a response timeout or framing error.
    pub skip_failed_cycles: bool,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl BridgeOptions {
    /// Options with default timings.
    pub fn new(device: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            namespace: "tc66c".to_string(),
            alias: alias.into(),
            interval: Duration::from_millis(2000),
            request: RequestOptions::default(),
            resolve_timeout: Duration::from_secs(15),
            publish_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            skip_failed_cycles: false,
            max_cycles: None,
        }
    }

    /// Validate `config` and derive run options from it.
    pub fn from_config(config: &Config) -> Result<Self, BridgeError> {
        config.validate()?;

        Ok(Self {
            device: config.device.address.clone(),
            namespace: config.mqtt.namespace.clone(),
            alias: config.alias(),
            interval: config.polling.interval(),
            request: RequestOptions::default()
                .response_timeout(config.polling.response_timeout())
                .operation_timeout(config.polling.operation_timeout()),
            resolve_timeout: config.device.discovery_timeout(),
            publish_timeout: config.mqtt.publish_timeout(),
            shutdown_timeout: config.polling.operation_timeout(),
            skip_failed_cycles: config.polling.skip_failed_cycles,
            max_cycles: config.polling.max_cycles,
        })
    }
}

/// Outcome of a bridge run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Cycles started.
    pub cycles: u64,
    /// Cycles that failed and were skipped.
    pub failed_cycles: u64,
    /// Batches handed to the bus.
    pub batches: u64,
    /// The first fatal condition, if any.
    pub error: Option<BridgeError>,
}

impl RunReport {
    /// Exit status for the process.
    pub fn status(&self) -> ExitStatus {
        if self.error.is_some() {
            ExitStatus::Failure
        } else {
            ExitStatus::Success
        }
    }

    fn fail(&mut self, error: impl Into<BridgeError>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }
}

/// Runs the bridge.
pub struct Orchestrator {
    options: BridgeOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator. `cancel` stops the run gracefully.
    pub fn new(options: BridgeOptions, cancel: CancellationToken) -> Self {
        Self { options, cancel }
    }

    /// Settings this orchestrator runs with.
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Run the bridge to completion.
    ///
    /// `device` and `bus` are the connection futures for the meter and the
    /// broker. They are awaited in that order, each raced against
    /// cancellation. A stop request before polling has started counts as a
    /// failure, since the meter never became available.
    pub async fn run<L, B, D, C>(&self, device: D, bus: C) -> RunReport
    where
        L: GattLink,
        B: MessageBus + 'static,
        D: Future<Output = tc66_core::Result<L>>,
        C: Future<Output = Result<B, PublishError>>,
    {
        let mut report = RunReport::default();

        let link = match self.until_cancelled(device, tc66_core::Error::Cancelled).await {
            Ok(link) => link,
            Err(e) => {
                self.report_startup_failure(e.into(), &mut report);
                info!(
                    "Starting graceful exit with status code {}",
                    report.status().code()
                );
                return self.finish(report);
            }
        };

        match self.until_cancelled(bus, PublishError::Cancelled).await {
            Ok(bus) => {
                let bus = Arc::new(bus);
                let scheduler = self.serve(&link, &bus, &mut report).await;

                info!(
                    "Starting graceful exit with status code {}",
                    report.status().code()
                );
                if let Some(mut scheduler) = scheduler {
                    // Already logged by the failing batch
                    if let Err(e) = scheduler.drain().await {
                        report.fail(e);
                    }
                    report.batches = scheduler.batches();
                }

                let limit = self.options.shutdown_timeout;
                match timeout(limit, bus.disconnect()).await {
                    Ok(Ok(())) => info!("Disconnected from MQTT broker"),
                    Ok(Err(e)) => warn!("Failed to disconnect from MQTT broker: {}", e),
                    Err(_) => warn!(
                        "Disconnect from MQTT broker did not finish within {} ms",
                        limit.as_millis()
                    ),
                }
            }
            Err(e) => {
                self.report_startup_failure(e.into(), &mut report);
                info!(
                    "Starting graceful exit with status code {}",
                    report.status().code()
                );
            }
        }

        let limit = self.options.shutdown_timeout;
        match timeout(limit, link.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to disconnect from {}: {}", link.label(), e),
            Err(_) => warn!(
                "Disconnect from {} did not finish within {} ms",
                link.label(),
                limit.as_millis()
            ),
        }

        self.finish(report)
    }

    /// Resolve the session and poll. Returns the scheduler if polling started.
    async fn serve<L, B>(
        &self,
        link: &L,
        bus: &Arc<B>,
        report: &mut RunReport,
    ) -> Option<PublishScheduler<B>>
    where
        L: GattLink,
        B: MessageBus + 'static,
    {
        debug!("Requesting characteristics from {}...", link.label());
        let session = match self.resolve_session(link).await {
            Ok(session) => session,
            Err(e) => {
                self.report_startup_failure(e.into(), report);
                return None;
            }
        };
        info!(
            "Connected to Bluetooth device {}; characteristics received",
            link.label()
        );

        let mut scheduler = PublishScheduler::new(
            Arc::clone(bus),
            self.options.publish_timeout,
            self.cancel.clone(),
        );
        self.poll_loop(link, &session, &mut scheduler, report).await;
        Some(scheduler)
    }

    async fn resolve_session<L: GattLink>(&self, link: &L) -> tc66_core::Result<Session> {
        let limit = self.options.resolve_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(tc66_core::Error::Cancelled),
            result = timeout(limit, resolve(link)) => result
                .unwrap_or_else(|_| Err(tc66_core::Error::timeout("retrieve characteristics", limit))),
        }
    }

    async fn poll_loop<L, B>(
        &self,
        link: &L,
        session: &Session,
        scheduler: &mut PublishScheduler<B>,
        report: &mut RunReport,
    ) where
        L: GattLink,
        B: MessageBus + 'static,
    {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            report.cycles += 1;
            let cycle = PollCycle::start(report.cycles);

            match self.poll_once(link, session, scheduler).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => break,
                Err(BridgeError::Device(e))
                    if self.options.skip_failed_cycles && e.is_cycle_failure() =>
                {
                    warn!(
                        "Cycle {} on {} failed, continuing: {}",
                        cycle.number(),
                        link.label(),
                        e
                    );
                    report.failed_cycles += 1;
                }
                // Already logged by the failing batch
                Err(e @ BridgeError::Publish(_)) => {
                    report.fail(e);
                    break;
                }
                Err(e) => {
                    error!("Polling {} failed: {}", link.label(), e);
                    report.fail(e);
                    break;
                }
            }

            let duration = cycle.elapsed();
            info!("Run duration {} ms", duration.as_millis());

            if let Some(max) = self.options.max_cycles
                && report.cycles >= max
            {
                info!("Completed {} cycles", report.cycles);
                break;
            }

            match next_wait(self.options.interval, duration) {
                WaitPlan::Immediate => {}
                WaitPlan::Skip { overrun } => {
                    warn!("Run took {} ms too long, skipping wait", overrun.as_millis());
                }
                WaitPlan::Sleep(wait) => {
                    debug!("Adjusting wait time to {} ms", wait.as_millis());
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn poll_once<L, B>(
        &self,
        link: &L,
        session: &Session,
        scheduler: &mut PublishScheduler<B>,
    ) -> Result<(), BridgeError>
    where
        L: GattLink,
        B: MessageBus + 'static,
    {
        let frame = request_measurement(link, session, &self.options.request, &self.cancel).await?;
        debug!("Measurements received from {}", link.label());

        let reading = codec::decode(&frame)?;
        debug!("Decoded {}", reading);

        let batch = messages_for(&self.options.namespace, &self.options.alias, &reading);
        scheduler.submit(batch).await?;
        Ok(())
    }

    async fn until_cancelled<T, E, F>(&self, fut: F, cancelled: E) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled),
            result = fut => result,
        }
    }

    fn report_startup_failure(&self, error: BridgeError, report: &mut RunReport) {
        if error.is_cancelled() {
            error!("Interrupted before {} could be polled, aborting", self.options.device);
        } else {
            error!("{}", error);
        }
        report.fail(error);
    }

    fn finish(&self, report: RunReport) -> RunReport {
        info!(
            "Bridge stopped after {} cycles ({} skipped, {} batches), exit status {}",
            report.cycles,
            report.failed_cycles,
            report.batches,
            report.status().code()
        );
        report
    }
}
