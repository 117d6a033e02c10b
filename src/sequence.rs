//! Acquisition sequence controller.
//!
//! Orchestrates one measurement run as an explicit state machine: home the
//! motors, then per device profile arm the card, drive the motor, wait for
//! the ready token, trigger and collect the dump, and persist it. The
//! observed implementations were several near-duplicate workers; here they
//! collapse into one machine parameterized by a handful of per-variant
//! knobs — termination policy, optional setup command, continuous versus
//! single-pass profile iteration.
//!
//! ## Locking policy
//!
//! The controller acquires the acquisition-link lock once for its entire
//! run, not per command. This is deliberate: the parameter poller and ad hoc
//! commands must not interleave on the acquisition wire mid-sequence. Inner
//! exchanges re-acquire reentrantly under the same token, and the guard is
//! released on every exit path — `Finished`, `Failed` and `Cancelled` alike.
//!
//! ## Failure semantics
//!
//! Any step's failure — poll timeout, malformed record, sink error — moves
//! the machine to terminal `Failed`; nothing partial is persisted and no
//! profile is retried. Cancellation is cooperative: a shared flag checked at
//! every state entry, yielding terminal `Cancelled` without aborting a write
//! already in flight.

use crate::dump::{DumpCollector, DumpRecord, TerminationPolicy};
use crate::error::{AppResult, ScanError};
use crate::instrument::{AcqClient, MotorClient};
use crate::link::LinkToken;
use crate::poll::{poll_until_ready, PollConfig};
use crate::storage::PersistenceSink;
use log::{error, info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Static per-axis descriptor driving one pass of the sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfile {
    /// Axis label used in logs and error contexts (e.g. "X").
    pub label: String,
    /// Home command issued once at startup (e.g. "X0+").
    pub initial: String,
    /// Drive command issued each pass (e.g. "X-400").
    pub drive: String,
    /// Destination name handed to the persistence sink.
    pub destination: String,
}

/// Whether profile iteration wraps or terminates after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Continuous,
    SinglePass,
}

/// Per-variant configuration of the sequence machine.
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    pub profiles: Vec<DeviceProfile>,
    pub run_mode: RunMode,
    pub termination: TerminationPolicy,
    /// Optional card setup command (e.g. "SC,002,005"); when present the
    /// machine waits for an "OK"-bearing reply before polling for ready.
    pub setup_command: Option<String>,
    /// Mechanical settle delays after the first and second home commands.
    /// These are device settle times, not polling.
    pub settle_first: Duration,
    pub settle_second: Duration,
    /// Pause between profiles after a successful persist.
    pub inter_profile_delay: Duration,
    pub poll: PollConfig,
    /// Keep going to the next profile when the sink fails.
    pub continue_on_persist_error: bool,
    /// Card arm command, also used as the ready probe.
    pub arm_command: String,
    /// Card dump trigger command.
    pub dump_command: String,
    /// Reply signaling the card has data available.
    pub ready_token: String,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            profiles: vec![
                DeviceProfile {
                    label: "X".to_string(),
                    initial: "X0+".to_string(),
                    drive: "X-400".to_string(),
                    destination: "acquired_data_X.csv".to_string(),
                },
                DeviceProfile {
                    label: "Y".to_string(),
                    initial: "Y0+".to_string(),
                    drive: "Y-400".to_string(),
                    destination: "acquired_data_Y.csv".to_string(),
                },
            ],
            run_mode: RunMode::SinglePass,
            termination: TerminationPolicy::sentinel_default(),
            setup_command: None,
            settle_first: Duration::from_secs(3),
            settle_second: Duration::from_secs(5),
            inter_profile_delay: Duration::from_secs(1),
            poll: PollConfig::default(),
            continue_on_persist_error: false,
            arm_command: "A".to_string(),
            dump_command: "D".to_string(),
            ready_token: "F".to_string(),
        }
    }
}

/// States of the sequence machine. Terminal: `Finished`, `Failed`,
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Init,
    SendSecondInitial,
    StartSequence,
    ProcessProfile,
    SendDriveCommand,
    WaitForSetupAck,
    PollForReady,
    SendDumpTrigger,
    CollectDump,
    PersistDump,
    Finished,
    Failed,
    Cancelled,
}

/// How a run ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    Finished,
    Cancelled,
}

/// Cooperative cancellation flag shared with the controller.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop; checked at every state entry.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub struct SequenceController {
    motor: Arc<MotorClient>,
    acq: Arc<AcqClient>,
    sink: Arc<dyn PersistenceSink>,
    config: SequenceConfig,
    stop: StopHandle,
    state: SequenceState,
    profile_index: usize,
}

impl SequenceController {
    pub fn new(
        motor: Arc<MotorClient>,
        acq: Arc<AcqClient>,
        sink: Arc<dyn PersistenceSink>,
        config: SequenceConfig,
        stop: StopHandle,
    ) -> Self {
        Self {
            motor,
            acq,
            sink,
            config,
            stop,
            state: SequenceState::Init,
            profile_index: 0,
        }
    }

    /// Terminal state the machine ended in, for inspection after `run`.
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Run the sequence to a terminal state.
    ///
    /// Holds the acquisition-link lock for the whole run (see module docs).
    /// Returns the outcome, or the error that moved the machine to `Failed`;
    /// the lock is released on every path.
    pub async fn run(&mut self) -> AppResult<SequenceOutcome> {
        if self.config.profiles.is_empty() {
            return Err(ScanError::Configuration(
                "acquisition sequence needs at least one profile".to_string(),
            ));
        }

        let token = LinkToken::new();
        let guard = self.acq.link().acquire(&token).await;
        info!(
            "Acquisition sequence starting: {} profiles, {:?}",
            self.config.profiles.len(),
            self.config.run_mode
        );

        let result = self.drive(&token).await;
        drop(guard);

        match &result {
            Ok(SequenceOutcome::Finished) => {
                self.state = SequenceState::Finished;
                info!("Acquisition sequence finished");
            }
            Ok(SequenceOutcome::Cancelled) => {
                self.state = SequenceState::Cancelled;
                info!("Acquisition sequence cancelled");
            }
            Err(e) => {
                self.state = SequenceState::Failed;
                error!("Acquisition sequence failed: {e}");
            }
        }
        result
    }

    fn current_profile(&self) -> &DeviceProfile {
        &self.config.profiles[self.profile_index]
    }

    /// The state loop proper. Every handler entry checks the stop flag;
    /// terminal outcomes return directly, everything else assigns the next
    /// state.
    async fn drive(&mut self, token: &LinkToken) -> AppResult<SequenceOutcome> {
        let mut collected: Option<Vec<DumpRecord>> = None;

        loop {
            if self.stop.is_stopped() {
                return Ok(SequenceOutcome::Cancelled);
            }

            self.state = match self.state {
                SequenceState::Init => {
                    let initial = self.config.profiles[0].initial.clone();
                    let label = self.config.profiles[0].label.clone();
                    info!("Init: homing {} axis ({})", label, initial);
                    let response = self.motor.send_command(token, &initial).await?;
                    if response.is_nak() {
                        warn!("Home command reply was NAK-bearing: {response}");
                    }
                    tokio::time::sleep(self.config.settle_first).await;
                    SequenceState::SendSecondInitial
                }

                SequenceState::SendSecondInitial => {
                    if let Some(profile) = self.config.profiles.get(1) {
                        let initial = profile.initial.clone();
                        let label = profile.label.clone();
                        info!("Init: homing {} axis ({})", label, initial);
                        let response = self.motor.send_command(token, &initial).await?;
                        if response.is_nak() {
                            warn!("Home command reply was NAK-bearing: {response}");
                        }
                        tokio::time::sleep(self.config.settle_second).await;
                    }
                    SequenceState::StartSequence
                }

                SequenceState::StartSequence => {
                    self.profile_index = 0;
                    SequenceState::ProcessProfile
                }

                SequenceState::ProcessProfile => {
                    if self.profile_index >= self.config.profiles.len() {
                        match self.config.run_mode {
                            RunMode::Continuous => self.profile_index = 0,
                            RunMode::SinglePass => return Ok(SequenceOutcome::Finished),
                        }
                    }
                    info!("Processing {} axis profile", self.current_profile().label);
                    SequenceState::SendDriveCommand
                }

                SequenceState::SendDriveCommand => {
                    let drive = self.current_profile().drive.clone();
                    self.acq
                        .send_command(token, &self.config.arm_command)
                        .await?;
                    let response = self.motor.send_command(token, &drive).await?;
                    if response.is_nak() {
                        warn!("Drive command reply was NAK-bearing: {response}");
                    }
                    if let Some(setup) = self.config.setup_command.clone() {
                        self.acq.send_command(token, &setup).await?;
                        SequenceState::WaitForSetupAck
                    } else {
                        SequenceState::PollForReady
                    }
                }

                SequenceState::WaitForSetupAck => {
                    let context = format!("{} axis setup ack", self.current_profile().label);
                    let acq = Arc::clone(&self.acq);
                    poll_until_ready(
                        move || {
                            let acq = Arc::clone(&acq);
                            async move { Ok(acq.read_line(token).await) }
                        },
                        |reply| reply.contains("OK"),
                        &self.config.poll,
                        &context,
                    )
                    .await?;
                    SequenceState::PollForReady
                }

                SequenceState::PollForReady => {
                    let context = format!("{} axis ready probe", self.current_profile().label);
                    let acq = Arc::clone(&self.acq);
                    let arm = self.config.arm_command.clone();
                    let ready = self.config.ready_token.clone();
                    poll_until_ready(
                        move || {
                            let acq = Arc::clone(&acq);
                            let arm = arm.clone();
                            async move { acq.transact(token, &arm).await }
                        },
                        move |reply| reply == ready,
                        &self.config.poll,
                        &context,
                    )
                    .await?;
                    SequenceState::SendDumpTrigger
                }

                SequenceState::SendDumpTrigger => {
                    self.acq
                        .send_command(token, &self.config.dump_command)
                        .await?;
                    SequenceState::CollectDump
                }

                SequenceState::CollectDump => {
                    let collector =
                        DumpCollector::new(&self.acq, self.config.termination.clone());
                    collected = Some(collector.collect(token).await?);
                    SequenceState::PersistDump
                }

                SequenceState::PersistDump => {
                    let destination = self.current_profile().destination.clone();
                    let label = self.current_profile().label.clone();
                    let records = collected.take().unwrap_or_default();
                    match self.sink.write_records(&destination, &records).await {
                        Ok(()) => info!(
                            "Persisted {} records for {} axis to '{}'",
                            records.len(),
                            label,
                            destination
                        ),
                        Err(e) if self.config.continue_on_persist_error => {
                            warn!("Persist failed for {} axis, continuing: {e}", label);
                        }
                        Err(e) => return Err(e),
                    }
                    self.profile_index += 1;
                    tokio::time::sleep(self.config.inter_profile_delay).await;
                    SequenceState::ProcessProfile
                }

                // Terminal states are only assigned by `run` after the loop
                // returns; re-entering one here would be a bug.
                SequenceState::Finished | SequenceState::Failed | SequenceState::Cancelled => {
                    return Ok(SequenceOutcome::Finished)
                }
            };
        }
    }
}
