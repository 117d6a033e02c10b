//! Engine facade tying the instrument clients, sequence controller and
//! persistence together behind one handle.
//!
//! Consumers (the CLI binary, or an embedding application) construct an
//! [`Engine`] and receive an event channel; every asynchronous outcome —
//! sequence completion, parameter sweeps, upload progress — arrives as an
//! [`EngineEvent`] rather than a callback.
//!
//! Only one acquisition sequence may run at a time; `start_sequence` rejects
//! a second run with [`ScanError::SequenceBusy`] while the first is alive.

use crate::dump::{DumpCollector, TerminationPolicy};
use crate::error::{AppResult, ScanError};
use crate::instrument::{AcqClient, MotorClient};
use crate::link::LinkToken;
use crate::params::{ParameterPoller, ParameterUpdate};
use crate::poll::{poll_until_ready, PollConfig};
use crate::protocol::Response;
use crate::sequence::{SequenceConfig, SequenceController, SequenceOutcome, StopHandle};
use crate::storage::PersistenceSink;
use crate::upload::{ProgramUploader, UploadProgress};
use log::{info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Destination name for one-shot dump collections.
const ONE_SHOT_DUMP_DESTINATION: &str = "requested_data.csv";

/// Asynchronous outcomes delivered to the engine's consumer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MotorResponse(Response),
    AcqData(String),
    SequenceFinished(SequenceOutcome),
    SequenceError(String),
    ParametersUpdated(Vec<ParameterUpdate>),
    UploadProgress(UploadProgress),
    DumpPersisted { destination: String, records: usize },
}

struct SequenceTask {
    stop: StopHandle,
    handle: JoinHandle<()>,
}

pub struct Engine {
    motor: Arc<MotorClient>,
    acq: Arc<AcqClient>,
    sink: Arc<dyn PersistenceSink>,
    poll: PollConfig,
    events: mpsc::UnboundedSender<EngineEvent>,
    sequence: Mutex<Option<SequenceTask>>,
}

impl Engine {
    /// Build an engine around already-configured clients. Returns the engine
    /// and the receiving end of its event channel.
    pub fn new(
        motor: Arc<MotorClient>,
        acq: Arc<AcqClient>,
        sink: Arc<dyn PersistenceSink>,
        poll: PollConfig,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                motor,
                acq,
                sink,
                poll,
                events,
                sequence: Mutex::new(None),
            },
            receiver,
        )
    }

    fn emit(&self, event: EngineEvent) {
        // A departed consumer is not an error; operations still complete.
        let _ = self.events.send(event);
    }

    /// Send one command to the motor controller and return its annotated
    /// response. The response is also delivered as an event.
    pub async fn send_motor_command(&self, text: &str) -> AppResult<Response> {
        let token = LinkToken::new();
        let response = self.motor.send_command(&token, text).await?;
        self.emit(EngineEvent::MotorResponse(response.clone()));
        Ok(response)
    }

    /// Fire one command at the acquisition card without waiting for a reply.
    pub async fn send_acq_command(&self, text: &str) -> AppResult<()> {
        let token = LinkToken::new();
        self.acq.send_command(&token, text).await
    }

    /// Send one command to the acquisition card and read back a reply line.
    /// The line (possibly empty on timeout) is also delivered as an event.
    pub async fn transact_acq_command(&self, text: &str) -> AppResult<String> {
        let token = LinkToken::new();
        let line = self.acq.transact(&token, text).await?;
        self.emit(EngineEvent::AcqData(line.clone()));
        Ok(line)
    }

    /// Start the acquisition sequence on a background task.
    ///
    /// Returns the run's stop handle. Fails with `SequenceBusy` while a
    /// previous run is still alive; completion arrives as a
    /// `SequenceFinished` or `SequenceError` event.
    pub fn start_sequence(&self, config: SequenceConfig) -> AppResult<StopHandle> {
        let mut slot = self.sequence.lock().map_err(|_| {
            ScanError::Configuration("sequence task state poisoned".to_string())
        })?;
        if let Some(task) = slot.as_ref() {
            if !task.handle.is_finished() {
                return Err(ScanError::SequenceBusy);
            }
        }

        let stop = StopHandle::new();
        let mut controller = SequenceController::new(
            Arc::clone(&self.motor),
            Arc::clone(&self.acq),
            Arc::clone(&self.sink),
            config,
            stop.clone(),
        );
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            match controller.run().await {
                Ok(outcome) => {
                    let _ = events.send(EngineEvent::SequenceFinished(outcome));
                }
                Err(e) => {
                    let _ = events.send(EngineEvent::SequenceError(e.to_string()));
                }
            }
        });
        *slot = Some(SequenceTask {
            stop: stop.clone(),
            handle,
        });
        Ok(stop)
    }

    /// Request a graceful stop of the running sequence, if any.
    pub fn stop_sequence(&self) {
        if let Ok(slot) = self.sequence.lock() {
            if let Some(task) = slot.as_ref() {
                info!("Stop requested for acquisition sequence");
                task.stop.stop();
            }
        }
    }

    /// Whether a sequence task is currently alive.
    pub fn sequence_running(&self) -> bool {
        self.sequence
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Sweep all motor parameters once. The sweep is delivered as a
    /// `ParametersUpdated` event and returned.
    pub async fn poll_parameters(&self) -> AppResult<Vec<ParameterUpdate>> {
        let token = LinkToken::new();
        let poller = ParameterPoller::new(Arc::clone(&self.motor));
        let sweep = poller.poll_once(&token).await?;
        self.emit(EngineEvent::ParametersUpdated(sweep.clone()));
        Ok(sweep)
    }

    /// One-shot dump collection: arm the card, wait for the ready token,
    /// trigger the dump, collect a fixed 128x16 dump and persist it.
    ///
    /// Returns the number of records persisted. The acquisition link is held
    /// for the whole operation.
    pub async fn collect_dump_once(&self) -> AppResult<usize> {
        let token = LinkToken::new();
        let _guard = self.acq.link().acquire(&token).await;

        let acq = Arc::clone(&self.acq);
        let probe_token = &token;
        poll_until_ready(
            move || {
                let acq = Arc::clone(&acq);
                async move { acq.transact(probe_token, "A").await }
            },
            |reply| reply == "F",
            &self.poll,
            "one-shot dump ready probe",
        )
        .await?;

        self.acq.send_command(&token, "D").await?;
        let collector = DumpCollector::new(&self.acq, TerminationPolicy::count_default());
        let records = collector.collect(&token).await?;

        self.sink
            .write_records(ONE_SHOT_DUMP_DESTINATION, &records)
            .await?;
        info!(
            "One-shot dump persisted: {} records to '{}'",
            records.len(),
            ONE_SHOT_DUMP_DESTINATION
        );
        self.emit(EngineEvent::DumpPersisted {
            destination: ONE_SHOT_DUMP_DESTINATION.to_string(),
            records: records.len(),
        });
        Ok(records.len())
    }

    /// Upload a stored-program file to the motor controller, forwarding
    /// progress as `UploadProgress` events.
    pub async fn upload_program(
        &self,
        path: impl AsRef<Path>,
        program_name: &str,
    ) -> AppResult<()> {
        let token = LinkToken::new();
        let uploader = ProgramUploader::new(Arc::clone(&self.motor), program_name);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                let _ = events.send(EngineEvent::UploadProgress(progress));
            }
        });

        let result = uploader.upload_file(&token, path, &tx).await;
        drop(tx);
        if forwarder.await.is_err() {
            warn!("Upload progress forwarder aborted");
        }
        result
    }
}
