//! Motor parameter polling.
//!
//! The motor controller exposes 49 numbered parameters per axis, read back
//! with `XPnnR` / `YPnnR`. The poller sweeps both axes pairwise (X1, Y1,
//! X2, Y2, ...) so a consumer can display partial results while the sweep
//! is in flight. A sweep holds the motor-link lock for its full duration;
//! interleaving another caller's commands between parameter reads would
//! pair responses with the wrong request.

use crate::error::AppResult;
use crate::instrument::MotorClient;
use crate::link::LinkToken;
use crate::protocol::Response;
use crate::sequence::StopHandle;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Highest parameter number readable on either axis.
pub const PARAMETER_COUNT: u8 = 49;

/// One parameter read back from both axes.
#[derive(Debug, Clone)]
pub struct ParameterUpdate {
    /// Parameter number, 1-based as on the controller front panel.
    pub index: u8,
    pub x: Response,
    pub y: Response,
}

pub struct ParameterPoller {
    motor: Arc<MotorClient>,
}

impl ParameterPoller {
    pub fn new(motor: Arc<MotorClient>) -> Self {
        Self { motor }
    }

    /// Read every parameter once and return the full sweep.
    pub async fn poll_once(&self, token: &LinkToken) -> AppResult<Vec<ParameterUpdate>> {
        let _guard = self.motor.link().acquire(token).await;
        let mut sweep = Vec::with_capacity(PARAMETER_COUNT as usize);
        for index in 1..=PARAMETER_COUNT {
            sweep.push(self.read_pair(token, index).await?);
        }
        Ok(sweep)
    }

    /// Read every parameter once, delivering each axis pair over `updates`
    /// as soon as it is available. The full sweep is also returned.
    ///
    /// Delivery stops silently when the receiver is gone; the sweep still
    /// completes so the returned vector is always full-length.
    pub async fn poll_once_incremental(
        &self,
        token: &LinkToken,
        updates: &mpsc::UnboundedSender<ParameterUpdate>,
    ) -> AppResult<Vec<ParameterUpdate>> {
        let _guard = self.motor.link().acquire(token).await;
        let mut sweep = Vec::with_capacity(PARAMETER_COUNT as usize);
        for index in 1..=PARAMETER_COUNT {
            let update = self.read_pair(token, index).await?;
            let _ = updates.send(update.clone());
            sweep.push(update);
        }
        Ok(sweep)
    }

    /// Sweep repeatedly every `interval` until `stop` is raised or the
    /// receiver is dropped, delivering one full sweep per iteration.
    pub async fn run_continuous(
        &self,
        interval: Duration,
        stop: &StopHandle,
        updates: &mpsc::UnboundedSender<Vec<ParameterUpdate>>,
    ) -> AppResult<()> {
        info!("Parameter poller starting ({interval:?} interval)");
        let token = LinkToken::new();
        loop {
            if stop.is_stopped() {
                info!("Parameter poller stopped");
                return Ok(());
            }
            let sweep = self.poll_once(&token).await?;
            if updates.send(sweep).is_err() {
                debug!("Parameter poller receiver dropped, stopping");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn read_pair(&self, token: &LinkToken, index: u8) -> AppResult<ParameterUpdate> {
        let x = self
            .motor
            .send_command(token, &format!("XP{index:02}R"))
            .await?;
        let y = self
            .motor
            .send_command(token, &format!("YP{index:02}R"))
            .await?;
        Ok(ParameterUpdate { index, x, y })
    }
}
