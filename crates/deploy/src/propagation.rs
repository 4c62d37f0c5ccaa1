//! Waiting on the ledger: bounded confirmations and propagation fences.
//!
//! An assignment may be confirmed before a read through the node observes it.
//! Where the next step depends on that read, the orchestrator waits on an
//! [`Expectation`] through [`PropagationPolicy::await_propagation`].

use std::{future::Future, time::Duration};

use alloy_core::primitives::Address;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DeployError, Result},
    ledger::{Ledger, PendingHandle, Receipt},
    namehash::NodeId,
};

/// Default pause between an ownership change and the step that relies on it.
pub const DEFAULT_FIXED_DELAY_MS: u64 = 6_000;

/// How propagation is awaited.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PropagationMode {
    /// Read the ledger until the expected state is observed.
    #[default]
    Poll,
    /// Sleep for a fixed delay, without reading.
    Fixed,
}

/// Configuration of the propagation fence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub mode: PropagationMode,
    /// Interval between two reads in `poll` mode.
    pub poll_interval_ms: u64,
    /// Upper bound of a `poll` wait.
    pub timeout_secs: u64,
    /// Pause in `fixed` mode.
    pub fixed_delay_ms: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            mode: PropagationMode::Poll,
            poll_interval_ms: 500,
            timeout_secs: 60,
            fixed_delay_ms: DEFAULT_FIXED_DELAY_MS,
        }
    }
}

/// Configuration of operation confirmations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Upper bound for a single operation to be confirmed.
    pub timeout_secs: u64,
    /// Interval between receipt polls (RPC ledger only).
    pub poll_interval_ms: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 1_000,
        }
    }
}

impl ConfirmationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// State that must be observable before the run moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Expectation {
    /// `node` is owned by `owner` in the naming registry at `registry`.
    #[display("owner of {node} to be {owner}")]
    Owner {
        registry: Address,
        node: NodeId,
        owner: Address,
    },
}

/// The propagation fence, together with the run's cancellation token.
#[derive(Debug, Clone)]
pub struct PropagationPolicy {
    config: PropagationConfig,
    cancel: CancellationToken,
}

impl PropagationPolicy {
    pub fn new(config: PropagationConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Block until `expectation` holds (poll mode) or the fixed delay elapsed.
    pub async fn await_propagation<L: Ledger>(
        &self,
        ledger: &L,
        expectation: &Expectation,
    ) -> Result<()> {
        let operation = format!("propagation of {expectation}");

        match self.config.mode {
            PropagationMode::Fixed => {
                let delay = Duration::from_millis(self.config.fixed_delay_ms);
                tracing::debug!(delay = ?delay, %expectation, "Waiting fixed propagation delay");
                cancellable(&self.cancel, &operation, tokio::time::sleep(delay)).await
            }
            PropagationMode::Poll => self.poll(ledger, expectation, &operation).await,
        }
    }

    async fn poll<L: Ledger>(
        &self,
        ledger: &L,
        expectation: &Expectation,
        operation: &str,
    ) -> Result<()> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let deadline = Instant::now() + timeout;
        let mut last_error = None;

        loop {
            match observe(ledger, expectation).await {
                Ok(true) => {
                    tracing::debug!(%expectation, "Propagation observed");
                    return Ok(());
                }
                Ok(false) => {
                    tracing::trace!(%expectation, "Not propagated yet, polling again...");
                }
                Err(e) => {
                    tracing::debug!(error = %e, %expectation, "Propagation read failed, retrying...");
                    last_error = Some(e.to_string());
                }
            }

            if Instant::now() + interval > deadline {
                return Err(DeployError::ConfirmationTimeout {
                    operation: operation.to_string(),
                    timeout,
                    tx_hash: None,
                    last_error,
                });
            }

            cancellable(&self.cancel, operation, tokio::time::sleep(interval)).await?;
        }
    }
}

async fn observe<L: Ledger>(ledger: &L, expectation: &Expectation) -> Result<bool> {
    match *expectation {
        Expectation::Owner {
            registry,
            node,
            owner,
        } => Ok(ledger.owner(registry, node).await? == owner),
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    operation: &str,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DeployError::Cancelled {
            operation: operation.to_string(),
            tx_hash: None,
        }),
        output = fut => Ok(output),
    }
}

/// Fail with [`DeployError::Cancelled`] if `cancel` already fired.
///
/// Called before every submission, so a cancelled run leaves the ledger untouched.
pub fn ensure_not_cancelled(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled {
            operation: operation.to_string(),
            tx_hash: None,
        });
    }
    Ok(())
}

/// Wait for the confirmation of `handle`, bounded by `timeout` and `cancel`.
///
/// On timeout or cancellation the error carries the submitted transaction hash.
pub async fn confirm<L: Ledger>(
    ledger: &L,
    handle: PendingHandle,
    timeout: Duration,
    cancel: &CancellationToken,
    operation: &str,
) -> Result<Receipt> {
    let tx_hash = handle.tx_hash;
    let bounded = tokio::time::timeout(timeout, ledger.await_confirmation(handle));

    match cancellable(cancel, operation, bounded).await {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(_)) => Err(DeployError::ConfirmationTimeout {
            operation: operation.to_string(),
            timeout,
            tx_hash: Some(tx_hash),
            last_error: None,
        }),
        Err(DeployError::Cancelled { operation, .. }) => Err(DeployError::Cancelled {
            operation,
            tx_hash: Some(tx_hash),
        }),
        Err(e) => Err(e),
    }
}
