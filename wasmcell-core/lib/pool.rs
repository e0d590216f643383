//! Bounded pool of execution units with quota-triggered recycling.
//!
//! This module handles:
//! - The fixed-capacity ready queue of idle units
//! - The single-slot replenishment buffer and its background task
//! - The per-unit memory quota check and the transparent swap of over-quota
//!   units for pre-warmed replacements
//!
//! Units are handed out as [`PooledUnit`] leases that return their unit to
//! the ready queue on drop, so a caller that abandons a call future at an
//! await point cannot leak pool capacity.
//!
//! Recycling is a capacity-preserving swap: the pool never grows, and a
//! destroyed unit is always backfilled from the replenishment buffer so the
//! total number of available units stays constant. To keep that invariant
//! under caller cancellation, `acquire` obtains the replacement *before*
//! dropping the over-quota unit; the drop itself deterministically releases
//! the guest's store, instance and linear memory.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{unit::ExecutionUnit, WasmcellError, WasmcellResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The seam through which the pool obtains fresh execution units.
#[async_trait]
pub trait ProvisionUnit: Send + Sync {
    /// Instantiate one brand-new, fully initialized, idle unit.
    async fn provision(&self) -> WasmcellResult<ExecutionUnit>;
}

/// A fixed-capacity set of ready-to-use execution units plus a single-slot
/// replenishment buffer.
///
/// Every unit is in exactly one place at any instant: the ready queue, the
/// replenishment buffer, or the hands of exactly one caller.
pub struct UnitPool {
    /// Configured parallelism; the hard concurrency ceiling.
    parallelism: usize,

    /// Per-unit memory quota in 64-KiB pages.
    quota_pages: u64,

    /// Send half of the ready queue; leases push their unit back through
    /// clones of this.
    ready_tx: mpsc::Sender<ExecutionUnit>,

    /// Receive half of the ready queue, shared by all acquirers.
    ready_rx: Mutex<mpsc::Receiver<ExecutionUnit>>,

    /// Receive half of the one-slot replenishment buffer.
    spare_rx: Mutex<mpsc::Receiver<ExecutionUnit>>,

    /// Cancelled on shutdown; tears down the replenisher.
    shutdown: CancellationToken,
}

/// An exclusive lease on one execution unit.
///
/// Dereferences to the unit. Dropping the lease returns the unit to the
/// ready queue, including when the surrounding call future is dropped
/// mid-await.
pub struct PooledUnit {
    /// The leased unit; present until drop.
    unit: Option<ExecutionUnit>,

    /// Send half of the ready queue the unit goes back through.
    ready_tx: mpsc::Sender<ExecutionUnit>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UnitPool {
    /// Build a pool with `parallelism` units, provisioning all of them
    /// synchronously before returning, and start the replenishment task.
    pub async fn new(
        factory: Arc<dyn ProvisionUnit>,
        parallelism: usize,
        quota_pages: u64,
    ) -> WasmcellResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel(parallelism);
        for _ in 0..parallelism {
            let unit = factory.provision().await?;
            ready_tx
                .send(unit)
                .await
                .map_err(|_| WasmcellError::PoolClosed)?;
        }

        let (spare_tx, spare_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        tokio::spawn(replenisher(factory, spare_tx, shutdown.clone()));

        tracing::info!(parallelism, quota_pages, "unit pool ready");
        Ok(Self {
            parallelism,
            quota_pages,
            ready_tx,
            ready_rx: Mutex::new(ready_rx),
            spare_rx: Mutex::new(spare_rx),
            shutdown,
        })
    }

    /// Borrow a unit, waiting until one is idle.
    ///
    /// If the unit at hand is over quota it is swapped for a pre-warmed
    /// replacement, transparently to the caller. Cancellation while waiting
    /// releases the wait without side effects.
    pub async fn acquire(&self, cancel: &CancellationToken) -> WasmcellResult<PooledUnit> {
        let mut unit = {
            let mut ready_rx = tokio::select! {
                _ = cancel.cancelled() => return Err(WasmcellError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(WasmcellError::PoolClosed),
                guard = self.ready_rx.lock() => guard,
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(WasmcellError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(WasmcellError::PoolClosed),
                unit = ready_rx.recv() => unit.ok_or(WasmcellError::PoolClosed)?,
            }
        };

        let pages = match unit.memory_pages() {
            Ok(pages) => pages,
            Err(err) => {
                tracing::warn!(error = %err, "unit footprint probe failed; recycling unit");
                u64::MAX
            }
        };
        if pages <= self.quota_pages {
            return Ok(self.lease(unit));
        }

        tracing::info!(pages, quota = self.quota_pages, "unit over quota, swapping in spare");
        let spare = {
            let mut spare_rx = tokio::select! {
                _ = cancel.cancelled() => {
                    // Put the over-quota unit back; the next acquirer redoes the swap.
                    self.restock(unit);
                    return Err(WasmcellError::Cancelled);
                }
                _ = self.shutdown.cancelled() => return Err(WasmcellError::PoolClosed),
                guard = self.spare_rx.lock() => guard,
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.restock(unit);
                    return Err(WasmcellError::Cancelled);
                }
                _ = self.shutdown.cancelled() => return Err(WasmcellError::PoolClosed),
                spare = spare_rx.recv() => spare.ok_or(WasmcellError::ReplenisherDown)?,
            }
        };
        drop(unit);
        Ok(self.lease(spare))
    }

    /// Wrap a unit in a lease that returns it to the ready queue on drop.
    fn lease(&self, unit: ExecutionUnit) -> PooledUnit {
        PooledUnit {
            unit: Some(unit),
            ready_tx: self.ready_tx.clone(),
        }
    }

    /// Put a bare unit back into the ready queue.
    ///
    /// Capacity equals parallelism, so the queue always has room for a
    /// returning unit; a send can only fail once the pool is shut down.
    fn restock(&self, unit: ExecutionUnit) {
        if self.ready_tx.try_send(unit).is_err() {
            tracing::debug!("restocked unit into a closed pool; dropping it");
        }
    }

    /// Number of units currently idle in the ready queue.
    pub fn ready_units(&self) -> usize {
        self.parallelism - self.ready_tx.capacity()
    }

    /// Configured parallelism.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Stop handing out units and tear down the replenisher.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for UnitPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::ops::Deref for PooledUnit {
    type Target = ExecutionUnit;

    fn deref(&self) -> &Self::Target {
        self.unit.as_ref().expect("lease holds its unit until drop")
    }
}

impl std::ops::DerefMut for PooledUnit {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.unit.as_mut().expect("lease holds its unit until drop")
    }
}

impl Drop for PooledUnit {
    fn drop(&mut self) {
        if let Some(unit) = self.unit.take() {
            if self.ready_tx.try_send(unit).is_err() {
                tracing::debug!("lease dropped into a closed pool; dropping its unit");
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Perpetual replenishment task: whenever the one-slot buffer has room,
/// instantiate a brand-new unit and place it there.
///
/// Provisioning failure is a fatal pool-health condition: the task logs it
/// and exits, closing the buffer, so later swaps surface
/// [`WasmcellError::ReplenisherDown`] instead of retry-spinning.
async fn replenisher(
    factory: Arc<dyn ProvisionUnit>,
    spare_tx: mpsc::Sender<ExecutionUnit>,
    shutdown: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = spare_tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let unit = tokio::select! {
            _ = shutdown.cancelled() => break,
            unit = factory.provision() => match unit {
                Ok(unit) => unit,
                Err(err) => {
                    tracing::error!(error = %err, "replenisher failed to provision a unit; stopping");
                    break;
                }
            },
        };
        permit.send(unit);
        tracing::debug!("spare unit warmed");
    }
    tracing::debug!("replenisher stopped");
}
