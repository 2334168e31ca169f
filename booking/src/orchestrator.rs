//! Booking orchestrator: lock, reserve, emit, release.
//!
//! # State machine
//!
//! ```text
//! Idle ─► LockAcquiring ─┬─► LockTimedOut ─────────────────────────────► Done   (SYSTEM_BUSY)
//!                        └─► LockAcquired ─► Reserving ─┬─► Committed ─► EmittingEvent ─┐
//!                                                       └─► AlreadyReserved ────────────┤
//!                                                                                       ▼
//!                                                                        Releasing ─► Done
//! ```
//!
//! Every path that reached `LockAcquired` goes through `Releasing`, including
//! faults, panics in the critical section and interruption. If the request
//! future itself is dropped, the lease guard schedules the release on the
//! runtime.
//!
//! `Reserving` is split in two. The read of the current flag can be
//! interrupted. The compare-and-set write cannot: it runs on its own task and
//! emits the event itself, so a committed row always produces an event and
//! the caller sees `SUCCESS`.

use crate::executor::{ReservationError, ReservationExecutor, ReservationResult};
use crate::producer::EventProducer;
use futures::FutureExt;
use sentinel_core::environment::Clock;
use sentinel_core::event::ReservationEvent;
use sentinel_core::lock::{LockAcquisition, LockCoordinator, LockError, LockHandle, LockOwner};
use sentinel_core::resource::{Resource, ResourceId, ResourceStoreError};
use sentinel_runtime::metrics::BookingMetrics;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lock timing and key layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfig {
    /// How long a request waits for the resource lock
    pub lock_wait: Duration,
    /// How long a granted lease lives without release
    pub lease: Duration,
    /// Lock key prefix, followed by the resource id
    pub key_prefix: String,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            lease: Duration::from_secs(10),
            key_prefix: "lock:seat:".to_string(),
        }
    }
}

impl BookingConfig {
    /// Lock key for a resource.
    #[must_use]
    pub fn lock_key(&self, id: ResourceId) -> String {
        format!("{}{id}", self.key_prefix)
    }
}

/// Fault carried by [`ReservationOutcome::Error`].
#[derive(Error, Debug, Clone)]
pub enum BookingFault {
    /// No resource with this id exists (a client error)
    #[error("Resource {0} not found")]
    ResourceNotFound(ResourceId),

    /// The lock coordinator failed
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The resource store failed
    #[error(transparent)]
    Store(#[from] ResourceStoreError),

    /// The critical section panicked
    #[error("Critical section panicked: {0}")]
    Panicked(String),

    /// The write task was cancelled before reporting, e.g. at runtime shutdown
    #[error("Reservation write aborted: {0}")]
    WriteAborted(String),
}

impl From<ReservationError> for BookingFault {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::NotFound(id) => Self::ResourceNotFound(id),
            ReservationError::Store(e) => Self::Store(e),
        }
    }
}

/// Terminal outcome of a reservation request.
#[derive(Debug, Clone)]
pub enum ReservationOutcome {
    /// The resource is now reserved by this request
    Success,
    /// Someone else reserved it first
    AlreadyReserved,
    /// The lock could not be taken within the wait window
    SystemBusy,
    /// The request was interrupted before the write started
    Interrupted,
    /// A fault occurred
    Error(BookingFault),
}

impl ReservationOutcome {
    /// Outcome name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::AlreadyReserved => "ALREADY_RESERVED",
            Self::SystemBusy => "SYSTEM_BUSY",
            Self::Interrupted => "INTERRUPTED",
            Self::Error(_) => "ERROR",
        }
    }

    /// HTTP status code for the outcome.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Success => 201,
            Self::AlreadyReserved => 409,
            Self::SystemBusy | Self::Interrupted => 503,
            Self::Error(BookingFault::ResourceNotFound(_)) => 404,
            Self::Error(_) => 500,
        }
    }

    /// Response label for the outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::AlreadyReserved => "TAKEN",
            Self::SystemBusy | Self::Interrupted => "RETRY",
            Self::Error(BookingFault::ResourceNotFound(_)) => "NOT_FOUND",
            Self::Error(_) => "ERROR",
        }
    }

    /// Whether this request reserved the resource.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// States a request moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    /// Request accepted
    Idle,
    /// Waiting for the lock
    LockAcquiring,
    /// Lock wait ran out
    LockTimedOut,
    /// Lease held
    LockAcquired,
    /// Running the reservation transaction
    Reserving,
    /// Transaction applied
    Committed,
    /// Resource was already reserved
    AlreadyReserved,
    /// Handing the event to the producer
    EmittingEvent,
    /// Releasing the lease
    Releasing,
    /// Finished
    Done,
}

/// Tracks and logs the state of one request.
#[derive(Debug)]
struct BookingFlow {
    id: ResourceId,
    state: BookingState,
}

impl BookingFlow {
    const fn new(id: ResourceId) -> Self {
        Self {
            id,
            state: BookingState::Idle,
        }
    }

    fn advance(&mut self, next: BookingState) {
        debug!(resource_id = %self.id, from = ?self.state, to = ?next, "Booking state transition");
        self.state = next;
    }
}

/// Releases its lease exactly once, explicitly or on drop.
struct LeaseGuard {
    locks: Arc<dyn LockCoordinator>,
    handle: Option<LockHandle>,
}

impl LeaseGuard {
    fn new(locks: Arc<dyn LockCoordinator>, handle: LockHandle) -> Self {
        Self {
            locks,
            handle: Some(handle),
        }
    }

    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            release_lease(self.locks.as_ref(), &handle).await;
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let locks = Arc::clone(&self.locks);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    release_lease(locks.as_ref(), &handle).await;
                });
            }
            Err(_) => {
                warn!(key = %handle.key, "No runtime to release lease, leaving it to expire");
            }
        }
    }
}

async fn release_lease(locks: &dyn LockCoordinator, handle: &LockHandle) {
    match locks.release(handle).await {
        Ok(true) => debug!(key = %handle.key, "Lease released"),
        Ok(false) => debug!(key = %handle.key, "Lease already gone at release"),
        Err(e) => error!(key = %handle.key, error = %e, "Lease release failed, leaving it to expire"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Resolves once the interrupt flag is raised. Never resolves if the sender is gone.
async fn interrupted(signal: &mut watch::Receiver<bool>) {
    if signal.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Composes lock acquisition, reservation and event emission.
#[derive(Clone)]
pub struct BookingOrchestrator {
    locks: Arc<dyn LockCoordinator>,
    executor: ReservationExecutor,
    producer: EventProducer,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

impl BookingOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        locks: Arc<dyn LockCoordinator>,
        executor: ReservationExecutor,
        producer: EventProducer,
        clock: Arc<dyn Clock>,
        config: BookingConfig,
    ) -> Self {
        Self {
            locks,
            executor,
            producer,
            clock,
            config,
        }
    }

    /// Lock timing and key layout in use.
    #[must_use]
    pub const fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Reserve `id`.
    pub async fn reserve(&self, id: ResourceId) -> ReservationOutcome {
        let (_never, signal) = watch::channel(false);
        self.reserve_interruptible(id, signal).await
    }

    /// Reserve `id`, giving up with [`ReservationOutcome::Interrupted`] once
    /// `interrupt` turns `true`.
    ///
    /// An interrupt stops the lock wait and the read of the resource. Once
    /// the write has started it runs to completion and decides the outcome.
    #[tracing::instrument(skip(self, interrupt), fields(resource_id = %id))]
    pub async fn reserve_interruptible(
        &self,
        id: ResourceId,
        mut interrupt: watch::Receiver<bool>,
    ) -> ReservationOutcome {
        let outcome = self.run(id, &mut interrupt).await;
        BookingMetrics::record_outcome(outcome.name());
        match &outcome {
            ReservationOutcome::Success => info!(outcome = outcome.name(), "Reservation finished"),
            ReservationOutcome::Error(fault) => {
                error!(outcome = outcome.name(), error = %fault, "Reservation failed");
            }
            _ => info!(outcome = outcome.name(), "Reservation finished"),
        }
        outcome
    }

    /// Up to `limit` unreserved resources.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceStoreError`] when the store fails.
    pub async fn available_resources(
        &self,
        limit: usize,
    ) -> Result<Vec<Resource>, ResourceStoreError> {
        self.executor.available(limit).await
    }

    async fn run(&self, id: ResourceId, interrupt: &mut watch::Receiver<bool>) -> ReservationOutcome {
        let mut flow = BookingFlow::new(id);
        let key = self.config.lock_key(id);
        let owner = LockOwner::generate();

        flow.advance(BookingState::LockAcquiring);
        let started = Instant::now();
        let acquisition = tokio::select! {
            biased;
            () = interrupted(interrupt) => None,
            result = self.locks.acquire(&key, owner, self.config.lock_wait, self.config.lease) => Some(result),
        };
        BookingMetrics::record_lock_wait(started.elapsed());

        let handle = match acquisition {
            None => {
                // The lease may have been granted just before the interrupt.
                warn!(%key, "Interrupted while waiting for lock");
                flow.advance(BookingState::Releasing);
                release_lease(self.locks.as_ref(), &LockHandle::provisional(key, owner)).await;
                flow.advance(BookingState::Done);
                return ReservationOutcome::Interrupted;
            }
            Some(Err(e)) => {
                flow.advance(BookingState::Done);
                return ReservationOutcome::Error(BookingFault::Lock(e));
            }
            Some(Ok(LockAcquisition::TimedOut)) => {
                warn!(%key, wait_ms = u64::try_from(self.config.lock_wait.as_millis()).unwrap_or(u64::MAX), "Lock wait timed out");
                flow.advance(BookingState::LockTimedOut);
                flow.advance(BookingState::Done);
                return ReservationOutcome::SystemBusy;
            }
            Some(Ok(LockAcquisition::Acquired(handle))) => handle,
        };

        flow.advance(BookingState::LockAcquired);
        let guard = LeaseGuard::new(Arc::clone(&self.locks), handle);

        flow.advance(BookingState::Reserving);
        let check = AssertUnwindSafe(self.executor.check(id)).catch_unwind();
        let checked = tokio::select! {
            biased;
            () = interrupted(interrupt) => None,
            result = check => Some(result),
        };

        let outcome = match checked {
            None => {
                warn!("Interrupted before the reservation write");
                ReservationOutcome::Interrupted
            }
            Some(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                ReservationOutcome::Error(BookingFault::Panicked(message))
            }
            Some(Ok(Err(e))) => ReservationOutcome::Error(e.into()),
            Some(Ok(Ok(true))) => {
                flow.advance(BookingState::AlreadyReserved);
                ReservationOutcome::AlreadyReserved
            }
            Some(Ok(Ok(false))) => {
                let outcome = self.commit(id, &mut flow).await;
                if *interrupt.borrow() {
                    info!(
                        outcome = outcome.name(),
                        "Interrupt arrived during the write, keeping its result"
                    );
                }
                outcome
            }
        };

        flow.advance(BookingState::Releasing);
        guard.release().await;
        flow.advance(BookingState::Done);
        outcome
    }

    /// Run the write and, if it applied, hand the event to the producer.
    ///
    /// The write runs on its own task: once started, neither an interrupt nor
    /// a dropped request separates a commit from its event.
    async fn commit(&self, id: ResourceId, flow: &mut BookingFlow) -> ReservationOutcome {
        let executor = self.executor.clone();
        let producer = self.producer.clone();
        let clock = Arc::clone(&self.clock);
        let write = tokio::spawn(async move {
            let result = executor.commit(id).await;
            if matches!(result, Ok(ReservationResult::Applied)) {
                let event = ReservationEvent::reserved(id, clock.as_ref());
                // Fire and forget: delivery is tracked by the producer.
                drop(producer.emit(event));
            }
            result
        });

        match write.await {
            Ok(Ok(ReservationResult::Applied)) => {
                flow.advance(BookingState::Committed);
                flow.advance(BookingState::EmittingEvent);
                ReservationOutcome::Success
            }
            Ok(Ok(ReservationResult::AlreadyReserved)) => {
                flow.advance(BookingState::AlreadyReserved);
                ReservationOutcome::AlreadyReserved
            }
            Ok(Err(e)) => ReservationOutcome::Error(e.into()),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic().as_ref());
                ReservationOutcome::Error(BookingFault::Panicked(message))
            }
            Err(e) => ReservationOutcome::Error(BookingFault::WriteAborted(e.to_string())),
        }
    }
}
