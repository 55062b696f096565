//! Invalidation Bus: keeps displayed predictions in step with their inputs.
//!
//! Any mutator calls `notify_stale(job_id, interview_id)` without knowing who, if
//! anyone, is watching. The bus marks the key dirty and debounces that key; when
//! its window closes it recalculates the key (if someone still watches) and fans
//! the result out.
//!
//! All bookkeeping (subscribers, dirty flags, debounce deadlines, in-flight
//! markers) is owned by a single actor task and mutated only there.
//! Recalculations run on supervised tasks and report back through the actor's
//! internal channel, so different keys can recalculate concurrently while one
//! key never has two recalculations in flight.
//!
//! Per-key lifecycle:
//!   Idle → Subscribed → Pending (dirty, flush scheduled) → Recalculating
//!   → Subscribed (success: deliver, dirty cleared; failure: dirty kept, error delivered)
//!   → Idle once the last subscriber leaves.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::interview::PredictionKey;
use crate::prediction::model::Prediction;
use crate::prediction::store::PredictionStore;

/// Steady notifications on one key defer its flush by at most this many windows.
const MAX_DEFER_WINDOWS: u32 = 5;

/// What the bus calls on flush. Implemented by `PredictionStore`.
#[async_trait]
pub trait Recalculator: Send + Sync + 'static {
    async fn recalculate(&self, key: PredictionKey) -> Result<Prediction, AppError>;

    /// User owning the interview, `None` when the interview does not exist.
    async fn owner(&self, key: PredictionKey) -> Result<Option<Uuid>, AppError>;
}

#[async_trait]
impl Recalculator for PredictionStore {
    async fn recalculate(&self, key: PredictionKey) -> Result<Prediction, AppError> {
        PredictionStore::recalculate(self, key).await
    }

    async fn owner(&self, key: PredictionKey) -> Result<Option<Uuid>, AppError> {
        self.interview_owner(key).await
    }
}

/// A subscription target: one interview, or every interview of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Interview(PredictionKey),
    User(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Transient,
    Other,
}

/// A cloneable summary of a failed recalculation, shared by every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalculationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&AppError> for RecalculationFailure {
    fn from(err: &AppError) -> Self {
        let kind = match err {
            AppError::NotFound(_) => FailureKind::NotFound,
            e if e.is_transient() => FailureKind::Transient,
            _ => FailureKind::Other,
        };
        let message = match err {
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Configuration(msg)
            | AppError::TransientIo(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self { kind, message }
    }
}

impl From<RecalculationFailure> for AppError {
    fn from(failure: RecalculationFailure) -> Self {
        match failure.kind {
            FailureKind::NotFound => AppError::NotFound(failure.message),
            FailureKind::Transient => AppError::TransientIo(failure.message),
            FailureKind::Other => AppError::Internal(anyhow::anyhow!(failure.message)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PredictionEvent {
    Updated(Prediction),
    RecalculationFailed {
        key: PredictionKey,
        message: String,
    },
}

type RecalcResult = Result<Prediction, RecalculationFailure>;
type EventSender = mpsc::UnboundedSender<PredictionEvent>;

enum Command {
    Subscribe {
        id: u64,
        topic: Topic,
        events: EventSender,
    },
    Unsubscribe {
        id: u64,
        topic: Topic,
    },
    NotifyStale(PredictionKey),
    Refresh {
        key: PredictionKey,
        reply: oneshot::Sender<RecalcResult>,
    },
}

enum Internal {
    FlushDue(PredictionKey),
    OwnerResolved {
        key: PredictionKey,
        owner: Result<Option<Uuid>, RecalculationFailure>,
    },
    Finished {
        key: PredictionKey,
        result: RecalcResult,
    },
}

/// Cloneable handle to the process-wide bus.
#[derive(Clone)]
pub struct InvalidationBus {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl InvalidationBus {
    /// Starts the actor on the current Tokio runtime.
    pub fn spawn(recalculator: Arc<dyn Recalculator>, debounce: Duration) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = BusActor::new(recalculator, debounce, internal_tx);
        tokio::spawn(actor.run(command_rx, internal_rx));
        info!("Invalidation bus started (debounce {}ms)", debounce.as_millis());

        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers interest in a topic. Dropping the returned handle unsubscribes.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (events, event_rx) = mpsc::unbounded_channel();
        if self
            .commands
            .send(Command::Subscribe { id, topic, events })
            .is_err()
        {
            warn!("Subscribe on a stopped invalidation bus; no events will arrive");
        }
        Subscription {
            id,
            topic,
            events: event_rx,
            commands: self.commands.clone(),
            last_known_good: HashMap::new(),
        }
    }

    /// Fire-and-forget staleness signal. Never fails, never blocks.
    pub fn notify_stale(&self, job_id: Uuid, interview_id: Uuid) {
        let key = PredictionKey::new(job_id, interview_id);
        if self.commands.send(Command::NotifyStale(key)).is_err() {
            debug!("Dropped stale notification for {key}: bus stopped");
        }
    }

    /// Recalculates now, bypassing the debounce window. Joins an in-flight
    /// recalculation for the same key instead of starting a second one.
    pub async fn refresh(&self, key: PredictionKey) -> Result<Prediction, AppError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Refresh { key, reply })
            .map_err(|_| AppError::Internal(anyhow::anyhow!("invalidation bus stopped")))?;
        let result = response
            .await
            .map_err(|_| AppError::Internal(anyhow::anyhow!("invalidation bus stopped")))?;
        result.map_err(AppError::from)
    }
}

/// Receiving end of a subscription.
///
/// Keeps the last good prediction per key, so a failed recalculation never
/// leaves the viewer without something to show.
pub struct Subscription {
    id: u64,
    topic: Topic,
    events: mpsc::UnboundedReceiver<PredictionEvent>,
    commands: mpsc::UnboundedSender<Command>,
    last_known_good: HashMap<PredictionKey, Prediction>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<PredictionEvent> {
        let event = self.events.recv().await?;
        if let PredictionEvent::Updated(prediction) = &event {
            self.remember(prediction.clone());
        }
        Some(event)
    }

    /// Seeds the last good prediction, e.g. with the stored row a viewer starts from.
    pub fn remember(&mut self, prediction: Prediction) {
        self.last_known_good.insert(prediction.key(), prediction);
    }

    pub fn last_known_good(&self, key: PredictionKey) -> Option<&Prediction> {
        self.last_known_good.get(&key)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            id: self.id,
            topic: self.topic,
        });
    }
}

#[derive(Default)]
struct KeyState {
    subscribers: HashMap<u64, EventSender>,
    dirty: bool,
    in_flight: bool,
    waiters: Vec<oneshot::Sender<RecalcResult>>,
    /// End of this key's trailing debounce window.
    flush_at: Option<Instant>,
    /// First notification of the current burst.
    pending_since: Option<Instant>,
    timer_armed: bool,
}

struct BusActor {
    recalculator: Arc<dyn Recalculator>,
    debounce: Duration,
    keys: HashMap<PredictionKey, KeyState>,
    users: HashMap<Uuid, HashMap<u64, EventSender>>,
    /// Owners of keys whose user has a wildcard subscription. Evicted with it.
    owners: HashMap<PredictionKey, Uuid>,
    /// Keys with an owner lookup in flight.
    resolving: HashSet<PredictionKey>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl BusActor {
    fn new(
        recalculator: Arc<dyn Recalculator>,
        debounce: Duration,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        Self {
            recalculator,
            debounce,
            keys: HashMap::new(),
            users: HashMap::new(),
            owners: HashMap::new(),
            resolving: HashSet::new(),
            internal_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
            }
        }
        debug!("Invalidation bus stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe { id, topic, events } => {
                debug!("Subscriber {id} registered for {topic:?}");
                match topic {
                    Topic::Interview(key) => {
                        self.keys
                            .entry(key)
                            .or_default()
                            .subscribers
                            .insert(id, events);
                    }
                    Topic::User(user_id) => {
                        self.users.entry(user_id).or_default().insert(id, events);
                    }
                }
            }
            Command::Unsubscribe { id, topic } => {
                debug!("Subscriber {id} left {topic:?}");
                match topic {
                    Topic::Interview(key) => {
                        if let Some(state) = self.keys.get_mut(&key) {
                            state.subscribers.remove(&id);
                        }
                        self.prune(key);
                    }
                    Topic::User(user_id) => {
                        if let Some(subs) = self.users.get_mut(&user_id) {
                            subs.remove(&id);
                            if subs.is_empty() {
                                self.users.remove(&user_id);
                            }
                        }
                        let users = &self.users;
                        self.owners.retain(|_, owner| users.contains_key(owner));
                        let keys: Vec<PredictionKey> = self.keys.keys().copied().collect();
                        for key in keys {
                            self.prune(key);
                        }
                    }
                }
            }
            Command::NotifyStale(key) => {
                if self.is_watched(key) {
                    self.mark_stale(key);
                } else if !self.owners.contains_key(&key) && !self.users.is_empty() {
                    self.resolve_owner(key);
                } else {
                    debug!("Ignoring stale notification for unwatched {key}");
                }
                self.retry_failed();
            }
            Command::Refresh { key, reply } => {
                let state = self.keys.entry(key).or_default();
                state.waiters.push(reply);
                if !state.in_flight {
                    self.start(key);
                }
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::FlushDue(key) => {
                let Some(state) = self.keys.get_mut(&key) else {
                    return;
                };
                state.timer_armed = false;
                let flush_at = state.flush_at;
                match flush_at {
                    Some(deadline) if deadline > Instant::now() => {
                        state.timer_armed = true;
                        arm_timer(&self.internal_tx, key, deadline);
                    }
                    Some(_) => {
                        state.flush_at = None;
                        state.pending_since = None;
                        self.flush(key);
                    }
                    None => {}
                }
            }
            Internal::OwnerResolved { key, owner } => {
                self.resolving.remove(&key);
                match owner {
                    Ok(Some(owner)) => {
                        self.owners.insert(key, owner);
                        if self.is_watched(key) {
                            self.mark_stale(key);
                        } else {
                            debug!("Ignoring stale notification for {key}: owner not watching");
                        }
                        self.prune(key);
                    }
                    Ok(None) => debug!("Ignoring stale notification for unknown {key}"),
                    Err(failure) => {
                        warn!("Owner lookup failed for {key}: {}", failure.message)
                    }
                }
            }
            Internal::Finished { key, result } => self.finish(key, result),
        }
    }

    /// A key is watched when someone would see its recalculated prediction.
    fn is_watched(&self, key: PredictionKey) -> bool {
        let direct = self
            .keys
            .get(&key)
            .is_some_and(|s| !s.subscribers.is_empty());
        direct
            || self
                .owners
                .get(&key)
                .is_some_and(|owner| self.users.contains_key(owner))
    }

    /// Marks a watched key dirty and pushes out only that key's flush deadline.
    fn mark_stale(&mut self, key: PredictionKey) {
        let now = Instant::now();
        let debounce = self.debounce;
        let state = self.keys.entry(key).or_default();
        state.dirty = true;
        if state.in_flight {
            // picked up again when the running recalculation finishes
            return;
        }

        let since = *state.pending_since.get_or_insert(now);
        let deadline = (now + debounce).min(since + debounce * MAX_DEFER_WINDOWS);
        state.flush_at = Some(deadline);
        if !state.timer_armed {
            state.timer_armed = true;
            arm_timer(&self.internal_tx, key, deadline);
        }
        debug!("Marked {key} stale");
    }

    /// Reschedules watched keys whose last recalculation failed.
    fn retry_failed(&mut self) {
        let failed: Vec<PredictionKey> = self
            .keys
            .iter()
            .filter(|(_, s)| s.dirty && !s.in_flight && s.flush_at.is_none())
            .map(|(k, _)| *k)
            .collect();
        for key in failed {
            if self.is_watched(key) {
                self.mark_stale(key);
            }
        }
    }

    fn resolve_owner(&mut self, key: PredictionKey) {
        if !self.resolving.insert(key) {
            return;
        }
        let recalculator = Arc::clone(&self.recalculator);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let owner = supervised(key, async move { recalculator.owner(key).await }).await;
            let _ = tx.send(Internal::OwnerResolved { key, owner });
        });
    }

    fn flush(&mut self, key: PredictionKey) {
        let Some(state) = self.keys.get(&key) else {
            return;
        };
        if !state.dirty || state.in_flight {
            return;
        }
        if self.is_watched(key) {
            info!("Flushing stale prediction for {key}");
            self.start(key);
        } else {
            self.prune(key);
        }
    }

    fn start(&mut self, key: PredictionKey) {
        let state = self.keys.entry(key).or_default();
        state.dirty = false;
        state.in_flight = true;
        state.flush_at = None;
        state.pending_since = None;

        let recalculator = Arc::clone(&self.recalculator);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = supervised(key, async move { recalculator.recalculate(key).await }).await;
            let _ = tx.send(Internal::Finished { key, result });
        });
    }

    fn finish(&mut self, key: PredictionKey, result: RecalcResult) {
        let Some(state) = self.keys.get_mut(&key) else {
            return;
        };
        state.in_flight = false;
        let renotified = state.dirty;

        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }

        match result {
            Ok(prediction) => {
                let owner = prediction.user_id;
                self.owners.insert(key, owner);
                self.deliver(key, Some(owner), &PredictionEvent::Updated(prediction));
            }
            Err(failure) => {
                warn!("Recalculation failed for {key}: {}", failure.message);
                if let Some(state) = self.keys.get_mut(&key) {
                    state.dirty = true;
                }
                let owner = self.owners.get(&key).copied();
                self.deliver(
                    key,
                    owner,
                    &PredictionEvent::RecalculationFailed {
                        key,
                        message: failure.message,
                    },
                );
            }
        }

        if renotified && self.is_watched(key) {
            self.mark_stale(key);
        }
        self.prune(key);
    }

    fn deliver(&mut self, key: PredictionKey, owner: Option<Uuid>, event: &PredictionEvent) {
        if let Some(state) = self.keys.get_mut(&key) {
            state
                .subscribers
                .retain(|_, tx| tx.send(event.clone()).is_ok());
        }
        if let Some(owner) = owner {
            if let Some(subs) = self.users.get_mut(&owner) {
                subs.retain(|_, tx| tx.send(event.clone()).is_ok());
                if subs.is_empty() {
                    self.users.remove(&owner);
                }
            }
        }
    }

    /// Drops bookkeeping for a key nobody is watching or waiting on.
    fn prune(&mut self, key: PredictionKey) {
        let watched = self.is_watched(key);
        if let Some(state) = self.keys.get_mut(&key) {
            if !watched {
                state.dirty = false;
                state.flush_at = None;
                state.pending_since = None;
            }
            if state.subscribers.is_empty()
                && !state.in_flight
                && state.waiters.is_empty()
                && !state.dirty
            {
                self.keys.remove(&key);
            }
        }

        let owner_watched = self
            .owners
            .get(&key)
            .is_some_and(|owner| self.users.contains_key(owner));
        if !owner_watched {
            self.owners.remove(&key);
        }
    }
}

fn arm_timer(tx: &mpsc::UnboundedSender<Internal>, key: PredictionKey, deadline: Instant) {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        let _ = tx.send(Internal::FlushDue(key));
    });
}

/// Runs `work` on its own task so a panic comes back as a failure instead of
/// a reply that never arrives.
async fn supervised<T, F>(key: PredictionKey, work: F) -> Result<T, RecalculationFailure>
where
    T: Send + 'static,
    F: Future<Output = Result<T, AppError>> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result.map_err(|e| RecalculationFailure::from(&e)),
        Err(e) => {
            warn!("Task for {key} did not complete: {e}");
            Err(RecalculationFailure {
                kind: FailureKind::Other,
                message: format!("recalculation for {key} aborted unexpectedly"),
            })
        }
    }
}
