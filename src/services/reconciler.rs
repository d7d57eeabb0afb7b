use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{AuthSession, AuthState};
use crate::error::AppError;
use crate::models::{Collection, Course, Deadline, Record, Snapshot, UserId};
use crate::services::gpa::{self, GpaSummary};
use crate::store::{CollectionQuery, DocumentStore, SnapshotFeed};

const EVENT_BUFFER: usize = 64;

/// Per-collection subscription lifecycle. `Detached` is initial and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Detached,
    Subscribing,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    /// An authoritative snapshot replaced the mirror.
    Replaced { collection: Collection, records: usize },
    /// A local optimistic change was applied.
    Mutated { collection: Collection, id: String },
    SubscriptionFailed { collection: Collection, message: String },
    WriteFailed { collection: Collection, id: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseView {
    pub courses: Vec<Course>,
    pub gpa: GpaSummary,
}

/// Returned by `attach_*`: the cancellable subscription plus the event stream.
pub struct Attachment {
    pub handle: SubscriptionHandle,
    pub events: broadcast::Receiver<MirrorEvent>,
}

/// Cancels the subscription it was issued for, and nothing newer.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    collection: Collection,
    generation: u64,
    inner: Weak<Inner>,
}

impl SubscriptionHandle {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn is_active(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        match self.collection {
            Collection::Courses => inner.is_current::<Course>(self.generation),
            Collection::Deadlines => inner.is_current::<Deadline>(self.generation),
        }
    }

    pub fn cancel(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match self.collection {
            Collection::Courses => inner.cancel_if_current::<Course>(self.generation),
            Collection::Deadlines => inner.cancel_if_current::<Deadline>(self.generation),
        }
    }
}

/// A remote write issued after an optimistic change. Dropping it does not
/// cancel the write.
///
/// Writes to one collection reach the store in the order the changes were
/// applied to the mirror; each waits for the previous one to finish.
pub struct PendingWrite {
    collection: Collection,
    document_id: String,
    handle: JoinHandle<Result<(), AppError>>,
}

impl PendingWrite {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn outcome(self) -> Result<(), AppError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(AppError::remote_write(self.collection, e)),
        }
    }
}

enum WriteOp {
    Create(Value),
    Replace(Value),
    Delete,
}

struct Mirror<T: Tracked> {
    state: LinkState,
    generation: u64,
    records: Vec<T>,
    derived: T::Derived,
    pump: Option<JoinHandle<()>>,
    /// Completion signal of the most recently issued write.
    last_write: Option<oneshot::Receiver<()>>,
}

impl<T: Tracked> Mirror<T> {
    fn new() -> Self {
        Self {
            state: LinkState::Detached,
            generation: 0,
            records: Vec::new(),
            derived: T::derive(&[]),
            pump: None,
            last_write: None,
        }
    }

    /// Recompute derived values; every mutation ends here before unlocking.
    fn settle(&mut self) {
        self.derived = T::derive(&self.records);
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id() == Some(id))
    }

    /// Invalidates the current subscription. Returns whether one was active.
    fn cancel(&mut self) -> bool {
        self.generation += 1;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let was_active = self.state != LinkState::Detached;
        self.state = LinkState::Detached;
        was_active
    }
}

/// Records the reconciler mirrors, and what it keeps derived from them.
trait Tracked: Record {
    type Derived: Clone + Send + 'static;

    fn derive(records: &[Self]) -> Self::Derived;

    /// Final ordering applied to a decoded snapshot.
    fn arrange(records: &mut [Self]);

    fn slot(inner: &Inner) -> &Mutex<Mirror<Self>>;
}

impl Tracked for Course {
    type Derived = GpaSummary;

    fn derive(records: &[Self]) -> GpaSummary {
        gpa::calculate(records)
    }

    fn arrange(_records: &mut [Self]) {}

    fn slot(inner: &Inner) -> &Mutex<Mirror<Self>> {
        &inner.courses
    }
}

impl Tracked for Deadline {
    type Derived = ();

    fn derive(_records: &[Self]) -> Self::Derived {}

    fn arrange(records: &mut [Self]) {
        records.sort_by_key(|d| d.start);
    }

    fn slot(inner: &Inner) -> &Mutex<Mirror<Self>> {
        &inner.deadlines
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    session: AuthSession,
    store: Arc<dyn DocumentStore>,
    courses: Mutex<Mirror<Course>>,
    deadlines: Mutex<Mirror<Deadline>>,
    events: broadcast::Sender<MirrorEvent>,
}

impl Inner {
    fn emit(&self, event: MirrorEvent) {
        let _ = self.events.send(event);
    }

    fn is_current<T: Tracked>(&self, generation: u64) -> bool {
        let mirror = lock(T::slot(self));
        mirror.generation == generation && mirror.state != LinkState::Detached
    }

    fn detach<T: Tracked>(&self) {
        if lock(T::slot(self)).cancel() {
            info!("detached {}", T::COLLECTION);
        }
    }

    fn cancel_if_current<T: Tracked>(&self, generation: u64) {
        let cancelled = {
            let mut mirror = lock(T::slot(self));
            mirror.generation == generation && mirror.cancel()
        };
        if cancelled {
            info!("detached {}", T::COLLECTION);
        }
    }

    /// Detach and forget the mirrored records.
    fn reset<T: Tracked>(&self) {
        let mut mirror = lock(T::slot(self));
        mirror.cancel();
        mirror.records.clear();
        mirror.settle();
    }

    /// Returns false once the subscription is stale and the pump should stop.
    fn apply_snapshot<T: Tracked>(&self, generation: u64, snapshot: Snapshot) -> bool {
        let mut records = Vec::with_capacity(snapshot.len());
        for doc in &snapshot {
            match T::from_document(doc) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping {} document {}: {}", T::COLLECTION, doc.id, e),
            }
        }
        T::arrange(&mut records);
        let count = records.len();

        {
            let mut mirror = lock(T::slot(self));
            if mirror.generation != generation || mirror.state == LinkState::Detached {
                debug!("dropping late {} snapshot", T::COLLECTION);
                return false;
            }
            mirror.records = records;
            mirror.settle();
            mirror.state = LinkState::Live;
        }

        debug!("{} mirror replaced with {} records", T::COLLECTION, count);
        self.emit(MirrorEvent::Replaced {
            collection: T::COLLECTION,
            records: count,
        });
        true
    }

    fn report_feed_failure<T: Tracked>(&self, generation: u64, err: AppError) -> bool {
        if !self.is_current::<T>(generation) {
            return false;
        }
        warn!("{} subscription error, keeping last snapshot: {}", T::COLLECTION, err);
        self.emit(MirrorEvent::SubscriptionFailed {
            collection: T::COLLECTION,
            message: err.to_string(),
        });
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let courses = self.courses.get_mut().unwrap_or_else(PoisonError::into_inner);
        courses.cancel();
        let deadlines = self.deadlines.get_mut().unwrap_or_else(PoisonError::into_inner);
        deadlines.cancel();
    }
}

async fn pump<T: Tracked>(inner: Weak<Inner>, generation: u64, mut feed: SnapshotFeed) {
    while let Some(event) = feed.next().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let still_current = match event {
            Ok(snapshot) => inner.apply_snapshot::<T>(generation, snapshot),
            Err(e) => inner.report_feed_failure::<T>(generation, e),
        };
        if !still_current {
            break;
        }
    }
}

/// In-memory mirror of the signed-in user's courses and deadlines.
///
/// Snapshots from the store replace a collection wholesale; local edits are
/// applied to the mirror first and written to the store in the background.
/// The next snapshot always wins.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(session: AuthSession, store: Arc<dyn DocumentStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                session,
                store,
                courses: Mutex::new(Mirror::new()),
                deadlines: Mutex::new(Mirror::new()),
                events,
            }),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.inner.session
    }

    pub fn events(&self) -> broadcast::Receiver<MirrorEvent> {
        self.inner.events.subscribe()
    }

    pub async fn attach_courses(&self) -> Result<Attachment, AppError> {
        self.attach::<Course>().await
    }

    pub async fn attach_deadlines(&self) -> Result<Attachment, AppError> {
        self.attach::<Deadline>().await
    }

    pub fn detach_courses(&self) {
        self.inner.detach::<Course>();
    }

    pub fn detach_deadlines(&self) {
        self.inner.detach::<Deadline>();
    }

    pub fn detach_all(&self) {
        self.detach_courses();
        self.detach_deadlines();
    }

    pub fn state(&self, collection: Collection) -> LinkState {
        match collection {
            Collection::Courses => lock(&self.inner.courses).state,
            Collection::Deadlines => lock(&self.inner.deadlines).state,
        }
    }

    pub fn courses(&self) -> Vec<Course> {
        lock(&self.inner.courses).records.clone()
    }

    pub fn gpa(&self) -> GpaSummary {
        lock(&self.inner.courses).derived.clone()
    }

    /// Courses and GPA read under one lock.
    pub fn course_view(&self) -> CourseView {
        let mirror = lock(&self.inner.courses);
        CourseView {
            courses: mirror.records.clone(),
            gpa: mirror.derived.clone(),
        }
    }

    pub fn deadlines(&self) -> Vec<Deadline> {
        lock(&self.inner.deadlines).records.clone()
    }

    pub fn filtered_courses(&self, query: &str) -> Vec<Course> {
        let query = query.trim();
        lock(&self.inner.courses)
            .records
            .iter()
            .filter(|c| c.matches(query))
            .cloned()
            .collect()
    }

    pub fn filtered_deadlines(&self, query: &str) -> Vec<Deadline> {
        let query = query.trim();
        lock(&self.inner.deadlines)
            .records
            .iter()
            .filter(|d| d.matches(query))
            .cloned()
            .collect()
    }

    pub fn deadlines_on(&self, date: NaiveDate) -> Vec<Deadline> {
        lock(&self.inner.deadlines)
            .records
            .iter()
            .filter(|d| d.occurs_on(date))
            .cloned()
            .collect()
    }

    /// Adds a course with a store-assigned id. `createdAt` is left for the
    /// store to stamp.
    pub fn create_course(&self, mut course: Course) -> Result<PendingWrite, AppError> {
        course.validate()?;
        let id = self.inner.store.allocate_id();
        course.id = Some(id.clone());
        course.created_at = None;
        let data = course.to_data()?;

        self.mutate::<Course, _>(id, move |mirror| {
            mirror.records.push(course);
            Ok(WriteOp::Create(data))
        })
    }

    /// Full-record replace. Keeps the stored creation time when the
    /// replacement has none.
    pub fn update_course(&self, id: &str, mut course: Course) -> Result<PendingWrite, AppError> {
        course.validate()?;
        let owned_id = id.to_string();
        self.mutate::<Course, _>(id.to_string(), move |mirror| {
            let pos = mirror.position(&owned_id).ok_or(AppError::NotFound)?;
            if course.created_at.is_none() {
                course.created_at = mirror.records[pos].created_at;
            }
            course.id = Some(owned_id);
            let data = course.to_data()?;
            mirror.records[pos] = course;
            Ok(WriteOp::Replace(data))
        })
    }

    pub fn delete_course(&self, id: &str) -> Result<PendingWrite, AppError> {
        self.remove::<Course>(id)
    }

    pub fn create_deadline(&self, mut deadline: Deadline) -> Result<PendingWrite, AppError> {
        deadline.validate()?;
        let id = self.inner.store.allocate_id();
        deadline.id = Some(id.clone());
        let data = deadline.to_data()?;

        self.mutate::<Deadline, _>(id, move |mirror| {
            let pos = mirror.records.partition_point(|d| d.start <= deadline.start);
            mirror.records.insert(pos, deadline);
            Ok(WriteOp::Create(data))
        })
    }

    /// Full-record replace, spliced in at the existing position.
    pub fn update_deadline(&self, id: &str, mut deadline: Deadline) -> Result<PendingWrite, AppError> {
        deadline.validate()?;
        let owned_id = id.to_string();
        self.mutate::<Deadline, _>(id.to_string(), move |mirror| {
            let pos = mirror.position(&owned_id).ok_or(AppError::NotFound)?;
            deadline.id = Some(owned_id);
            let data = deadline.to_data()?;
            mirror.records[pos] = deadline;
            Ok(WriteOp::Replace(data))
        })
    }

    pub fn delete_deadline(&self, id: &str) -> Result<PendingWrite, AppError> {
        self.remove::<Deadline>(id)
    }

    /// Flips the completion flag in the mirror right away, then writes the
    /// whole record.
    pub fn toggle_completion(&self, id: &str) -> Result<PendingWrite, AppError> {
        self.mutate::<Deadline, _>(id.to_string(), |mirror| {
            let pos = mirror.position(id).ok_or(AppError::NotFound)?;
            let mut updated = mirror.records[pos].clone();
            updated.is_completed = !updated.is_completed;
            let data = updated.to_data()?;
            mirror.records[pos] = updated;
            Ok(WriteOp::Replace(data))
        })
    }

    /// Clears both mirrors whenever the signed-in user goes away or changes.
    pub fn watch_session(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut rx = self.inner.session.subscribe();
        let mut current = self.inner.session.current_user();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let next: Option<UserId> = match &*rx.borrow_and_update() {
                    AuthState::SignedIn(user) => Some(user.id.clone()),
                    _ => None,
                };
                if next == current {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if current.is_some() {
                    info!("session changed, resetting mirrors");
                    inner.reset::<Course>();
                    inner.reset::<Deadline>();
                }
                current = next;
            }
        })
    }

    async fn attach<T: Tracked>(&self) -> Result<Attachment, AppError> {
        let user = self.inner.session.require_user()?;
        let events = self.inner.events.subscribe();

        let generation = {
            let mut mirror = lock(T::slot(&self.inner));
            mirror.cancel();
            mirror.state = LinkState::Subscribing;
            mirror.generation
        };
        info!("attaching {} for {}", T::COLLECTION, user);

        let query = CollectionQuery::new(T::COLLECTION).order_by(T::ORDER_BY);
        let feed = match self.inner.store.subscribe(&user, query).await {
            Ok(feed) => feed,
            Err(e) => {
                let err = match e {
                    AppError::Subscription { .. } => e,
                    other => AppError::subscription(T::COLLECTION, other),
                };
                {
                    let mut mirror = lock(T::slot(&self.inner));
                    if mirror.generation == generation {
                        mirror.state = LinkState::Detached;
                    }
                }
                warn!("attach failed: {}", err);
                self.inner.emit(MirrorEvent::SubscriptionFailed {
                    collection: T::COLLECTION,
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let pump = tokio::spawn(pump::<T>(Arc::downgrade(&self.inner), generation, feed));
        {
            let mut mirror = lock(T::slot(&self.inner));
            if mirror.generation == generation {
                mirror.pump = Some(pump);
            } else {
                // detached while subscribing
                pump.abort();
            }
        }

        Ok(Attachment {
            handle: SubscriptionHandle {
                collection: T::COLLECTION,
                generation,
                inner: Arc::downgrade(&self.inner),
            },
            events,
        })
    }

    fn remove<T: Tracked>(&self, id: &str) -> Result<PendingWrite, AppError> {
        self.mutate::<T, _>(id.to_string(), |mirror| {
            let pos = mirror.position(id).ok_or(AppError::NotFound)?;
            mirror.records.remove(pos);
            Ok(WriteOp::Delete)
        })
    }

    /// Applies `change` to the mirror under its lock, then issues the write.
    fn mutate<T, F>(&self, id: String, change: F) -> Result<PendingWrite, AppError>
    where
        T: Tracked,
        F: FnOnce(&mut Mirror<T>) -> Result<WriteOp, AppError>,
    {
        let user = self.inner.session.require_user()?;
        let (done, finished) = oneshot::channel();
        let (op, previous) = {
            let mut mirror = lock(T::slot(&self.inner));
            let op = change(&mut mirror)?;
            mirror.settle();
            (op, mirror.last_write.replace(finished))
        };

        self.inner.emit(MirrorEvent::Mutated {
            collection: T::COLLECTION,
            id: id.clone(),
        });
        Ok(self.spawn_write(user, T::COLLECTION, id, op, previous, done))
    }

    fn spawn_write(
        &self,
        user: UserId,
        collection: Collection,
        id: String,
        op: WriteOp,
        previous: Option<oneshot::Receiver<()>>,
        done: oneshot::Sender<()>,
    ) -> PendingWrite {
        let store = self.inner.store.clone();
        let events = self.inner.events.clone();
        let document_id = id.clone();

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                // resolves on completion or when the earlier task is gone
                let _ = previous.await;
            }

            let result = match op {
                WriteOp::Create(data) => store.create(&user, collection, &id, data).await,
                WriteOp::Replace(data) => store.replace(&user, collection, &id, data).await,
                WriteOp::Delete => store.delete(&user, collection, &id).await,
            };
            let _ = done.send(());

            result.map_err(|e| {
                warn!("write to {}/{} failed, not retrying: {}", collection, id, e);
                let _ = events.send(MirrorEvent::WriteFailed {
                    collection,
                    id: id.clone(),
                    message: e.to_string(),
                });
                AppError::remote_write(collection, e)
            })
        });

        PendingWrite {
            collection,
            document_id,
            handle,
        }
    }
}
