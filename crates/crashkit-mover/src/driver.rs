//! The fetch-transform-save pipeline.
//!
//! The job source polls `enumerate_new` on the new-crash store and hands
//! each id to the task engine. Each task fetches the raw crash and its
//! dumps from the source store, runs the transform and saves the result to
//! the destination. A failed item is logged by the engine and dropped;
//! nothing is retried.
//!
//! Ids the engine took but never ran because of a stop are put back into
//! the new-crash store with `mark_new`, so the next run picks them up.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crashkit_store::{open_store, CrashIdStream, CrashStore};
use crashkit_tasks::{TaskConfig, TaskEngine, TaskStats};
use crashkit_types::CrashId;

use crate::config::{MoverConfig, Submissions};
use crate::error::MoverResult;
use crate::transform::{IdentityTransform, Transform};

/// Moves one crash at a time. Cheap to clone; every clone shares the same
/// stores.
#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn CrashStore>,
    destination: Arc<dyn CrashStore>,
    transform: Arc<dyn Transform>,
}

impl Pipeline {
    /// Fetch, transform and save one crash.
    pub fn move_crash(&self, id: &CrashId) -> MoverResult<()> {
        let raw = self.source.get_raw(id)?;
        let dumps = self.source.get_dumps(id)?;
        let (raw, dumps) = self.transform.transform(id, raw, dumps)?;
        self.destination.save_raw(id, &raw, &dumps)?;
        debug!(crash_id = %id, dumps = dumps.len(), "crash moved");
        Ok(())
    }
}

/// Drives a [`Pipeline`] with a [`TaskEngine`].
pub struct CrashMover {
    pipeline: Pipeline,
    new_crashes: Arc<dyn CrashStore>,
    submissions: Submissions,
    tasks: TaskConfig,
}

impl CrashMover {
    /// Copy new crashes from `source` to `destination` unchanged.
    pub fn new(source: Arc<dyn CrashStore>, destination: Arc<dyn CrashStore>) -> Self {
        Self {
            new_crashes: Arc::clone(&source),
            pipeline: Pipeline {
                source,
                destination,
                transform: Arc::new(IdentityTransform),
            },
            submissions: Submissions::default(),
            tasks: TaskConfig::default(),
        }
    }

    /// Open the stores named in `config`.
    pub fn from_config(config: &MoverConfig) -> MoverResult<Self> {
        config.validate()?;
        let source = open_store(&config.source)?;
        let destination = open_store(&config.destination)?;
        let mut mover = Self::new(source, destination)
            .with_submissions(config.number_of_submissions)
            .with_task_config(config.tasks.clone());
        if let Some(new_crashes) = &config.new_crash_source {
            mover = mover.with_new_crash_source(open_store(new_crashes)?);
        }
        Ok(mover)
    }

    /// Enumerate new crashes from `store` instead of the source store.
    pub fn with_new_crash_source(mut self, store: Arc<dyn CrashStore>) -> Self {
        self.new_crashes = store;
        self
    }

    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.pipeline.transform = Arc::new(transform);
        self
    }

    pub fn with_submissions(mut self, submissions: Submissions) -> Self {
        self.submissions = submissions;
        self
    }

    pub fn with_task_config(mut self, tasks: TaskConfig) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The job source: new crash ids, with a `None` after every
    /// enumeration pass so the engine idles between polls.
    pub fn job_source(&self) -> NewCrashSource {
        NewCrashSource::new(Arc::clone(&self.new_crashes), self.submissions)
    }

    /// An engine wired to this mover, not yet started. Use its
    /// [`stop_handle`](TaskEngine::stop_handle) to stop a `Forever` run.
    pub fn engine(&self) -> MoverResult<TaskEngine<CrashId>> {
        let pipeline = self.pipeline.clone();
        let new_crashes = Arc::clone(&self.new_crashes);
        let engine = TaskEngine::new(self.tasks.clone(), self.job_source(), move |id: CrashId| {
            pipeline.move_crash(&id)
        })?
        .on_undispatched(move |id| return_to_new(new_crashes.as_ref(), &id));
        Ok(engine)
    }

    /// Run until the job source ends.
    pub fn run(&self) -> MoverResult<TaskStats> {
        info!(
            from = self.pipeline.source.kind(),
            to = self.pipeline.destination.kind(),
            submissions = %self.submissions,
            "starting crash mover"
        );
        let stats = self.engine()?.blocking_run()?;
        Ok(stats)
    }
}

impl std::fmt::Debug for CrashMover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashMover")
            .field("source", &self.pipeline.source.kind())
            .field("destination", &self.pipeline.destination.kind())
            .field("new_crashes", &self.new_crashes.kind())
            .field("submissions", &self.submissions)
            .finish()
    }
}

fn return_to_new(store: &dyn CrashStore, id: &CrashId) {
    match store.mark_new(id) {
        Ok(()) => info!(crash_id = %id, "crash not moved before stop; marked new again"),
        Err(e) => error!(
            crash_id = %id,
            store = store.kind(),
            error = %e,
            "crash not moved before stop and cannot be marked new"
        ),
    }
}

/// Endless (or limited) stream of new crash ids.
///
/// Yields `Some(id)` for each crash and `None` once after every
/// enumeration pass. Ends after the first pass with [`Submissions::All`]
/// and after the last allowed id with [`Submissions::Count`].
pub struct NewCrashSource {
    store: Arc<dyn CrashStore>,
    submissions: Submissions,
    current: Option<CrashIdStream>,
    submitted: u64,
    passes: u64,
}

impl NewCrashSource {
    pub fn new(store: Arc<dyn CrashStore>, submissions: Submissions) -> Self {
        Self {
            store,
            submissions,
            current: None,
            submitted: 0,
            passes: 0,
        }
    }

    /// Ids yielded so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    fn limit_reached(&self) -> bool {
        match self.submissions {
            Submissions::Count(n) => self.submitted >= n.get(),
            Submissions::All => self.passes >= 1 && self.current.is_none(),
            Submissions::Forever => false,
        }
    }
}

impl Iterator for NewCrashSource {
    type Item = Option<CrashId>;

    fn next(&mut self) -> Option<Option<CrashId>> {
        if self.limit_reached() {
            self.current = None;
            return None;
        }
        if let Some(stream) = self.current.as_mut() {
            if let Some(id) = stream.next() {
                self.submitted += 1;
                return Some(Some(id));
            }
            // Pass finished.
            self.current = None;
            self.passes += 1;
            debug!(passes = self.passes, submitted = self.submitted, "enumeration pass done");
            if self.limit_reached() {
                return None;
            }
            return Some(None);
        }
        match self.store.enumerate_new() {
            Ok(stream) => {
                self.current = Some(stream);
                self.next()
            }
            Err(e) => {
                warn!(store = self.store.kind(), error = %e, "cannot enumerate new crashes");
                self.passes += 1;
                if self.limit_reached() {
                    return None;
                }
                Some(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MoverError, MoverResult};
    use crashkit_store::{InMemoryCrashStore, NullCrashStore, StoreError};
    use crashkit_types::{DumpMap, ProcessedCrash, RawCrash};
    use serde_json::json;
    use std::num::NonZeroU64;

    fn id(s: &str) -> CrashId {
        CrashId::parse(s).unwrap()
    }

    fn seeded(names: &[&str]) -> Arc<InMemoryCrashStore> {
        let store = Arc::new(InMemoryCrashStore::new());
        for name in names {
            let raw = json!({"ooid": name}).as_object().cloned().unwrap();
            store
                .save_raw(&id(name), &raw, &DumpMap::single(name.as_bytes().to_vec()))
                .unwrap();
        }
        store
    }

    fn quick_tasks() -> TaskConfig {
        TaskConfig {
            number_of_threads: 2,
            maximum_queue_size: 2,
            idle_delay: 0.01,
            quit_on_empty_queue: false,
        }
    }

    // -----------------------------------------------------------------------
    // Job source
    // -----------------------------------------------------------------------

    #[test]
    fn forever_source_idles_between_passes() {
        let store = seeded(&["a1", "b2"]);
        let mut source = NewCrashSource::new(store.clone(), Submissions::Forever);
        assert_eq!(source.next(), Some(Some(id("a1"))));
        assert_eq!(source.next(), Some(Some(id("b2"))));
        assert_eq!(source.next(), Some(None));
        assert_eq!(source.next(), Some(None));

        store
            .save_raw(&id("c3"), &RawCrash::new(), &DumpMap::new())
            .unwrap();
        assert_eq!(source.next(), Some(Some(id("c3"))));
        assert_eq!(source.submitted(), 3);
    }

    #[test]
    fn all_source_ends_after_one_pass() {
        let store = seeded(&["a1", "b2"]);
        let source = NewCrashSource::new(store, Submissions::All);
        let items: Vec<_> = source.collect();
        assert_eq!(items, vec![Some(id("a1")), Some(id("b2"))]);
    }

    #[test]
    fn count_source_stops_at_limit() {
        let store = seeded(&["a1", "b2", "c3"]);
        let source = NewCrashSource::new(store, Submissions::Count(NonZeroU64::new(2).unwrap()));
        let items: Vec<_> = source.collect();
        assert_eq!(items, vec![Some(id("a1")), Some(id("b2"))]);
    }

    #[test]
    fn enumeration_errors_become_idle_ticks() {
        struct Broken;
        impl CrashStore for Broken {
            fn kind(&self) -> &'static str {
                "broken"
            }
            fn save_raw(&self, _: &CrashId, _: &RawCrash, _: &DumpMap) -> crashkit_store::StoreResult<()> {
                Ok(())
            }
            fn save_processed(&self, _: &CrashId, _: &ProcessedCrash) -> crashkit_store::StoreResult<()> {
                Ok(())
            }
            fn get_raw(&self, id: &CrashId) -> crashkit_store::StoreResult<RawCrash> {
                Err(StoreError::NotFound(id.clone()))
            }
            fn get_dump(&self, id: &CrashId, _: Option<&str>) -> crashkit_store::StoreResult<Vec<u8>> {
                Err(StoreError::NotFound(id.clone()))
            }
            fn get_dumps(&self, id: &CrashId) -> crashkit_store::StoreResult<DumpMap> {
                Err(StoreError::NotFound(id.clone()))
            }
            fn get_unredacted_processed(&self, id: &CrashId) -> crashkit_store::StoreResult<ProcessedCrash> {
                Err(StoreError::NotFound(id.clone()))
            }
            fn remove(&self, id: &CrashId) -> crashkit_store::StoreResult<()> {
                Err(StoreError::NotFound(id.clone()))
            }
            fn enumerate_new(&self) -> crashkit_store::StoreResult<CrashIdStream> {
                Err(StoreError::io("/broken", std::io::Error::other("offline")))
            }
        }

        let mut forever = NewCrashSource::new(Arc::new(Broken), Submissions::Forever);
        assert_eq!(forever.next(), Some(None));
        assert_eq!(forever.next(), Some(None));
        let mut once = NewCrashSource::new(Arc::new(Broken), Submissions::All);
        assert_eq!(once.next(), None);
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    #[test]
    fn moves_every_new_crash() {
        let source = seeded(&["a1", "b2", "c3", "d4"]);
        let destination = Arc::new(InMemoryCrashStore::new());
        let stats = CrashMover::new(source.clone(), destination.clone())
            .with_submissions(Submissions::All)
            .with_task_config(quick_tasks())
            .run()
            .unwrap();

        assert_eq!(stats.succeeded, 4);
        assert_eq!(destination.all_ids(), source.all_ids());
        for crash in source.all_ids() {
            assert_eq!(destination.get_raw(&crash).unwrap(), source.get_raw(&crash).unwrap());
            assert_eq!(destination.get_dumps(&crash).unwrap(), source.get_dumps(&crash).unwrap());
        }
    }

    #[test]
    fn transform_failures_drop_only_that_crash() {
        let source = seeded(&["a1", "bad", "c3"]);
        let destination = Arc::new(InMemoryCrashStore::new());
        let stats = CrashMover::new(source, destination.clone())
            .with_submissions(Submissions::All)
            .with_task_config(quick_tasks())
            .with_transform(|id: &CrashId, raw: RawCrash, dumps: DumpMap| {
                if id.as_str() == "bad" {
                    return Err(MoverError::Transform {
                        id: id.clone(),
                        reason: "rejected".into(),
                    });
                }
                Ok((raw, dumps))
            })
            .run()
            .unwrap();

        assert_eq!(stats.dispatched, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(destination.all_ids(), vec![id("a1"), id("c3")]);
    }

    #[test]
    fn separate_new_crash_source() {
        let source = seeded(&["a1", "b2"]);
        let announcer = Arc::new(InMemoryCrashStore::new());
        announcer
            .save_raw(&id("b2"), &RawCrash::new(), &DumpMap::new())
            .unwrap();
        let destination = Arc::new(InMemoryCrashStore::new());

        CrashMover::new(source, destination.clone())
            .with_new_crash_source(announcer)
            .with_submissions(Submissions::All)
            .with_task_config(quick_tasks())
            .run()
            .unwrap();
        assert_eq!(destination.all_ids(), vec![id("b2")]);
        assert_eq!(destination.get_dump(&id("b2"), None).unwrap(), b"b2");
    }

    #[test]
    fn forever_run_stops_on_request() {
        let source = seeded(&["a1"]);
        let mover = CrashMover::new(source, Arc::new(NullCrashStore::new()))
            .with_task_config(quick_tasks());
        let mut engine = mover.engine().unwrap();
        let stop = engine.stop_handle();
        engine.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        stop.stop();
        let stats = engine.wait_for_completion().unwrap();
        assert_eq!(stats.succeeded, 1);
    }

    #[test]
    fn stop_returns_untouched_crashes_to_the_new_queue() {
        let names = ["a1", "b2", "c3", "d4", "e5", "f6"];
        let source = seeded(&names);
        let destination = Arc::new(InMemoryCrashStore::new());
        let mover = CrashMover::new(source.clone(), destination.clone())
            .with_transform(
                |_: &CrashId, raw: RawCrash, dumps: DumpMap| -> MoverResult<(RawCrash, DumpMap)> {
                    std::thread::sleep(std::time::Duration::from_millis(150));
                    Ok((raw, dumps))
                },
            )
            .with_task_config(TaskConfig {
                number_of_threads: 1,
                ..quick_tasks()
            });
        let mut engine = mover.engine().unwrap();
        engine.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        engine.stop();
        let stats = engine.wait_for_completion().unwrap();

        // One running, two queued, one held by the producer.
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.undispatched, 3);
        assert_eq!(destination.len() + source.pending_new(), names.len());
    }

    #[test]
    fn missing_source_crash_is_an_error() {
        let mover = CrashMover::new(
            Arc::new(InMemoryCrashStore::new()),
            Arc::new(InMemoryCrashStore::new()),
        );
        let err = mover.pipeline().move_crash(&id("zz9")).unwrap_err();
        assert!(matches!(err, MoverError::Store(StoreError::NotFound(_))));
    }
}
