// ============================================================================
// TASKS.RS - Background Task Execution
// ============================================================================
//
// Each spawned task runs its work on its own worker thread. Workers report
// back over one mpsc channel; the control thread drains it on every tick and
// runs the task's cleanup actions there, because only the control thread may
// touch rendering state.
//
// LOCKING:
// spawn() locks the command router before the worker starts. The last task
// to finish unlocks it. While anything is live, user commands that could
// mutate the analysis state are answered by the busy handler instead.
// ============================================================================

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{SessionError, SessionResult};
use crate::logging::REPORTED;
use crate::output::OutputWriter;
use crate::router::{CommandArgs, CommandRouter, Handler};

pub type TaskId = u64;

/// The unit of work. Runs on a worker thread and must only touch the shared
/// analysis state it captured.
pub type Work = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Runs on the control thread after the work returned, success or not.
pub type CleanupAction<C> = Box<dyn FnOnce(&mut C)>;

/// Work plus cleanup, as produced by a task-backed command.
pub struct TaskSpec<C> {
    pub work: Work,
    pub cleanup: Vec<CleanupAction<C>>,
}

impl<C> TaskSpec<C> {
    pub fn new(work: Work) -> Self {
        Self { work, cleanup: Vec::new() }
    }

    pub fn then(mut self, action: impl FnOnce(&mut C) + 'static) -> Self {
        self.cleanup.push(Box::new(action));
        self
    }
}

/// Carries a worker's result to its cleanup. State that render code reads
/// is only changed there, on the control thread.
pub struct Handoff<T>(Arc<Mutex<Option<T>>>);

impl<T> Handoff<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn put(&self, value: T) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// `None` when the work failed before handing anything over.
    pub fn take(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct Task<C> {
    id: TaskId,
    name: String,
    started: Instant,
    cleanup: Vec<CleanupAction<C>>,
    done: bool,
}

/// Public view of a live task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
}

struct Completion {
    id: TaskId,
    outcome: Result<(), String>,
}

/// Context that owns a runner and the router it locks.
///
/// Cleanup actions receive the whole context, so the runner is reached
/// through this trait instead of being borrowed for the whole drain.
pub trait TaskHost: Sized + 'static {
    fn tasks(&mut self) -> (&mut TaskRunner<Self>, &mut CommandRouter<Self>);
}

pub struct TaskRunner<C> {
    next_id: TaskId,
    live: Vec<Task<C>>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    output: OutputWriter,
}

impl<C: TaskHost> TaskRunner<C> {
    pub fn new(output: OutputWriter) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            next_id: 1,
            live: Vec::new(),
            tx,
            rx,
            output,
        }
    }

    /// Lock the router, register the task and start its worker. Never blocks.
    pub fn spawn(
        &mut self,
        router: &mut CommandRouter<C>,
        name: &str,
        spec: TaskSpec<C>,
    ) -> SessionResult<TaskId> {
        router.lock();

        let id = self.next_id;
        self.next_id += 1;
        self.live.push(Task {
            id,
            name: name.to_string(),
            started: Instant::now(),
            cleanup: spec.cleanup,
            done: false,
        });

        let tx = self.tx.clone();
        let work = spec.work;
        let spawned = thread::Builder::new()
            .name(format!("task-{}", name))
            .spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{:#}", e)),
                    Err(payload) => Err(panic_message(payload.as_ref())),
                };
                // Receiver gone means the session is shutting down
                tx.send(Completion { id, outcome }).ok();
            });

        if let Err(source) = spawned {
            self.live.retain(|t| t.id != id);
            if self.live.is_empty() {
                router.unlock();
            }
            return Err(SessionError::WorkerSpawn { name: name.to_string(), source });
        }

        log::info!("Started task '{}' (#{})", name, id);
        self.check_lock_state(router);
        Ok(id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    pub fn live_tasks(&self) -> Vec<TaskInfo> {
        self.live
            .iter()
            .map(|t| TaskInfo { id: t.id, name: t.name.clone() })
            .collect()
    }

    pub fn live_task_names(&self) -> Vec<String> {
        self.live.iter().map(|t| t.name.clone()).collect()
    }

    /// Finish every task whose worker has reported back. Returns how many
    /// tasks were finished.
    pub fn pump(host: &mut C) -> usize {
        let mut finished = 0;
        loop {
            let next = host.tasks().0.rx.try_recv();
            match next {
                Ok(completion) => {
                    Self::finish(host, completion);
                    finished += 1;
                }
                Err(_) => break,
            }
        }
        finished
    }

    /// Like [`pump`](Self::pump), but first waits up to `timeout` for one
    /// completion when none is pending.
    pub fn pump_timeout(host: &mut C, timeout: Duration) -> usize {
        if host.tasks().0.is_idle() {
            return 0;
        }
        let first = host.tasks().0.rx.recv_timeout(timeout);
        match first {
            Ok(completion) => {
                Self::finish(host, completion);
                1 + Self::pump(host)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn finish(host: &mut C, completion: Completion) {
        let (name, elapsed, cleanup) = {
            let (runner, _) = host.tasks();
            let Some(task) = runner.live.iter_mut().find(|t| t.id == completion.id) else {
                log::warn!("Completion for unknown task #{}", completion.id);
                return;
            };
            task.done = true;
            (task.name.clone(), task.started.elapsed(), std::mem::take(&mut task.cleanup))
        };

        match &completion.outcome {
            Ok(()) => log::info!("Task '{}' finished in {:.2?}", name, elapsed),
            Err(reason) => {
                let err = SessionError::TaskFailure { name: name.clone(), reason: reason.clone() };
                log::error!(target: REPORTED, "{}", err);
                host.tasks().0.output.line(&err.to_string());
            }
        }

        // Cleanup runs even for failed tasks: a best-effort refresh.
        for action in cleanup {
            action(host);
        }

        let (runner, router) = host.tasks();
        runner.live.retain(|t| !(t.id == completion.id && t.done));
        if runner.live.is_empty() {
            router.unlock();
        }
        runner.check_lock_state(router);
    }

    /// The router must be locked exactly while tasks are live. Anything else
    /// is a bookkeeping bug, not a runtime condition.
    fn check_lock_state(&self, router: &CommandRouter<C>) {
        assert_eq!(
            router.is_locked(),
            !self.live.is_empty(),
            "command router lock state disagrees with {} live task(s): {:?}",
            self.live.len(),
            self.live_task_names(),
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Turn a task preparation step into a command handler that spawns it.
///
/// `prepare` runs on the control thread: it validates the request, captures
/// what the worker needs and returns the work with its cleanup actions. An
/// error from `prepare` is returned without locking anything.
pub fn wrap_with_task<C, F>(prepare: F) -> Handler<C>
where
    C: TaskHost,
    F: Fn(&mut C, &CommandArgs) -> SessionResult<TaskSpec<C>> + 'static,
{
    Rc::new(move |host: &mut C, name: &str, args: &CommandArgs| {
        let spec = prepare(host, args)?;
        let (runner, router) = host.tasks();
        runner.spawn(router, name, spec)?;
        Ok(())
    })
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputMultiplexer;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Host {
        runner: TaskRunner<Host>,
        router: CommandRouter<Host>,
        log: Vec<String>,
        busy_reports: Vec<String>,
    }

    impl TaskHost for Host {
        fn tasks(&mut self) -> (&mut TaskRunner<Self>, &mut CommandRouter<Self>) {
            (&mut self.runner, &mut self.router)
        }
    }

    fn host(mux: &OutputMultiplexer) -> Host {
        let busy: Handler<Host> = Rc::new(|h: &mut Host, name: &str, _: &CommandArgs| {
            let report = format!(
                "busy, command '{}' ignored, active tasks: [{}]",
                name,
                h.runner.live_task_names().join(", ")
            );
            h.busy_reports.push(report);
            Ok(())
        });
        Host {
            runner: TaskRunner::new(mux.writer()),
            router: CommandRouter::new(busy),
            log: Vec::new(),
            busy_reports: Vec::new(),
        }
    }

    /// Work that blocks until the returned sender fires.
    fn gated(result: anyhow::Result<()>) -> (Work, Sender<()>) {
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let work: Work = Box::new(move || {
            go_rx.recv().ok();
            result
        });
        (work, go_tx)
    }

    fn settle(h: &mut Host, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut done = 0;
        while done < expected && Instant::now() < deadline {
            done += TaskRunner::pump_timeout(h, Duration::from_millis(50));
        }
        assert_eq!(done, expected, "tasks did not finish in time");
    }

    #[test]
    fn spawn_locks_and_last_finisher_unlocks() {
        let mux = OutputMultiplexer::new();
        let mut h = host(&mux);

        let (w1, go1) = gated(Ok(()));
        let (w2, go2) = gated(Ok(()));
        let spec1 = TaskSpec::new(w1).then(|h: &mut Host| h.log.push("first".into()));
        let spec2 = TaskSpec::new(w2).then(|h: &mut Host| h.log.push("second".into()));
        h.runner.spawn(&mut h.router, "load", spec1).unwrap();
        h.runner.spawn(&mut h.router, "load", spec2).unwrap();
        assert!(h.router.is_locked());
        assert_eq!(h.runner.live_count(), 2);

        go1.send(()).unwrap();
        settle(&mut h, 1);
        assert!(h.router.is_locked());
        assert_eq!(h.log, vec!["first"]);

        go2.send(()).unwrap();
        settle(&mut h, 1);
        assert!(!h.router.is_locked());
        assert_eq!(h.router.stats().unlocks, 1);
        assert_eq!(h.log, vec!["first", "second"]);
    }

    #[test]
    fn failed_task_still_cleans_up_and_reports() {
        let mut mux = OutputMultiplexer::new();
        let seen = Rc::new(std::cell::RefCell::new(String::new()));
        let sink = seen.clone();
        mux.set_consumer(Box::new(move |t| sink.borrow_mut().push_str(t)));
        let mut h = host(&mux);

        let (work, go) = gated(Err(anyhow::anyhow!("disk on fire")));
        let spec = TaskSpec::new(work).then(|h: &mut Host| h.log.push("refreshed".into()));
        h.runner.spawn(&mut h.router, "classify", spec).unwrap();
        go.send(()).unwrap();
        settle(&mut h, 1);

        assert_eq!(h.log, vec!["refreshed"]);
        assert!(!h.router.is_locked());
        mux.flush();
        assert!(seen.borrow().contains("task 'classify' failed: disk on fire"));
    }

    #[test]
    fn panicking_worker_does_not_keep_lock() {
        let mux = OutputMultiplexer::new();
        let mut h = host(&mux);
        let spec: TaskSpec<Host> = TaskSpec::new(Box::new(|| -> anyhow::Result<()> { panic!("boom") }));
        h.runner.spawn(&mut h.router, "train", spec).unwrap();
        settle(&mut h, 1);
        assert!(!h.router.is_locked());
        assert!(h.runner.is_idle());
    }

    #[test]
    fn cleanup_sees_completed_work() {
        let mux = OutputMultiplexer::new();
        let mut h = host(&mux);
        let shared = Arc::new(Mutex::new(Vec::<u32>::new()));

        let writer = shared.clone();
        let reader = shared.clone();
        let spec = TaskSpec::new(Box::new(move || {
            let mut v = writer.lock().unwrap();
            v.extend(0..100);
            Ok(())
        }))
        .then(move |h: &mut Host| {
            let n = reader.lock().unwrap().len();
            h.log.push(format!("saw {}", n));
        });
        h.runner.spawn(&mut h.router, "motifs", spec).unwrap();
        settle(&mut h, 1);
        assert_eq!(h.log, vec!["saw 100"]);
    }

    #[test]
    fn handoff_reaches_cleanup_only_on_success() {
        let mux = OutputMultiplexer::new();
        let mut h = host(&mux);
        for (name, fail) in [("classify", false), ("restore", true)] {
            let result = Handoff::new();
            let slot = result.clone();
            let spec = TaskSpec::new(Box::new(move || {
                anyhow::ensure!(!fail, "unreadable");
                slot.put(7u32);
                Ok(())
            }))
            .then(move |h: &mut Host| h.log.push(format!("{:?}", result.take())));
            h.runner.spawn(&mut h.router, name, spec).unwrap();
            settle(&mut h, 1);
        }
        assert_eq!(h.log, vec!["Some(7)", "None"]);
    }

    #[test]
    fn wrapped_command_spawns_and_busy_reports_tasks() {
        let mux = OutputMultiplexer::new();
        let mut h = host(&mux);
        let gate = Rc::new(std::cell::RefCell::new(None::<Sender<()>>));

        let gate_in = gate.clone();
        h.router.register(
            "train",
            wrap_with_task(move |_h: &mut Host, _args: &CommandArgs| {
                let (work, go) = gated(Ok(()));
                *gate_in.borrow_mut() = Some(go);
                Ok(TaskSpec::new(work))
            }),
        );
        h.router.register(
            "refuse",
            wrap_with_task(|_h: &mut Host, _args: &CommandArgs| {
                Err(SessionError::MissingActiveRecord("refuse".into()))
            }),
        );

        let handler = h.router.resolve("refuse").unwrap();
        assert!(handler(&mut h, "refuse", &CommandArgs::none()).is_err());
        assert!(!h.router.is_locked());

        let handler = h.router.resolve("train").unwrap();
        handler(&mut h, "train", &CommandArgs::none()).unwrap();
        assert!(h.router.is_locked());

        let handler = h.router.resolve("refuse").unwrap();
        handler(&mut h, "refuse", &CommandArgs::none()).unwrap();
        assert_eq!(h.busy_reports, vec!["busy, command 'refuse' ignored, active tasks: [train]"]);

        gate.borrow_mut().take().unwrap().send(()).unwrap();
        settle(&mut h, 1);
        assert!(!h.router.is_locked());
    }

    #[test]
    fn random_spawn_orders_keep_lock_in_step() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _round in 0..20 {
            let mux = OutputMultiplexer::new();
            let mut h = host(&mux);
            let mut gates: Vec<Sender<()>> = Vec::new();
            let mut transitions_to_idle: u64 = 0;

            for _step in 0..12 {
                let spawn = gates.is_empty() || rng.random_bool(0.5);
                if spawn {
                    let (work, go) = gated(Ok(()));
                    h.runner.spawn(&mut h.router, "job", TaskSpec::new(work)).unwrap();
                    gates.push(go);
                } else {
                    let idx = rng.random_range(0..gates.len());
                    gates.swap_remove(idx).send(()).unwrap();
                    settle(&mut h, 1);
                    if h.runner.is_idle() {
                        transitions_to_idle += 1;
                    }
                }
                assert_eq!(h.router.is_locked(), h.runner.live_count() > 0);
            }
            for go in gates.drain(..) {
                go.send(()).unwrap();
                settle(&mut h, 1);
                if h.runner.is_idle() {
                    transitions_to_idle += 1;
                }
            }
            assert!(!h.router.is_locked());
            assert_eq!(h.router.stats().unlocks, transitions_to_idle);
            assert_eq!(h.router.stats().locks, h.router.stats().unlocks);
        }
    }
}
