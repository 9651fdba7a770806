//! The scheduler loop (spec.md §4.1), grounded on
//! `examples/original_source/coop/cooperator.h`/`.cpp`. One `Cooperator` owns exactly one OS
//! thread: an all-contexts list, a by-state split (yielded/blocked), the currently-scheduled
//! context (if any), the stack pool, the timer wheel, and (once `run()` starts) the io_uring ring.
//! Everything above is touched only from that thread; cross-thread submission and shutdown use
//! their own synchronization (see [`SubmissionQueue`] and the `shutdown` flag below).

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;

use crate::arch::{self, SwitchResult};
use crate::config::{CooperatorConfig, SpawnConfiguration};
use crate::context::{Context, ContextState, Handle};
use crate::io::Ring;
use crate::list::List;
use crate::stack::StackPool;
use crate::timer::TimerWheel;

/// How many contexts `main_loop` runs per pass before checking the I/O ring again, matching
/// spec.md §4.1 step 3's "drain up to N contexts, polling between each" bound.
const CONTEXTS_PER_POLL: usize = 16;

/// A bare counting semaphore: `std` has no such primitive, and the example pack doesn't carry
/// one either, so this is hand-rolled directly on `Mutex`+`Condvar` the way the standard library
/// documents building one.
struct Semaphore {
    count: Mutex<i64>,
    cv: Condvar,
}

impl Semaphore {
    fn new(initial: i64) -> Self {
        Self { count: Mutex::new(initial), cv: Condvar::new() }
    }

    fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count <= 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn try_acquire(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }
}

type SubmittedJob = (Box<dyn FnOnce() + Send + 'static>, SpawnConfiguration);

/// Cross-thread inbox a `Cooperator` drains from its own thread. Two semaphores bound it
/// (`free_slots` prevents unbounded growth, `items_available` lets the loop block on it when
/// idle) — the same chain-release-on-shutdown shape as
/// `examples/original_source/coop/cooperator.cpp`'s `Submit`, just expressed with `std`
/// primitives instead of hand-rolled futexes.
struct SubmissionQueue {
    free_slots: Semaphore,
    items_available: Semaphore,
    queue: Mutex<VecDeque<SubmittedJob>>,
}

impl SubmissionQueue {
    fn new(depth: usize) -> Self {
        Self {
            free_slots: Semaphore::new(depth as i64),
            items_available: Semaphore::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

/// Internal Send wrapper used only to move a leaked `Cooperator` pointer into its owning
/// `std::thread::spawn` closure.
struct SendPtr(NonNull<Cooperator>);
unsafe impl Send for SendPtr {}

mod registry {
    use std::ptr::NonNull;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::Cooperator;

    struct Entry(NonNull<Cooperator>);
    unsafe impl Send for Entry {}

    static GATE: AtomicBool = AtomicBool::new(false);
    static LIVE: Mutex<Vec<Entry>> = Mutex::new(Vec::new());

    /// Register a newly launched cooperator. Returns `false` (refusing registration) if a
    /// process-wide shutdown is in effect — mirrors `examples/original_source/coop/cooperator.cpp`
    /// refusing to `Launch` after `ShutdownAll`.
    pub(super) fn register(coop: NonNull<Cooperator>) -> bool {
        let mut live = LIVE.lock().unwrap();
        if GATE.load(Ordering::Acquire) {
            return false;
        }
        live.push(Entry(coop));
        true
    }

    pub(super) fn unregister(coop: NonNull<Cooperator>) {
        let mut live = LIVE.lock().unwrap();
        live.retain(|e| e.0 != coop);
    }

    /// Shut down every currently-registered cooperator and block future `Launch`es.
    pub fn shutdown_all() {
        GATE.store(true, Ordering::Release);
        let live = LIVE.lock().unwrap();
        for e in live.iter() {
            unsafe { e.0.as_ref().shutdown() };
        }
    }

    /// Allow future launches again. Panics if any cooperator is still registered — callers must
    /// join every `JoinHandle` returned by `launch` first.
    pub fn reset_global_shutdown() {
        let live = LIVE.lock().unwrap();
        assert!(live.is_empty(), "reset_global_shutdown called with cooperators still registered");
        GATE.store(false, Ordering::Release);
    }
}

pub use registry::{reset_global_shutdown, shutdown_all};

/// An object constructed on a freshly spawned context's own stack, whose `launch` method becomes
/// that context's entire body — generalizes `examples/original_source/coop/launchable.h`'s
/// `Launchable` interface (`Ticker`, the uring pump, and user services all implement it there).
/// Rust's ordinary drop glue plays the role the original gets from placement-new at the bottom of
/// the stack: `T` simply lives in the spawned closure's frame and is dropped when `launch`
/// returns.
pub trait Launchable {
    fn launch(&mut self);
}

/// Spawn `value` as a new context whose entire body is `value.launch()`.
pub fn launch<T: Launchable + 'static>(mut value: T) -> bool {
    crate::current::spawn(move || value.launch())
}

/// One cooperator: the scheduler owning a single OS thread. See the module doc for the
/// thread-confinement rules.
pub struct Cooperator {
    name: Box<str>,
    config: CooperatorConfig,

    all_contexts: List<Context>,
    yielded: List<Context>,
    blocked: List<Context>,
    scheduled: Option<NonNull<Context>>,

    /// A list-invisible bookkeeping context representing the cooperator's own thread. Used
    /// anywhere cooperator-driven code (ring polling, timer advance, the shutdown kill sweep)
    /// needs to satisfy a `ctx: NonNull<Context>` parameter with no user context actually
    /// running — `Context::unblock`/`Coordinator::release(_, schedule = false)` read `.cooperator()`
    /// off it but never otherwise touch it. Set once by `run()`, before `main_loop` starts.
    root: Option<NonNull<Context>>,

    /// Resumption point for `context_switch` calls made *into* a context — i.e. what the loop
    /// itself switches back to when a context yields, blocks, or exits.
    sp: *mut u8,

    stack_pool: StackPool,
    timer_wheel: TimerWheel,
    ring: Option<Ring>,

    shutdown: AtomicBool,
    shutdown_sweep_done: bool,
    submission: SubmissionQueue,
}

/// A `Send + Sync` external reference to a launched cooperator, returned by [`Cooperator::launch`]
/// alongside the thread's `JoinHandle`. Exposes only the cross-thread-safe surface
/// (`submit`/`shutdown`/`is_shutting_down`); everything else requires actually running on the
/// cooperator's own thread.
#[derive(Clone, Copy)]
pub struct CooperatorHandle(NonNull<Cooperator>);

unsafe impl Send for CooperatorHandle {}
unsafe impl Sync for CooperatorHandle {}

impl CooperatorHandle {
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.submit_with_config(SpawnConfiguration::default(), f)
    }

    pub fn submit_with_config(&self, config: SpawnConfiguration, f: impl FnOnce() + Send + 'static) -> bool {
        unsafe { self.0.as_ref().submit(config, Box::new(f)) }
    }

    pub fn shutdown(&self) {
        unsafe { self.0.as_ref().shutdown() }
    }

    pub fn is_shutting_down(&self) -> bool {
        unsafe { self.0.as_ref().is_shutting_down() }
    }
}

/// A handle to a `Cooperator` built purely for unit tests: a live cooperator with one context
/// (its root, reused as the "current" context) already scheduled, with no running OS thread and
/// no io_uring ring. Every coordinator/signal/multi-coordinator test in this crate that needs a
/// `NonNull<Context>` to exercise non-blocking paths uses this.
pub struct TestCooperator {
    coop: NonNull<Cooperator>,
    root: NonNull<Context>,
}

impl TestCooperator {
    pub fn test_context_ptr(&self) -> NonNull<Context> {
        self.root
    }
}

impl Drop for TestCooperator {
    fn drop(&mut self) {
        unsafe {
            crate::current::set_current_context(None);
            crate::current::set_current_cooperator(None);
            (*self.coop.as_ptr()).all_contexts.remove(self.root);
            if let Some(stack) = (*self.root.as_ptr()).take_stack() {
                (*self.coop.as_ptr()).stack_pool.release(stack);
            }
            Context::deallocate(self.root);
            drop(Box::from_raw(self.coop.as_ptr()));
        }
    }
}

impl Cooperator {
    fn new(config: CooperatorConfig) -> Self {
        let name = config.name.clone();
        Self {
            name,
            all_contexts: List::new(Context::all_project, Context::all_from_link),
            yielded: List::new(Context::state_project, Context::state_from_link),
            blocked: List::new(Context::state_project, Context::state_from_link),
            scheduled: None,
            root: None,
            sp: std::ptr::null_mut(),
            stack_pool: StackPool::new(),
            timer_wheel: TimerWheel::new(config.ticker_resolution, config.ticker_buckets),
            ring: None,
            shutdown: AtomicBool::new(false),
            shutdown_sweep_done: false,
            submission: SubmissionQueue::new(config.submission_queue_depth),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn contexts_count(&self) -> usize {
        self.all_contexts.len()
    }

    pub fn yielded_count(&self) -> usize {
        self.yielded.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// # Safety
    /// `coop` must point at a live `Cooperator`. Returns a reference with an arbitrary caller-
    /// chosen lifetime, matching every other raw-pointer accessor in this crate — callers
    /// (`sleep`, `coordinate_with_kill_timeout`) only ever hold it for the duration of one call.
    pub unsafe fn timer_wheel_mut<'a>(coop: NonNull<Cooperator>) -> &'a mut TimerWheel {
        unsafe { &mut (*coop.as_ptr()).timer_wheel }
    }

    /// # Safety
    /// Same as [`Self::timer_wheel_mut`].
    pub unsafe fn ring_mut<'a>(coop: NonNull<Cooperator>) -> Option<&'a mut Ring> {
        unsafe { (*coop.as_ptr()).ring.as_mut() }
    }

    /// Build a cooperator with no running thread, one already-scheduled root context, and no I/O
    /// ring, for exercising the non-blocking paths of `Coordinator`/`Signal`/`MultiCoordinator`/
    /// `TimerWheel` in unit tests without ever driving a real context switch.
    pub fn new_for_test() -> TestCooperator {
        let config = CooperatorConfig::default();
        let coop: NonNull<Cooperator> = Box::leak(Box::new(Cooperator::new(config))).into();
        let root = unsafe {
            let stack = (*coop.as_ptr())
                .stack_pool
                .acquire(crate::stack::MIN_STACK)
                .expect("failed to allocate a stack for the test root context");
            let cfg = SpawnConfiguration { name: Some("<test-root>".into()), ..Default::default() };
            let ctx = Context::allocate(None, &cfg, None, coop, stack, Box::new(|| {}));
            (*coop.as_ptr()).all_contexts.push_back(ctx);
            (*ctx.as_ptr()).set_state(ContextState::Running);
            (*coop.as_ptr()).scheduled = Some(ctx);
            (*coop.as_ptr()).root = Some(ctx);
            crate::current::set_current_cooperator(Some(coop));
            crate::current::set_current_context(Some(ctx));
            ctx
        };
        TestCooperator { coop, root }
    }

    /// Launch a cooperator on its own OS thread. Returns a [`CooperatorHandle`] (for cross-thread
    /// `submit`/`shutdown`) and the thread's `JoinHandle`, matching
    /// `examples/original_source/coop/cooperator.cpp`'s `Launch` returning control to its caller
    /// immediately while the loop runs on a new thread.
    pub fn launch(config: CooperatorConfig) -> (CooperatorHandle, JoinHandle<()>) {
        let coop: NonNull<Cooperator> = Box::leak(Box::new(Cooperator::new(config))).into();
        let send = SendPtr(coop);
        let join = std::thread::Builder::new()
            .name(unsafe { coop.as_ref().name.to_string() })
            .spawn(move || {
                let send = send;
                unsafe { Self::run(send.0) };
            })
            .expect("failed to spawn cooperator OS thread");
        (CooperatorHandle(coop), join)
    }

    /// Thread entry point: registers, builds the ring and root context, runs `main_loop`, then
    /// tears everything down and frees the leaked `Cooperator`.
    unsafe fn run(coop: NonNull<Cooperator>) {
        crate::logging::init();
        if !registry::register(coop) {
            unsafe { drop(Box::from_raw(coop.as_ptr())) };
            return;
        }

        unsafe {
            crate::current::set_current_cooperator(Some(coop));

            let ring_config = (*coop.as_ptr()).config.ring;
            (*coop.as_ptr()).ring = Ring::new(ring_config).ok();

            let stack = (*coop.as_ptr())
                .stack_pool
                .acquire(crate::stack::MIN_STACK)
                .expect("failed to allocate the cooperator root context's stack");
            let cfg = SpawnConfiguration { name: Some("<cooperator>".into()), ..Default::default() };
            let root = Context::allocate(None, &cfg, None, coop, stack, Box::new(|| {}));
            (*root.as_ptr()).set_state(ContextState::Running);
            (*coop.as_ptr()).root = Some(root);

            (*coop.as_ptr()).main_loop();

            let root = (*coop.as_ptr()).root.take().expect("root context missing at teardown");
            if let Some(stack) = (*root.as_ptr()).take_stack() {
                (*coop.as_ptr()).stack_pool.release(stack);
            }
            Context::deallocate(root);

            crate::current::set_current_context(None);
            crate::current::set_current_cooperator(None);
        }

        registry::unregister(coop);
        unsafe { drop(Box::from_raw(coop.as_ptr())) };
    }

    /// spec.md §4.1's three-step loop: if the run queue is non-empty, drain the cross-thread
    /// submission queue then run up to [`CONTEXTS_PER_POLL`] yielded contexts, polling the I/O
    /// ring between each; if it's empty, poll I/O and advance the timer wheel, and if that
    /// produces no new runnable work either, pump one submitted job (blocking on it if there are
    /// no blocked contexts left to ever wake this cooperator otherwise). Keeps going until
    /// shutdown has both been requested and its one-shot kill sweep has completed, no contexts
    /// remain, and no I/O is outstanding.
    fn main_loop(&mut self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) && !self.shutdown_sweep_done {
                self.run_shutdown_sweep();
            }

            let pending_io = self.ring.as_ref().is_some_and(|r| r.pending_ops() > 0);
            let done = self.all_contexts.is_empty()
                && self.submission.queue.lock().unwrap().is_empty()
                && !pending_io
                && self.shutdown.load(Ordering::Relaxed)
                && self.shutdown_sweep_done;
            if done {
                break;
            }

            if self.yielded.is_empty() {
                let root = self.root.expect("root context missing");

                let progressed = self.ring.as_mut().is_some_and(|r| r.poll(root));
                self.timer_wheel.advance(root);

                if !self.yielded.is_empty() {
                    continue;
                }
                if progressed {
                    continue;
                }

                if !self.blocked.is_empty() || pending_io {
                    // Something will eventually wake this cooperator on its own (a blocked
                    // context's coordinator releasing, or a CQE arriving) — don't block the OS
                    // thread waiting on submissions, just take one if it's there.
                    self.spawn_submitted(false);
                    continue;
                }

                self.spawn_submitted(true);
                continue;
            }

            self.drain_submissions();
            for _ in 0..CONTEXTS_PER_POLL {
                if self.yielded.is_empty() {
                    break;
                }
                self.resume_next();
                if let Some(ring) = self.ring.as_mut() {
                    let root = self.root.expect("root context missing");
                    ring.poll(root);
                }
            }
        }
    }

    fn drain_submissions(&mut self) {
        while self.spawn_submitted(false) {}
    }

    /// Pop one job off the cross-thread submission queue and spawn it as a top-level context.
    /// Returns `false` if `wait` is false and none was available.
    fn spawn_submitted(&mut self, wait: bool) -> bool {
        if wait {
            self.submission.items_available.acquire();
        } else if !self.submission.items_available.try_acquire() {
            return false;
        }
        let Some((job, config)) = self.submission.queue.lock().unwrap().pop_front() else {
            unreachable!("items_available permit without a queued job");
        };
        self.submission.free_slots.release();
        self.spawn_with_config_handle(config, None, move || job());
        true
    }

    /// Cross-thread entry point (spec.md §6 inter-thread API: `Submit`). Enqueues `item` to run
    /// as a new top-level context on this cooperator's own thread; refuses once shut down.
    /// Mirrors `examples/original_source/coop/cooperator.cpp`'s `Submit` acquire-free-slot /
    /// check-shutdown / chain-release-on-shutdown / push / release-items-available sequence.
    pub fn submit(&self, config: SpawnConfiguration, item: Box<dyn FnOnce() + Send + 'static>) -> bool {
        self.submission.free_slots.acquire();
        if self.shutdown.load(Ordering::Relaxed) {
            // Chain the release forward so a second waiter on `free_slots` also observes shutdown
            // and gives up immediately, rather than each submitter re-blocking in turn.
            self.submission.free_slots.release();
            return false;
        }
        self.submission.queue.lock().unwrap().push_back((item, config));
        self.submission.items_available.release();
        true
    }

    /// Request shutdown: stop accepting submissions, and have `main_loop` run a one-shot sweep
    /// that kills every live context. Idempotent; safe from any thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.submission.items_available.release();
    }

    /// Spawn `entry` as a child of whichever context is currently scheduled (or as a top-level
    /// context, if called from the cooperator's own loop with nothing scheduled).
    pub fn spawn(&mut self, entry: impl FnOnce() + 'static) -> bool {
        self.spawn_with_config(SpawnConfiguration::default(), entry)
    }

    pub fn spawn_with_config(&mut self, config: SpawnConfiguration, entry: impl FnOnce() + 'static) -> bool {
        self.spawn_with_config_handle(config, None, entry)
    }

    pub fn spawn_with_handle(&mut self, handle: &Handle, entry: impl FnOnce() + 'static) -> bool {
        self.spawn_with_config_handle(SpawnConfiguration::default(), Some(NonNull::from(handle)), entry)
    }

    fn spawn_with_config_handle(
        &mut self,
        config: SpawnConfiguration,
        handle: Option<NonNull<Handle>>,
        entry: impl FnOnce() + 'static,
    ) -> bool {
        if let Some(parent) = self.scheduled {
            if unsafe { parent.as_ref() }.is_killed() {
                return false;
            }
        }
        let Some(stack) = self.stack_pool.acquire(config.stack_size) else {
            return false;
        };
        let stack_top = stack.top();
        let coop_ptr = NonNull::from(&mut *self);
        let ctx = Context::allocate(self.scheduled, &config, handle, coop_ptr, stack, Box::new(entry));
        unsafe {
            let sp = arch::init_stack(stack_top, ctx.as_ptr());
            (*ctx.as_ptr()).sp = sp;
            self.all_contexts.push_back(ctx);
            self.yielded.push_back(ctx);
        }
        true
    }

    /// Spawn a top-level context to re-validate `handle`'s target (which may have exited since
    /// the caller resolved it, on another thread) and kill it. Runs as an ordinary submitted job,
    /// so the re-validation and the kill happen on the same (cooperator) thread with no
    /// intervening window for the target to be torn down.
    ///
    /// # Safety
    /// `coop` must point at a live `Cooperator`; `handle` at a live `Handle`.
    pub(crate) unsafe fn submit_boundary_kill(
        coop: NonNull<Cooperator>,
        handle: NonNull<Handle>,
        done: impl FnOnce() + Send + 'static,
    ) -> bool {
        unsafe {
            coop.as_ref().submit(
                SpawnConfiguration::default(),
                Box::new(move || {
                    let killer = crate::current::current()
                        .expect("boundary kill job running without a context");
                    if let Some(target) = handle.as_ref().context() {
                        Context::kill(killer, target);
                    }
                    done();
                }),
            )
        }
    }

    /// Kill every live context (except the sweep's own, which is itself spawned fresh for this
    /// purpose) once, the first time the loop observes `shutdown == true`. Matches
    /// `examples/original_source/coop/cooperator.cpp`'s shutdown-time kill-everything sweep.
    fn run_shutdown_sweep(&mut self) {
        self.shutdown_sweep_done = true;
        let coop_ptr: NonNull<Cooperator> = NonNull::from(&mut *self);
        self.spawn(move || {
            let killer = crate::current::current()
                .expect("shutdown sweep running without a context");
            let targets: Vec<NonNull<Context>> = unsafe {
                let c = &mut *coop_ptr.as_ptr();
                let mut v = Vec::with_capacity(c.all_contexts.len());
                c.all_contexts.visit_mut(|ctx| {
                    if ctx != killer && !unsafe { ctx.as_ref() }.is_killed() {
                        v.push(ctx);
                    }
                    true
                });
                v
            };
            for target in targets {
                Context::kill(killer, target);
            }
        });
    }

    /// Run the next yielded context to either its next yield, a block, or its exit — whichever
    /// comes first — and process the result. This is the only place `context_switch` is called
    /// *into* a context from the cooperator's own stack.
    fn resume_next(&mut self) {
        let Some(ctx) = self.yielded.pop_front() else { return };
        unsafe { (*ctx.as_ptr()).set_state(ContextState::Running) };
        self.scheduled = Some(ctx);
        crate::current::set_current_context(Some(ctx));

        let sp = unsafe { (*ctx.as_ptr()).sp };
        let result = unsafe { arch::context_switch(&mut self.sp, sp, SwitchResult::Yielded as u64) };

        // A `schedule = true` direct handoff (`Unblock`) may have chained straight into one or
        // more other contexts without ever passing back through this call — whichever context
        // actually suspended last is who `result` belongs to, which is not necessarily `ctx`.
        // The thread-local tracks that correctly since every handoff updates it before switching;
        // `ctx` itself would only be right again once it resumes the ordinary way.
        let resumed = crate::current::current().unwrap_or(ctx);

        crate::current::set_current_context(None);
        self.scheduled = None;
        self.handle_resumption(resumed, result);
    }

    /// Interpret the discriminator a context's own `context_switch` call handed back when it
    /// yielded, blocked, or exited, and file it into the right list.
    fn handle_resumption(&mut self, ctx: NonNull<Context>, result: u64) {
        match result {
            r if r == SwitchResult::Exited as u64 => self.reap(ctx),
            r if r == SwitchResult::Yielded as u64 => unsafe {
                (*ctx.as_ptr()).set_state(ContextState::Yielded);
                self.yielded.push_back(ctx);
            },
            r if r == SwitchResult::Blocked as u64 => unsafe {
                (*ctx.as_ptr()).set_state(ContextState::Blocked);
                self.blocked.push_back(ctx);
            },
            other => unreachable!("unknown context_switch discriminator {other}"),
        }
    }

    /// Tear down an exited context: reparent any still-live children onto its own parent (an
    /// exited context is not necessarily childless — see `Context::orphan_children`), detach from
    /// its parent (if still attached — it may have been killed, which already runs its own
    /// cascade), unlink from the all-contexts list, return its stack to the pool, and free its
    /// control block.
    fn reap(&mut self, ctx: NonNull<Context>) {
        unsafe {
            let parent = (*ctx.as_ptr()).parent();
            Context::orphan_children(ctx, parent);
            Context::detach(ctx);
            self.all_contexts.remove(ctx);
            if let Some(stack) = (*ctx.as_ptr()).take_stack() {
                self.stack_pool.release(stack);
            }
            Context::deallocate(ctx);
        }
    }

    /// Switch away from `ctx` back into the cooperator loop, carrying `result` as the
    /// discriminator `resume_next`'s `context_switch` call observes.
    fn switch_away(coop: NonNull<Cooperator>, ctx: NonNull<Context>, result: SwitchResult) {
        unsafe {
            let from_sp = &mut (*ctx.as_ptr()).sp;
            // The value passed here as "result" is never inspected — it's only meaningful at the
            // single call site (`resume_next`) representing "the loop's own stack has resumed",
            // which this call isn't.
            arch::context_switch(from_sp, (*coop.as_ptr()).sp, result as u64);
        }
    }

    /// Self-yield: `ctx` is currently running and voluntarily gives up the OS thread. Returns once
    /// the loop schedules it again.
    pub(crate) fn yield_from(coop: NonNull<Cooperator>, ctx: NonNull<Context>) {
        Self::switch_away(coop, ctx, SwitchResult::Yielded);
    }

    /// Self-block: `ctx` is currently running, has already enrolled itself as a waiter somewhere,
    /// and now suspends until some other context unblocks it.
    pub(crate) fn block(coop: NonNull<Cooperator>, ctx: NonNull<Context>) {
        Self::switch_away(coop, ctx, SwitchResult::Blocked);
    }

    /// `current` (running right now) is unblocking `other` (previously blocked). If `schedule`,
    /// switch directly into `other`, handling its eventual yield/block/exit exactly as
    /// `resume_next` would when `current` is later resumed by the ordinary loop; if not, just
    /// move `other` from blocked to yielded for the loop to pick up in its own time.
    pub(crate) fn unblock(coop: NonNull<Cooperator>, current: NonNull<Context>, other: NonNull<Context>, schedule: bool) {
        unsafe {
            (*coop.as_ptr()).blocked.remove(other);
            if !schedule {
                (*other.as_ptr()).set_state(ContextState::Yielded);
                (*coop.as_ptr()).yielded.push_back(other);
                return;
            }

            (*other.as_ptr()).set_state(ContextState::Running);
            (*current.as_ptr()).set_state(ContextState::Yielded);
            (*coop.as_ptr()).yielded.push_back(current);

            // `scheduled` must track who's actually running across this handoff — `spawn_with_
            // config_handle` reads it to parent a freshly spawned context, and `other` is who's
            // running until it next yields/blocks/exits, not `current`.
            (*coop.as_ptr()).scheduled = Some(other);
            crate::current::set_current_context(Some(other));
            let from_sp = &mut (*current.as_ptr()).sp;
            let to_sp = (*other.as_ptr()).sp;
            // Symmetric to `switch_away`: this returns much later, when the ordinary loop
            // resumes `current` again via `resume_next`, so there is nothing to handle here.
            arch::context_switch(from_sp, to_sp, SwitchResult::Yielded as u64);
            crate::current::set_current_context(Some(current));
            (*coop.as_ptr()).scheduled = Some(current);
        }
    }

    /// Called from [`context::context_entry_trampoline`] once a context's entry closure returns.
    /// Never returns: switches back into the loop carrying `Exited`, and `resume_next` reaps it.
    ///
    /// # Safety
    /// `ctx` must be the context currently executing (i.e. this must be called from that
    /// context's own stack).
    pub(crate) unsafe fn exit_current(ctx: NonNull<Context>) -> ! {
        let coop = unsafe { (*ctx.as_ptr()).cooperator() };
        Self::switch_away(coop, ctx, SwitchResult::Exited);
        unreachable!("exited context resumed after switching away as Exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_for_test_gives_a_running_root_context() {
        let coop = Cooperator::new_for_test();
        let ctx = coop.test_context_ptr();
        assert_eq!(unsafe { ctx.as_ref() }.state(), ContextState::Running);
        assert!(!unsafe { ctx.as_ref() }.is_killed());
    }

    #[test]
    fn submission_queue_refuses_after_shutdown() {
        let coop = Cooperator::new(CooperatorConfig::default());
        coop.shutdown();
        let accepted = coop.submit(SpawnConfiguration::default(), Box::new(|| {}));
        assert!(!accepted);
    }
}
