//! The unit of execution (spec.md §3 "Context"): a stack segment, a lifecycle state, parent/child
//! links, and a kill signal. Grounded on `examples/original_source/coop/context.h`/`.cpp`.

use std::ptr::NonNull;

use crate::config::SpawnConfiguration;
use crate::cooperator::Cooperator;
use crate::list::{Link, List};
use crate::signal::Signal;
use crate::stack::Stack;

/// spec.md §3: a context is in exactly one of these at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Yielded,
    Blocked,
}

#[derive(Default, Debug, Clone, Copy)]
pub struct ContextStats {
    pub ticks: u64,
    pub yields: u64,
    pub blocks: u64,
}

type Entry = Box<dyn FnOnce() + 'static>;

/// One executable activity with its own call stack. Allocated via `Box::leak`/`Box::from_raw` so
/// intrusive lists (all-contexts, by-state, children-of-parent) can hold stable raw pointers to
/// it; ownership transfers to whichever of those lists currently has it, finally back to the
/// cooperator at exit for teardown.
pub struct Context {
    pub(crate) all_link: Link<Context>,
    pub(crate) state_link: Link<Context>,
    pub(crate) child_link: Link<Context>,

    parent: Option<NonNull<Context>>,
    children: List<Context>,
    handle: Option<NonNull<Handle>>,

    state: ContextState,
    priority: u32,
    current_priority: u32,

    cooperator: NonNull<Cooperator>,
    killed: Option<Signal>,
    name: Option<Box<str>>,
    stats: ContextStats,

    /// Saved resumption bookmark; meaningless while `state == Running`.
    pub(crate) sp: *mut u8,
    pub(crate) stack: Option<Stack>,
    entry: Option<Entry>,
}

impl Context {
    /// Allocate a new, not-yet-entered context. `parent` is `None` only for a cooperator's
    /// implicit root. Does not link it into the cooperator's lists — the caller (`Cooperator::
    /// spawn`) does that once the stack has been prepared.
    pub(crate) fn allocate(
        parent: Option<NonNull<Context>>,
        config: &SpawnConfiguration,
        handle: Option<NonNull<Handle>>,
        cooperator: NonNull<Cooperator>,
        stack: Stack,
        entry: Entry,
    ) -> NonNull<Context> {
        let boxed = Box::new(Context {
            all_link: Link::new(),
            state_link: Link::new(),
            child_link: Link::new(),
            parent,
            children: List::new(Self::child_project, Self::child_from_link),
            handle,
            state: ContextState::Yielded,
            priority: config.priority,
            current_priority: config.priority,
            cooperator,
            killed: None,
            name: config.name.clone(),
            stats: ContextStats::default(),
            sp: std::ptr::null_mut(),
            stack: Some(stack),
            entry: Some(entry),
        });
        let ptr = NonNull::from(Box::leak(boxed));
        unsafe {
            (*ptr.as_ptr()).killed = Some(Signal::new(ptr));
            if let Some(h) = handle {
                Handle::bind(h, ptr);
            }
            if let Some(p) = parent {
                debug_assert!(!(*p.as_ptr()).is_killed());
                (*p.as_ptr()).children.push_back(ptr);
            }
        }
        ptr
    }

    /// # Safety
    /// `ctx` must point at a live, Box-allocated `Context` not currently a member of any
    /// cooperator list; consumes it.
    pub(crate) unsafe fn deallocate(ctx: NonNull<Context>) {
        unsafe {
            debug_assert!(!ctx.as_ref().all_link.is_linked());
            debug_assert!(!ctx.as_ref().state_link.is_linked());
            debug_assert!(!ctx.as_ref().child_link.is_linked());
            if let Some(h) = ctx.as_ref().handle {
                Handle::clear(h);
            }
            drop(Box::from_raw(ctx.as_ptr()));
        }
    }

    fn child_project(n: NonNull<Context>) -> NonNull<Link<Context>> {
        unsafe { NonNull::new_unchecked(&mut (*n.as_ptr()).child_link as *mut _) }
    }

    fn child_from_link(l: NonNull<Link<Context>>) -> NonNull<Context> {
        // child_link is not the first field, so we can't just cast; recover the enclosing
        // Context via offset.
        unsafe {
            let offset = std::mem::offset_of!(Context, child_link);
            NonNull::new_unchecked((l.as_ptr() as *mut u8).sub(offset) as *mut Context)
        }
    }

    /// `all_link` is the first field, so the addresses coincide.
    pub(crate) fn all_project(n: NonNull<Context>) -> NonNull<Link<Context>> {
        n.cast()
    }

    pub(crate) fn all_from_link(l: NonNull<Link<Context>>) -> NonNull<Context> {
        l.cast()
    }

    pub(crate) fn state_project(n: NonNull<Context>) -> NonNull<Link<Context>> {
        unsafe { NonNull::new_unchecked(&mut (*n.as_ptr()).state_link as *mut _) }
    }

    pub(crate) fn state_from_link(l: NonNull<Link<Context>>) -> NonNull<Context> {
        unsafe {
            let offset = std::mem::offset_of!(Context, state_link);
            NonNull::new_unchecked((l.as_ptr() as *mut u8).sub(offset) as *mut Context)
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn set_state(&mut self, s: ContextState) {
        self.state = s;
    }

    pub fn cooperator(&self) -> NonNull<Cooperator> {
        self.cooperator
    }

    pub fn parent(&self) -> Option<NonNull<Context>> {
        self.parent
    }

    pub fn children(&mut self) -> &mut List<Context> {
        &mut self.children
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("[anonymous]")
    }

    pub fn set_name(&mut self, name: impl Into<Box<str>>) {
        self.name = Some(name.into());
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    pub fn is_killed(&self) -> bool {
        self.killed.as_ref().is_some_and(Signal::is_signaled)
    }

    pub fn killed_signal(&mut self) -> &mut Signal {
        self.killed.as_mut().expect("killed signal always present after allocate()")
    }

    /// Take the stack back out, for a cooperator returning it to the stack pool at teardown.
    pub(crate) fn take_stack(&mut self) -> Option<Stack> {
        self.stack.take()
    }

    pub(crate) fn handle_matches(&self, h: NonNull<Handle>) -> bool {
        self.handle == Some(h)
    }

    /// Disassociate from the parent so killing the parent won't cascade here.
    pub fn detach(ctx: NonNull<Context>) {
        unsafe {
            let this = &mut *ctx.as_ptr();
            if let Some(p) = this.parent.take() {
                (*p.as_ptr()).children.remove(ctx);
            }
        }
    }

    /// Reparent every current child of `ctx` onto `new_parent` (or make them top-level if
    /// `None`). Called just before `ctx` is torn down: a context can exit (or be reaped after
    /// being killed) while it still has live children — e.g. a killed parent whose children were
    /// just marked killed but haven't run far enough to exit yet — and leaving them pointing at
    /// `ctx`'s about-to-be-freed `Context` would turn their own later `detach()` into a
    /// use-after-free.
    pub(crate) fn orphan_children(ctx: NonNull<Context>, new_parent: Option<NonNull<Context>>) {
        unsafe {
            let this = &mut *ctx.as_ptr();
            let mut children = Vec::with_capacity(this.children.len());
            this.children.visit_mut(|c| {
                children.push(c);
                true
            });
            for child in children {
                this.children.remove(child);
                (*child.as_ptr()).parent = new_parent;
                if let Some(p) = new_parent {
                    (*p.as_ptr()).children.push_back(child);
                }
            }
        }
    }

    /// Run the entry closure; called only from [`context_entry_trampoline`] while executing on
    /// this context's own stack.
    fn run_entry(ctx: NonNull<Context>) {
        let entry = unsafe { (*ctx.as_ptr()).entry.take() }
            .expect("context entered without an entry closure, or entered twice");
        entry();
    }

    /// Yield control back to the cooperator. Non-forced yields are "soft": the call decrements a
    /// per-context priority counter and only performs an actual context switch once it reaches
    /// zero (resetting it to `priority` afterward), returning `false` for the calls that didn't
    /// switch. A forced yield always switches and returns `true`.
    pub fn yield_now(ctx: NonNull<Context>, force: bool) -> bool {
        unsafe {
            let this = &mut *ctx.as_ptr();
            if !force {
                this.current_priority -= 1;
                if this.current_priority != 0 {
                    return false;
                }
            }
            this.stats.yields += 1;
            this.current_priority = this.priority;
            Cooperator::yield_from(this.cooperator, ctx);
            true
        }
    }

    /// Self-block: suspend `ctx` until some coordinator unblocks it. Must only be called after
    /// `ctx` has already been enrolled as a waiter somewhere.
    pub(crate) fn block(ctx: NonNull<Context>) {
        unsafe {
            let this = &mut *ctx.as_ptr();
            this.stats.blocks += 1;
            let coop = this.cooperator;
            Cooperator::block(coop, ctx);
        }
    }

    /// Move `other` from blocked to yielded, called by whichever context (`_current`) is running
    /// when the unblocking condition fires. If `schedule`, control switches directly to `other`.
    pub fn unblock(current: NonNull<Context>, other: NonNull<Context>, schedule: bool) {
        unsafe {
            let coop = (*current.as_ptr()).cooperator;
            Cooperator::unblock(coop, current, other, schedule);
        }
    }

    /// Kill `target` and, recursively, every transitively reachable child, children first so
    /// that by the time anyone actually resumes from their kill signal every descendant has
    /// already observed `is_killed() == true`. Every step here uses `schedule = false`: nothing
    /// actually runs until this whole cascade has finished marking.
    pub fn kill(killer: NonNull<Context>, target: NonNull<Context>) {
        unsafe {
            let children: Vec<NonNull<Context>> = {
                let t = &mut *target.as_ptr();
                let mut v = Vec::with_capacity(t.children.len());
                t.children.visit_mut(|c| {
                    v.push(c);
                    true
                });
                v
            };
            for child in children {
                Context::kill(killer, child);
            }
            let sig = (*target.as_ptr()).killed.as_mut().unwrap();
            sig.notify(killer, false);
        }
    }
}

/// First code to run on a freshly switched-to context's stack. Called from the architecture
/// trampoline (`arch::x86_64::context_trampoline`) with the raw `Context*` recovered from the
/// register the switch primitive reserves for it.
pub extern "C" fn context_entry_trampoline(ctx: *mut Context) -> ! {
    let ptr = NonNull::new(ctx).expect("null context in trampoline");
    Context::run_entry(ptr);
    unsafe { Cooperator::exit_current(ptr) }
}

/// A stable external reference to a context (spec.md §3 "Handle"). Dropping a `Handle` does not
/// kill its context; `kill()` explicitly does, and may be called from any thread.
pub struct Handle {
    inner: std::sync::Mutex<Option<NonNull<Context>>>,
}

// Safety: the only thing ever dereferenced through the stored pointer from a foreign thread is
// passed onward as a `Submit` payload and actually read back on the owning cooperator's thread;
// the mutex serializes access to the pointer value itself.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl Handle {
    pub fn new() -> Self {
        Self { inner: std::sync::Mutex::new(None) }
    }

    pub(crate) fn bind(this: NonNull<Handle>, ctx: NonNull<Context>) {
        unsafe {
            *(*this.as_ptr()).inner.lock().unwrap() = Some(ctx);
        }
    }

    pub(crate) fn clear(this: NonNull<Handle>) {
        unsafe {
            *(*this.as_ptr()).inner.lock().unwrap() = None;
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    pub(crate) fn context(&self) -> Option<NonNull<Context>> {
        *self.inner.lock().unwrap()
    }

    /// Marshal a kill into the target's cooperator thread, blocking the caller until it has been
    /// applied. A no-op if the context has already exited. May be called from any thread.
    ///
    /// The target is re-resolved from `self` on the cooperator's own thread (not here) — between
    /// this call and the submitted closure actually running, the target may already have exited.
    pub fn kill(&self) {
        let Some(ctx) = self.context() else { return };
        let cooperator = unsafe { ctx.as_ref().cooperator() };
        let this = NonNull::from(self);
        let (tx, rx) = std::sync::mpsc::channel();
        let submitted = unsafe {
            Cooperator::submit_boundary_kill(cooperator, this, move || {
                let _ = tx.send(());
            })
        };
        if submitted {
            let _ = rx.recv();
        }
    }
}
