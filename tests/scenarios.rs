//! End-to-end scenarios driven against a real `Cooperator::launch` (an actual OS thread, actual
//! `context_switch` assembly) rather than the non-blocking `new_for_test()` harness the unit tests
//! elsewhere use. Mirrors the integration-test convention of a top-level `tests/` directory with
//! plain `#[test]` functions exercising only the public API.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use coop::config::CooperatorConfig;
use coop::context::Handle;
use coop::coordinator::Coordinator;
use coop::io::IoHandle;
use coop::multi_coordinator::MultiCoordinator;
use coop::{current, Cooperator};
use io_uring::{opcode, types};

/// Spawn a child, hand control back and forth with `Yield(true)`, and check the interleaving a
/// reader would expect from strict FIFO round-robin: the parent only ever observes the counter
/// value its own yields entitle it to.
#[test]
fn spawn_yield_resume_interleaves_in_fifo_order() {
    let (handle, join) = Cooperator::launch(CooperatorConfig::default());
    let (tx, rx) = mpsc::channel();

    handle.submit(move || {
        let counter = Arc::new(AtomicUsize::new(0));
        let child_counter = counter.clone();
        current::spawn(move || {
            child_counter.fetch_add(1, Ordering::SeqCst);
            current::yield_now(true);
            child_counter.fetch_add(1, Ordering::SeqCst);
        });

        current::yield_now(true);
        let after_first = counter.load(Ordering::SeqCst);
        current::yield_now(true);
        let after_second = counter.load(Ordering::SeqCst);

        let _ = tx.send((after_first, after_second));
    });

    let (after_first, after_second) = rx.recv().expect("submitted job ran");
    assert_eq!(after_first, 1);
    assert_eq!(after_second, 2);

    handle.shutdown();
    join.join().expect("cooperator thread panicked");
}

/// A coordinator handed off with `schedule = true` must run the unblocked waiter before the
/// releaser resumes — the ordering invariant this crate's `Cooperator::unblock` direct handoff
/// exists to provide.
#[test]
fn coordinator_release_with_schedule_runs_waiter_before_releaser_resumes() {
    let (handle, join) = Cooperator::launch(CooperatorConfig::default());
    let (tx, rx) = mpsc::channel();

    handle.submit(move || {
        let order = Rc::new(RefCell::new(Vec::new()));
        let coord: &'static mut Coordinator = Box::leak(Box::new(Coordinator::new()));
        let coord = NonNull::from(&mut *coord);

        let parent_ctx = current::current().unwrap();
        unsafe { (*coord.as_ptr()).acquire(parent_ctx) };
        order.borrow_mut().push("parent-pre");

        let child_order = order.clone();
        current::spawn(move || {
            let ctx = current::current().unwrap();
            child_order.borrow_mut().push("child-pre-acquire");
            unsafe { (*coord.as_ptr()).acquire(ctx) };
            child_order.borrow_mut().push("child-post-acquire");
            unsafe { (*coord.as_ptr()).release(ctx, false) };
            child_order.borrow_mut().push("child-release");
        });

        // Let the child run up to the point where it blocks on `coord`.
        current::yield_now(true);

        // The child runs to completion before this call returns — ownership transfers directly,
        // not released-then-reacquired.
        unsafe { (*coord.as_ptr()).release(parent_ctx, true) };
        order.borrow_mut().push("parent-post-release");

        let _ = tx.send(order.borrow().clone());
    });

    let order = rx.recv().expect("submitted job ran");
    assert_eq!(
        order,
        vec!["parent-pre", "child-pre-acquire", "child-post-acquire", "child-release", "parent-post-release"]
    );

    handle.shutdown();
    join.join().expect("cooperator thread panicked");
}

/// When every composed coordinator is already free by the time a multi-coordinator wait begins,
/// the leftmost one wins — driven here through a real spawned child that acquires and releases
/// both before the parent ever calls `acquire`.
#[test]
fn multi_coordinator_leftmost_wins_when_both_already_free() {
    let (handle, join) = Cooperator::launch(CooperatorConfig::default());
    let (tx, rx) = mpsc::channel();

    handle.submit(move || {
        let a: &'static mut Coordinator = Box::leak(Box::new(Coordinator::new()));
        let b: &'static mut Coordinator = Box::leak(Box::new(Coordinator::new()));
        let a = NonNull::from(&mut *a);
        let b = NonNull::from(&mut *b);

        current::spawn(move || {
            let ctx = current::current().unwrap();
            unsafe {
                assert!((*a.as_ptr()).try_acquire(ctx));
                assert!((*b.as_ptr()).try_acquire(ctx));
                (*a.as_ptr()).release(ctx, false);
                (*b.as_ptr()).release(ctx, false);
            }
        });

        // Let the child fully run (it never blocks, so one yield suffices to drain it).
        current::yield_now(true);
        current::yield_now(true);

        let parent_ctx = current::current().unwrap();
        let idx = unsafe {
            MultiCoordinator::new(vec![&mut *a.as_ptr(), &mut *b.as_ptr()]).acquire(parent_ctx)
        };

        let a_held_by_parent = unsafe { (*a.as_ptr()).held_by(parent_ctx) };
        let b_held = unsafe { (*b.as_ptr()).is_held() };
        let _ = tx.send((idx, a_held_by_parent, b_held));
    });

    let (idx, a_held_by_parent, b_held) = rx.recv().expect("submitted job ran");
    assert_eq!(idx, 0);
    assert!(a_held_by_parent);
    assert!(!b_held);

    handle.shutdown();
    join.join().expect("cooperator thread panicked");
}

/// `Handle::kill()` called from outside the cooperator thread must wake a context blocked on its
/// own kill signal, with `IsKilled()` observably true once it resumes.
#[test]
fn kill_while_blocked_wakes_the_context() {
    let (handle, join) = Cooperator::launch(CooperatorConfig::default());
    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let target = Arc::new(Handle::new());

    {
        let target = target.clone();
        handle.submit(move || {
            current::spawn_with_handle(&target, move || {
                let ctx = current::current().unwrap();
                let _ = ready_tx.send(());
                unsafe { (*ctx.as_ptr()).killed_signal().wait(ctx) };
                let _ = done_tx.send(current::is_killed());
            });
        });
    }

    ready_rx.recv().expect("child context started");
    target.kill();

    let observed_killed = done_rx.recv().expect("child resumed after kill");
    assert!(observed_killed);

    handle.shutdown();
    join.join().expect("cooperator thread panicked");
}

/// An `IoHandle` racing a linked timeout against a socket with nothing ever written to it must
/// time out, not hang.
#[test]
fn io_wait_times_out_on_an_empty_socket() {
    let (handle, join) = Cooperator::launch(CooperatorConfig::default());
    let (tx, rx) = mpsc::channel();

    handle.submit(move || {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "socketpair failed");

        let ctx = current::current().unwrap();
        let cooperator = current::cooperator().unwrap();
        let ring = unsafe { Cooperator::ring_mut(cooperator) }.expect("io_uring ring available");
        let ring_ptr = NonNull::from(&mut *ring);

        let mut buf = [0u8; 16];
        let mut io = IoHandle::new(ring_ptr, ctx);
        let entry = opcode::Recv::new(types::Fd(fds[0]), buf.as_mut_ptr(), buf.len() as u32).build();
        io.submit_with_timeout(entry, None, Duration::from_millis(50));
        let result = io.wait();

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }

        let _ = tx.send(result);
    });

    let result = rx.recv().expect("submitted job ran");
    assert_eq!(result, -libc::ETIMEDOUT);

    handle.shutdown();
    join.join().expect("cooperator thread panicked");
}

/// `sleep()` blocks on the timer wheel directly (no io_uring involved) and must actually wake up
/// once its deadline passes, not hang — the regression this guards against is `TimerWheel::advance`
/// never migrating a handle out of a coarser bucket toward bucket 0.
#[test]
fn sleep_wakes_up_after_its_deadline() {
    let (handle, join) = Cooperator::launch(CooperatorConfig::default());
    let (tx, rx) = mpsc::channel();

    handle.submit(move || {
        let start = std::time::Instant::now();
        let outcome = coop::sleep(Duration::from_millis(50));
        let elapsed = start.elapsed();
        let _ = tx.send((outcome, elapsed));
    });

    let (outcome, elapsed) = rx.recv_timeout(Duration::from_secs(5)).expect("sleep() returned");
    assert_eq!(outcome, coop::SleepOutcome::Completed);
    assert!(elapsed >= Duration::from_millis(50), "woke up before its deadline: {elapsed:?}");

    handle.shutdown();
    join.join().expect("cooperator thread panicked");
}

/// Shutting down a cooperator with hundreds of children blocked on their own kill signal must
/// drain every one of them (the shutdown sweep kills the whole forest, not just direct children)
/// before the OS thread exits.
#[test]
fn shutdown_drains_all_blocked_children() {
    const CHILD_COUNT: usize = 500;

    let (handle, join) = Cooperator::launch(CooperatorConfig::default());
    let observed = Arc::new(AtomicUsize::new(0));
    let (spawned_tx, spawned_rx) = mpsc::channel();

    {
        let observed = observed.clone();
        handle.submit(move || {
            for _ in 0..CHILD_COUNT {
                let observed = observed.clone();
                current::spawn(move || {
                    let ctx = current::current().unwrap();
                    unsafe { (*ctx.as_ptr()).killed_signal().wait(ctx) };
                    if current::is_killed() {
                        observed.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
            let _ = spawned_tx.send(());
        });
    }

    spawned_rx.recv().expect("all children spawned before shutdown");

    handle.shutdown();
    join.join().expect("cooperator thread panicked");

    assert_eq!(observed.load(Ordering::SeqCst), CHILD_COUNT);
}
