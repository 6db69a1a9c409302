// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    close,
    pipe,
    scheduler,
    write_byte,
    yield_until,
};
use ::anyhow::Result;
use ::coopsched::{
    ensure_eq,
    ensure_neq,
    runtime::{
        assert,
        poll::RawFd,
    },
    AutoDelete,
    Fail,
    Priority,
    SharedScheduler,
    ThreadConfig,
    ThreadContext,
    ThreadId,
    ThreadStatus,
    TimeInterval,
    MAX_TIME_INTERVAL,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    env,
    future::Future,
    pin::Pin,
    process::{
        Command,
        Output,
    },
    rc::Rc,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Set when the test binary runs as the child of [stack_overflow_is_fatal].
const STACK_OVERFLOW_CHILD: &str = "COOPSCHED_STACK_OVERFLOW_CHILD";

//======================================================================================================================
// Tests
//======================================================================================================================

/// A thread that terminates itself never runs another line, and the other threads finish normally.
#[test]
fn self_terminated_thread_stops_immediately() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let log_: Rc<RefCell<Vec<&'static str>>> = log.clone();
    let quitter: ThreadId = sched.spawn(ThreadConfig::new("quitter"), move |ctx: ThreadContext| async move {
        log_.borrow_mut().push("before");
        ctx.terminate().await;
        log_.borrow_mut().push("after");
    })?;
    let log_: Rc<RefCell<Vec<&'static str>>> = log.clone();
    let worker: ThreadId = sched.spawn(ThreadConfig::new("worker"), move |ctx: ThreadContext| async move {
        for _ in 0..3 {
            ctx.yield_now().await;
        }
        log_.borrow_mut().push("worker done");
    })?;

    ensure_eq!(sched.wait_for_termination(quitter, TimeInterval::from_secs(5)), true);
    ensure_eq!(sched.wait_for_termination(worker, TimeInterval::from_secs(5)), true);
    ensure_eq!(log.borrow().contains(&"after"), false);
    ensure_eq!(log.borrow().contains(&"before"), true);
    ensure_eq!(log.borrow().contains(&"worker done"), true);
    ensure_eq!(sched.num_threads(), 1);
    Ok(())
}

/// Suspends nest: a thread created suspended and suspended once more needs two resumes before it runs.
#[test]
fn suspends_nest() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let ran: Rc<Cell<bool>> = Rc::new(Cell::new(false));

    let ran_: Rc<Cell<bool>> = ran.clone();
    let id: ThreadId = sched.spawn(
        ThreadConfig::new("dormant").start_suspended(true),
        move |_ctx: ThreadContext| async move {
            ran_.set(true);
        },
    )?;
    sched.suspend(id)?;

    for _ in 0..5 {
        sched.yield_now();
    }
    ensure_eq!(ran.get(), false);
    ensure_eq!(sched.status(id)?, ThreadStatus::Starting);

    sched.resume(id)?;
    for _ in 0..5 {
        sched.yield_now();
    }
    ensure_eq!(ran.get(), false);

    sched.resume(id)?;
    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(ran.get(), true);
    Ok(())
}

/// A thread that suspends itself stays off the run list until another thread resumes it.
#[test]
fn thread_suspends_itself_until_resumed() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let log_: Rc<RefCell<Vec<&'static str>>> = log.clone();
    let id: ThreadId = sched.spawn(ThreadConfig::new("napper"), move |ctx: ThreadContext| async move {
        log_.borrow_mut().push("suspending");
        ctx.suspend().await;
        log_.borrow_mut().push("resumed");
    })?;
    yield_until(&sched, id, ThreadStatus::Suspended)?;

    for _ in 0..5 {
        sched.yield_now();
    }
    ensure_eq!(log.borrow().clone(), vec!["suspending"]);

    sched.resume(id)?;
    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(log.borrow().clone(), vec!["suspending", "resumed"]);
    Ok(())
}

/// A sleeping thread is not scheduled before its interval elapsed.
#[test]
fn thread_sleeps_for_at_least_interval() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let slept: Rc<Cell<Option<Duration>>> = Rc::new(Cell::new(None));

    let slept_: Rc<Cell<Option<Duration>>> = slept.clone();
    let id: ThreadId = sched.spawn(ThreadConfig::new("sleeper"), move |ctx: ThreadContext| async move {
        let start: Instant = Instant::now();
        ctx.sleep(TimeInterval::from_millis(50)).await;
        slept_.set(Some(start.elapsed()));
    })?;

    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    let Some(elapsed) = slept.get() else {
        anyhow::bail!("sleeper did not wake up")
    };
    ensure_eq!(elapsed >= Duration::from_millis(45), true, "slept for {:?}", elapsed);
    Ok(())
}

/// Other threads keep running while the process thread sleeps.
#[test]
fn process_sleep_runs_other_threads() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let spins: Rc<Cell<u64>> = Rc::new(Cell::new(0));

    let spins_: Rc<Cell<u64>> = spins.clone();
    let spinner: ThreadId = sched.spawn(ThreadConfig::new("spinner"), move |ctx: ThreadContext| async move {
        loop {
            spins_.set(spins_.get() + 1);
            ctx.yield_now().await;
        }
    })?;

    let start: Instant = Instant::now();
    sched.sleep(TimeInterval::from_millis(50));
    ensure_eq!(start.elapsed() >= Duration::from_millis(45), true);
    ensure_neq!(spins.get(), 0);
    ensure_eq!(sched.status(sched.process_id())?, ThreadStatus::Running);

    sched.terminate(spinner)?;
    ensure_eq!(sched.wait_for_termination(spinner, TimeInterval::from_secs(5)), true);
    Ok(())
}

/// A thread blocked on a pipe wakes up once another thread writes to it.
#[test]
fn blocked_read_wakes_when_data_arrives() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let (rd, wr): (RawFd, RawFd) = pipe()?;
    let readable: Rc<Cell<Option<bool>>> = Rc::new(Cell::new(None));
    let written: Rc<Cell<bool>> = Rc::new(Cell::new(false));

    let readable_: Rc<Cell<Option<bool>>> = readable.clone();
    let reader: ThreadId = sched.spawn(ThreadConfig::new("reader"), move |ctx: ThreadContext| async move {
        let result: Result<bool, Fail> = ctx.wait_readable(rd, TimeInterval::from_secs(5)).await;
        readable_.set(result.ok());
    })?;
    let written_: Rc<Cell<bool>> = written.clone();
    let writer: ThreadId = sched.spawn(ThreadConfig::new("writer"), move |ctx: ThreadContext| async move {
        ctx.sleep(TimeInterval::from_millis(20)).await;
        written_.set(write_byte(wr).is_ok());
    })?;
    yield_until(&sched, reader, ThreadStatus::BlockedIO)?;

    ensure_eq!(sched.wait_for_termination(reader, TimeInterval::from_secs(10)), true);
    ensure_eq!(sched.wait_for_termination(writer, TimeInterval::from_secs(10)), true);
    close(&[rd, wr]);
    ensure_eq!(written.get(), true);
    ensure_eq!(readable.get(), Some(true));
    Ok(())
}

/// A blocked read with nothing to read gives up after its timeout.
#[test]
fn blocked_read_times_out() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let (rd, wr): (RawFd, RawFd) = pipe()?;
    let outcome: Rc<Cell<Option<(bool, Duration)>>> = Rc::new(Cell::new(None));

    let outcome_: Rc<Cell<Option<(bool, Duration)>>> = outcome.clone();
    let reader: ThreadId = sched.spawn(ThreadConfig::new("reader"), move |ctx: ThreadContext| async move {
        let start: Instant = Instant::now();
        if let Ok(readable) = ctx.wait_readable(rd, TimeInterval::from_millis(50)).await {
            outcome_.set(Some((readable, start.elapsed())));
        }
    })?;

    ensure_eq!(sched.wait_for_termination(reader, TimeInterval::from_secs(10)), true);
    close(&[rd, wr]);
    let Some((readable, elapsed)) = outcome.get() else {
        anyhow::bail!("reader failed")
    };
    ensure_eq!(readable, false);
    ensure_eq!(elapsed >= Duration::from_millis(45), true, "gave up after {:?}", elapsed);
    Ok(())
}

/// A normal priority thread gets more turns than a low priority one, so it finishes the same work first.
#[test]
fn normal_priority_outpaces_low_priority() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let finished: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let mut ids: Vec<ThreadId> = Vec::new();
    for (name, priority) in [("low", Priority::Low), ("normal", Priority::Normal)] {
        let finished: Rc<RefCell<Vec<&'static str>>> = finished.clone();
        let id: ThreadId = sched.spawn(
            ThreadConfig::new(name).priority(priority),
            move |ctx: ThreadContext| async move {
                for _ in 0..200 {
                    ctx.yield_now().await;
                }
                finished.borrow_mut().push(name);
            },
        )?;
        ids.push(id);
    }

    for id in ids {
        ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(10)), true);
    }
    ensure_eq!(finished.borrow().clone(), vec!["normal", "low"]);
    Ok(())
}

/// Once the process terminates, no thread is scheduled anymore and every wait of the process returns at once.
#[test]
fn process_termination_stops_scheduling() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let spins: Rc<Cell<u64>> = Rc::new(Cell::new(0));
    let hook_code: Rc<Cell<Option<i32>>> = Rc::new(Cell::new(None));

    let hook_code_: Rc<Cell<Option<i32>>> = hook_code.clone();
    sched.set_shutdown_hook(move |code: i32| hook_code_.set(Some(code)));

    let spins_: Rc<Cell<u64>> = spins.clone();
    let spinner: ThreadId = sched.spawn(ThreadConfig::new("spinner"), move |ctx: ThreadContext| async move {
        loop {
            spins_.set(spins_.get() + 1);
            ctx.yield_now().await;
        }
    })?;
    for _ in 0..5 {
        sched.yield_now();
    }
    ensure_neq!(spins.get(), 0);

    sched.terminate_process(7);
    ensure_eq!(sched.exit_code(), Some(7));
    ensure_eq!(hook_code.get(), Some(7));

    let spins_at_exit: u64 = spins.get();
    for _ in 0..5 {
        sched.yield_now();
    }
    ensure_eq!(sched.wait_for_termination(spinner, TimeInterval::from_millis(10)), false);
    ensure_eq!(spins.get(), spins_at_exit);

    // Only the first request counts.
    sched.terminate_process(9);
    ensure_eq!(sched.exit_code(), Some(7));
    Ok(())
}

/// Operations on ids the scheduler does not know fail, and stacks below the minimum are refused.
#[test]
fn invalid_requests_are_rejected() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let unknown: ThreadId = ThreadId::from(u64::MAX - 1);

    ensure_eq!(sched.status(unknown).map_err(|e| e.errno), Err(libc::ESRCH));
    ensure_eq!(sched.suspend(unknown).map_err(|e| e.errno), Err(libc::ESRCH));
    ensure_eq!(sched.terminate(unknown).map_err(|e| e.errno), Err(libc::ESRCH));
    ensure_eq!(sched.is_terminated(unknown), true);

    let tiny: usize = sched.config().min_stack_size - 1;
    let spawned: Result<ThreadId, Fail> =
        sched.spawn(ThreadConfig::new("tiny").stack_size(tiny), |_ctx: ThreadContext| async {});
    ensure_eq!(spawned.map_err(|e| e.errno), Err(libc::EINVAL));
    ensure_eq!(sched.num_threads(), 1);
    Ok(())
}

/// A live thread cannot be removed. Once it terminated it can, after which its id is unknown.
#[test]
fn only_terminated_threads_are_removed() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let id: ThreadId = sched.spawn(ThreadConfig::new("sleeper"), |ctx: ThreadContext| async move {
        ctx.sleep(MAX_TIME_INTERVAL).await;
    })?;
    yield_until(&sched, id, ThreadStatus::Sleeping)?;
    ensure_eq!(sched.remove_thread(id).map_err(|e| e.errno), Err(libc::EBUSY));

    sched.terminate(id)?;
    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(sched.status(id)?, ThreadStatus::Terminated);
    sched.remove_thread(id)?;
    ensure_eq!(sched.status(id).map_err(|e| e.errno), Err(libc::ESRCH));
    Ok(())
}

/// Auto-delete threads are reclaimed as soon as they terminate.
#[test]
fn auto_delete_thread_is_reclaimed() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let id: ThreadId = sched.spawn(
        ThreadConfig::new("ephemeral").auto_delete(AutoDelete::AutoDelete),
        |ctx: ThreadContext| async move {
            ctx.yield_now().await;
        },
    )?;
    ensure_eq!(sched.thread_name(id)?, "ephemeral".to_string());

    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(sched.status(id).map_err(|e| e.errno), Err(libc::ESRCH));
    Ok(())
}

/// A thread can wait for another one to finish, with or without a deadline.
#[test]
fn thread_waits_for_another_thread() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let results: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));

    let sleeper: ThreadId = sched.spawn(ThreadConfig::new("sleeper"), |ctx: ThreadContext| async move {
        ctx.sleep(TimeInterval::from_millis(30)).await;
    })?;
    let results_: Rc<RefCell<Vec<bool>>> = results.clone();
    let waiter: ThreadId = sched.spawn(ThreadConfig::new("waiter"), move |ctx: ThreadContext| async move {
        let early: bool = ctx.wait_for_termination(sleeper, TimeInterval::ZERO).await;
        results_.borrow_mut().push(early);
        let eventually: bool = ctx.wait_for_termination(sleeper, TimeInterval::from_secs(5)).await;
        results_.borrow_mut().push(eventually);
    })?;

    ensure_eq!(sched.wait_for_termination(waiter, TimeInterval::from_secs(10)), true);
    ensure_eq!(results.borrow().clone(), vec![false, true]);
    Ok(())
}

/// Threads can inspect the scheduler they run on.
#[test]
fn thread_sees_itself_as_current() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let seen: Rc<Cell<Option<bool>>> = Rc::new(Cell::new(None));

    let seen_: Rc<Cell<Option<bool>>> = seen.clone();
    let id: ThreadId = sched.spawn(ThreadConfig::new("introspective"), move |ctx: ThreadContext| async move {
        let sched: SharedScheduler = ctx.scheduler();
        seen_.set(Some(sched.current_thread() == ctx.id() && ctx.name() == "introspective"));
    })?;
    sched.set_priority(id, Priority::High)?;
    ensure_eq!(sched.priority(id)?, Priority::High);

    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(seen.get(), Some(true));
    ensure_eq!(sched.current_thread(), sched.process_id());
    Ok(())
}

/// A context kept past the end of its auto-delete thread acts on nothing, even after another thread took its place.
#[test]
fn stale_context_is_refused_after_auto_delete() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let (rd, wr): (RawFd, RawFd) = pipe()?;
    let stash: Rc<RefCell<Option<ThreadContext>>> = Rc::new(RefCell::new(None));

    let stash_: Rc<RefCell<Option<ThreadContext>>> = stash.clone();
    let gone: ThreadId = sched.spawn(
        ThreadConfig::new("gone").auto_delete(AutoDelete::AutoDelete),
        move |ctx: ThreadContext| async move {
            *stash_.borrow_mut() = Some(ctx.clone());
        },
    )?;
    ensure_eq!(sched.wait_for_termination(gone, TimeInterval::from_secs(5)), true);
    ensure_eq!(sched.status(gone).map_err(|e| e.errno), Err(libc::ESRCH));

    // Takes the slot the auto-delete thread left behind.
    let stop: Rc<Cell<bool>> = Rc::new(Cell::new(false));
    let stop_: Rc<Cell<bool>> = stop.clone();
    let spinner: ThreadId = sched.spawn(ThreadConfig::new("spinner"), move |ctx: ThreadContext| async move {
        while !stop_.get() {
            ctx.yield_now().await;
        }
    })?;

    let outcome: Rc<Cell<Option<(Duration, Result<bool, i32>)>>> = Rc::new(Cell::new(None));
    let outcome_: Rc<Cell<Option<(Duration, Result<bool, i32>)>>> = outcome.clone();
    let user: ThreadId = sched.spawn(ThreadConfig::new("user"), move |_ctx: ThreadContext| async move {
        let Some(stale) = stash.borrow_mut().take() else {
            return;
        };
        let start: Instant = Instant::now();
        stale.sleep(TimeInterval::from_secs(60)).await;
        let read: Result<bool, i32> = stale
            .wait_readable(rd, TimeInterval::from_secs(60))
            .await
            .map_err(|e| e.errno);
        outcome_.set(Some((start.elapsed(), read)));
    })?;

    ensure_eq!(sched.wait_for_termination(user, TimeInterval::from_secs(5)), true);
    let Some((elapsed, read)) = outcome.get() else {
        anyhow::bail!("user thread did not get hold of the stale context")
    };
    ensure_eq!(elapsed < Duration::from_secs(5), true, "stale context blocked for {:?}", elapsed);
    ensure_eq!(read, Err(libc::ESRCH));
    let status: ThreadStatus = sched.status(spinner)?;
    ensure_eq!(
        matches!(status, ThreadStatus::Running | ThreadStatus::Waiting),
        true,
        "spinner ended up {:?}",
        status
    );

    stop.set(true);
    ensure_eq!(sched.wait_for_termination(spinner, TimeInterval::from_secs(5)), true);
    close(&[rd, wr]);
    Ok(())
}

/// A thread cannot block through the context of another live thread.
#[test]
fn context_of_another_thread_is_refused() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let (rd, wr): (RawFd, RawFd) = pipe()?;
    let stash: Rc<RefCell<Option<ThreadContext>>> = Rc::new(RefCell::new(None));

    let stash_: Rc<RefCell<Option<ThreadContext>>> = stash.clone();
    let owner: ThreadId = sched.spawn(ThreadConfig::new("owner"), move |ctx: ThreadContext| async move {
        *stash_.borrow_mut() = Some(ctx.clone());
        ctx.sleep(MAX_TIME_INTERVAL).await;
    })?;
    yield_until(&sched, owner, ThreadStatus::Sleeping)?;

    let before: usize = assert::failure_count();
    let read: Rc<Cell<Option<Result<bool, i32>>>> = Rc::new(Cell::new(None));
    let read_: Rc<Cell<Option<Result<bool, i32>>>> = read.clone();
    let borrower: ThreadId = sched.spawn(ThreadConfig::new("borrower"), move |_ctx: ThreadContext| async move {
        let Some(borrowed) = stash.borrow_mut().take() else {
            return;
        };
        let result: Result<bool, Fail> = borrowed.wait_readable(rd, TimeInterval::from_secs(60)).await;
        read_.set(Some(result.map_err(|e| e.errno)));
    })?;

    ensure_eq!(sched.wait_for_termination(borrower, TimeInterval::from_secs(5)), true);
    ensure_eq!(read.get(), Some(Err(libc::EPERM)));
    ensure_eq!(assert::failure_count(), before + 1);
    ensure_eq!(sched.status(owner)?, ThreadStatus::Sleeping);

    sched.terminate(owner)?;
    ensure_eq!(sched.wait_for_termination(owner, TimeInterval::from_secs(5)), true);
    close(&[rd, wr]);
    Ok(())
}

/// Renaming a thread is visible both from the scheduler and from the thread itself.
#[test]
fn thread_can_be_renamed() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let seen: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

    let seen_: Rc<RefCell<Option<String>>> = seen.clone();
    let id: ThreadId = sched.spawn(
        ThreadConfig::new("before").start_suspended(true),
        move |ctx: ThreadContext| async move {
            *seen_.borrow_mut() = Some(ctx.name());
        },
    )?;
    sched.set_thread_name(id, "after")?;
    ensure_eq!(sched.thread_name(id)?, "after".to_string());

    sched.resume(id)?;
    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(seen.borrow().clone(), Some("after".to_string()));

    let unknown: ThreadId = ThreadId::from(u64::MAX - 1);
    ensure_eq!(sched.set_thread_name(unknown, "nobody").map_err(|e| e.errno), Err(libc::ESRCH));
    Ok(())
}

/// A terminated thread runs its body again from the top once restarted. Live threads and threads without a
/// re-creatable body are refused.
#[test]
fn terminated_thread_restarts_from_the_top() -> Result<()> {
    let sched: SharedScheduler = scheduler()?;
    let runs: Rc<Cell<u32>> = Rc::new(Cell::new(0));

    let runs_: Rc<Cell<u32>> = runs.clone();
    let id: ThreadId = sched.spawn_restartable(ThreadConfig::new("again"), move |ctx: ThreadContext| {
        let runs: Rc<Cell<u32>> = runs_.clone();
        async move {
            runs.set(runs.get() + 1);
            ctx.yield_now().await;
        }
    })?;
    ensure_eq!(sched.restart(id).map_err(|e| e.errno), Err(libc::EBUSY));

    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(runs.get(), 1);
    ensure_eq!(sched.num_threads(), 1);

    sched.restart(id)?;
    ensure_eq!(sched.status(id)?, ThreadStatus::Starting);
    ensure_eq!(sched.num_threads(), 2);
    ensure_eq!(sched.wait_for_termination(id, TimeInterval::from_secs(5)), true);
    ensure_eq!(runs.get(), 2);

    let once: ThreadId = sched.spawn(ThreadConfig::new("once"), |_ctx: ThreadContext| async {})?;
    ensure_eq!(sched.wait_for_termination(once, TimeInterval::from_secs(5)), true);
    ensure_eq!(sched.restart(once).map_err(|e| e.errno), Err(libc::EINVAL));
    Ok(())
}

/// Nests boxed futures `depth` levels deep and yields from the innermost one.
fn descend(ctx: ThreadContext, depth: usize) -> Pin<Box<dyn Future<Output = ()>>> {
    Box::pin(async move {
        if depth == 0 {
            ctx.yield_now().await;
        } else {
            descend(ctx, depth - 1).await;
        }
    })
}

/// A thread that yields with more stack in use than it was given takes the whole process down. The overflow runs in
/// a child copy of this test binary.
#[test]
fn stack_overflow_is_fatal() -> Result<()> {
    if env::var_os(STACK_OVERFLOW_CHILD).is_some() {
        let sched: SharedScheduler = scheduler()?;
        let stack_size: usize = sched.config().min_stack_size;
        let id: ThreadId = sched.spawn(ThreadConfig::new("deep").stack_size(stack_size), |ctx: ThreadContext| {
            descend(ctx, 2000)
        })?;
        sched.wait_for_termination(id, TimeInterval::from_secs(10));
        anyhow::bail!("thread outgrew its stack without aborting");
    }

    let output: Output = Command::new(env::current_exe()?)
        .args(["stack_overflow_is_fatal", "--exact", "--nocapture", "--test-threads=1"])
        .env(STACK_OVERFLOW_CHILD, "1")
        .env("RUST_MIN_STACK", "16777216")
        .output()?;
    let stderr: String = String::from_utf8_lossy(&output.stderr).into_owned();
    ensure_eq!(output.status.success(), false);
    ensure_eq!(stderr.contains("Stack overflow!"), true, "child stderr: {}", stderr);
    Ok(())
}
