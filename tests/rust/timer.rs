// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::manual_timer_list;
use ::anyhow::Result;
use ::coopsched::{
    ensure_eq,
    runtime::timer::clock::ManualClock,
    TimeInterval,
    Timer,
    TimerList,
    TimerRef,
    TimerState,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::{
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
    thread,
    time::Duration,
};

//======================================================================================================================
// Tests
//======================================================================================================================

/// A repeating timer fires once per elapsed interval and is reloaded before its callback runs.
#[test]
fn repeating_timer_fires_once_per_interval() -> Result<()> {
    let (list, clock): (TimerList, ManualClock) = manual_timer_list();
    let reloads: Arc<Mutex<Vec<TimeInterval>>> = Arc::new(Mutex::new(Vec::new()));
    let reloads_: Arc<Mutex<Vec<TimeInterval>>> = reloads.clone();

    let timer: Timer = Timer::new(&list, TimeInterval::ZERO);
    timer.set_notifier(move |t: &TimerRef| {
        if let Ok(mut reloads) = reloads_.lock() {
            reloads.push(t.remaining());
        }
    });
    timer.run_continuous(TimeInterval::from_millis(500));
    list.process();

    for _ in 0..5 {
        clock.advance(TimeInterval::from_millis(500));
        list.process();
    }

    let reloads: Vec<TimeInterval> = reloads.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.clone();
    ensure_eq!(reloads, vec![TimeInterval::from_millis(500); 5]);
    ensure_eq!(timer.state(), TimerState::Running);
    Ok(())
}

/// A one-shot timer fires exactly once until it is restarted.
#[test]
fn one_shot_timer_fires_once() -> Result<()> {
    let (list, clock): (TimerList, ManualClock) = manual_timer_list();
    let fired: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let fired_: Arc<AtomicUsize> = fired.clone();
    let timer: Timer = Timer::with_notifier(&list, TimeInterval::from_millis(100), move |_: &TimerRef| {
        fired_.fetch_add(1, Ordering::SeqCst);
    });
    list.process();

    for _ in 0..4 {
        clock.advance(TimeInterval::from_millis(100));
        list.process();
    }
    ensure_eq!(fired.load(Ordering::SeqCst), 1);
    ensure_eq!(timer.state(), TimerState::Stopped);
    ensure_eq!(timer.has_expired(), true);

    timer.set_interval(TimeInterval::from_millis(100));
    list.process();
    clock.advance(TimeInterval::from_millis(100));
    list.process();
    ensure_eq!(fired.load(Ordering::SeqCst), 2);
    Ok(())
}

/// The list reports the time left on the timer closest to expiry.
#[test]
fn process_reports_time_to_next_expiry() -> Result<()> {
    let (list, clock): (TimerList, ManualClock) = manual_timer_list();
    let _slow: Timer = Timer::new(&list, TimeInterval::from_secs(10));
    let fast: Timer = Timer::with_components(&list, 250, 0, 0, 0, 0);
    ensure_eq!(list.process(), TimeInterval::from_millis(250));

    clock.advance(TimeInterval::from_millis(100));
    ensure_eq!(list.process(), TimeInterval::from_millis(150));

    fast.pause();
    clock.advance(TimeInterval::from_millis(100));
    ensure_eq!(list.process(), TimeInterval::from_millis(9_800));
    ensure_eq!(fast.remaining(), TimeInterval::from_millis(150));
    Ok(())
}

/// Dropping a timer whose callback runs on another OS thread waits for the callback to return.
#[test]
fn drop_waits_for_callback_on_other_thread() -> Result<()> {
    let (list, clock): (TimerList, ManualClock) = manual_timer_list();
    let (entered_tx, entered_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let finished: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    let finished_: Arc<AtomicBool> = finished.clone();

    let timer: Timer = Timer::with_notifier(&list, TimeInterval::from_millis(10), move |_: &TimerRef| {
        let _ = entered_tx.send(());
        thread::sleep(Duration::from_millis(200));
        finished_.store(true, Ordering::SeqCst);
    });
    list.process();
    clock.advance(TimeInterval::from_millis(10));

    let worker_list: TimerList = list.clone();
    let worker: thread::JoinHandle<TimeInterval> = thread::spawn(move || worker_list.process());

    entered_rx.recv_timeout(Duration::from_secs(5))?;
    drop(timer);
    ensure_eq!(finished.load(Ordering::SeqCst), true);
    ensure_eq!(list.len(), 0);

    if worker.join().is_err() {
        anyhow::bail!("timer worker panicked");
    }
    Ok(())
}

/// A callback may drop the timer it belongs to.
#[test]
fn callback_may_drop_its_own_timer() -> Result<()> {
    let (list, clock): (TimerList, ManualClock) = manual_timer_list();
    let owner: Arc<Mutex<Option<Timer>>> = Arc::new(Mutex::new(None));
    let owner_: Arc<Mutex<Option<Timer>>> = owner.clone();

    let timer: Timer = Timer::with_notifier(&list, TimeInterval::from_millis(5), move |_: &TimerRef| {
        let mine: Option<Timer> = owner_.lock().ok().and_then(|mut slot| slot.take());
        drop(mine);
    });
    *owner.lock().map_err(|_| anyhow::anyhow!("poisoned"))? = Some(timer);
    list.process();

    clock.advance(TimeInterval::from_millis(5));
    list.process();
    ensure_eq!(owner.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.is_none(), true);
    ensure_eq!(list.len(), 0);
    Ok(())
}
