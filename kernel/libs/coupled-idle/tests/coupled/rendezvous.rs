// SPDX-License-Identifier: MPL-2.0

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use coupled_idle::{CpuId, Error, PhaseCounts};

use crate::sim::{
    coupled_system, coupled_system_with_tick, spawn_enter, wait_until, DEEP_COUPLED, SAFE,
    SHALLOW_COUPLED,
};

const IDLE: PhaseCounts = PhaseCounts {
    waiting: 0,
    ready: 0,
};

#[test]
fn same_requests_commit_together() {
    let engine = coupled_system(2);
    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    let cpu1 = spawn_enter(&engine, 1, DEEP_COUPLED);

    assert_eq!(cpu0.join().unwrap(), Ok(DEEP_COUPLED));
    assert_eq!(cpu1.join().unwrap(), Ok(DEEP_COUPLED));

    let entries = engine.platform().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].round, entries[1].round);
    assert!(engine.platform().violations().is_empty());

    let set = engine.coupled_set(CpuId::new(0)).unwrap();
    assert_eq!(set.phase_counts(), IDLE);
    assert_eq!(set.requested_state(CpuId::new(0)), None);
    assert_eq!(set.requested_state(CpuId::new(1)), None);
}

#[test]
fn shallowest_request_wins() {
    let engine = coupled_system(2);
    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    let cpu1 = spawn_enter(&engine, 1, SHALLOW_COUPLED);

    assert_eq!(cpu0.join().unwrap(), Ok(SHALLOW_COUPLED));
    assert_eq!(cpu1.join().unwrap(), Ok(SHALLOW_COUPLED));
    assert!(engine.platform().violations().is_empty());
}

#[test]
fn lone_cpu_waits_for_late_peer() {
    let engine = coupled_system(2);
    let set = engine.coupled_set(CpuId::new(0)).unwrap();

    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    wait_until(|| set.phase_counts().waiting == 1);
    thread::sleep(Duration::from_millis(20));

    // CPU 0 keeps idling in the safe state meanwhile.
    assert!(!cpu0.is_finished());
    assert!(engine.platform().safe_entries(CpuId::new(0)) > 1);
    assert!(engine.platform().entries().is_empty());
    assert_eq!(set.requested_state(CpuId::new(0)), Some(DEEP_COUPLED));

    let cpu1 = spawn_enter(&engine, 1, DEEP_COUPLED);
    assert_eq!(cpu0.join().unwrap(), Ok(DEEP_COUPLED));
    assert_eq!(cpu1.join().unwrap(), Ok(DEEP_COUPLED));
    assert!(engine.platform().violations().is_empty());
}

#[test]
fn poked_cpu_commits_without_sleeping_again() {
    // Long enough that only a wake-up ends a safe idle period in time.
    let engine = coupled_system_with_tick(2, Duration::from_secs(10));
    let set = engine.coupled_set(CpuId::new(0)).unwrap();

    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    wait_until(|| set.phase_counts().waiting == 1);
    let safe_entries = engine.platform().safe_entries(CpuId::new(0));

    let start = Instant::now();
    let cpu1 = spawn_enter(&engine, 1, DEEP_COUPLED);
    assert_eq!(cpu0.join().unwrap(), Ok(DEEP_COUPLED));
    assert_eq!(cpu1.join().unwrap(), Ok(DEEP_COUPLED));
    assert!(start.elapsed() < Duration::from_secs(2));

    // At most one more entry, cut short by the poke itself.
    assert!(engine.platform().safe_entries(CpuId::new(0)) <= safe_entries + 1);
    assert_eq!(engine.platform().safe_entries(CpuId::new(1)), 0);
    assert!(engine.platform().violations().is_empty());
}

#[test]
fn pending_work_ends_the_wait() {
    let engine = coupled_system(2);
    let set = engine.coupled_set(CpuId::new(0)).unwrap();

    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    wait_until(|| set.phase_counts().waiting == 1);
    engine.platform().set_resched(CpuId::new(0), true);

    assert_eq!(cpu0.join().unwrap(), Ok(SAFE));
    assert!(engine.platform().entries().is_empty());
    assert_eq!(set.phase_counts(), IDLE);
    assert_eq!(set.requested_state(CpuId::new(0)), None);
}

#[test]
fn disabling_ends_the_wait() {
    let engine = coupled_system(2);
    let set = engine.coupled_set(CpuId::new(0)).unwrap();

    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    wait_until(|| set.phase_counts().waiting == 1);
    let wakes = engine.platform().wakes(CpuId::new(0));

    engine.mark_disabled(&set);
    assert_eq!(set.phase_counts(), IDLE);
    assert!(engine.platform().wakes(CpuId::new(0)) > wakes);
    assert_eq!(cpu0.join().unwrap(), Ok(SAFE));

    engine.clear_disabled(&set).unwrap();
    assert!(set.is_enabled());
    assert!(engine.platform().entries().is_empty());
}

#[test]
fn aborted_peer_can_come_back() {
    let engine = coupled_system(3);
    let set = engine.coupled_set(CpuId::new(0)).unwrap();

    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    let cpu1 = spawn_enter(&engine, 1, DEEP_COUPLED);
    wait_until(|| set.phase_counts().waiting == 2);

    engine.platform().set_resched(CpuId::new(1), true);
    assert_eq!(cpu1.join().unwrap(), Ok(SAFE));
    engine.platform().set_resched(CpuId::new(1), false);
    assert_eq!(set.phase_counts().waiting, 1);

    let cpu1 = spawn_enter(&engine, 1, DEEP_COUPLED - 1);
    let cpu2 = spawn_enter(&engine, 2, DEEP_COUPLED);
    for cpu in [cpu0, cpu1, cpu2] {
        assert_eq!(cpu.join().unwrap(), Ok(DEEP_COUPLED - 1));
    }
    assert_eq!(engine.platform().entries().len(), 3);
    assert!(engine.platform().violations().is_empty());
    assert_eq!(set.phase_counts(), IDLE);
}

#[test]
fn hardware_failure_reaches_every_cpu() {
    let engine = coupled_system(2);
    let set = engine.coupled_set(CpuId::new(0)).unwrap();

    engine.platform().set_fail_coupled(true);
    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    let cpu1 = spawn_enter(&engine, 1, DEEP_COUPLED);
    assert_eq!(cpu0.join().unwrap(), Err(Error::IoError));
    assert_eq!(cpu1.join().unwrap(), Err(Error::IoError));
    assert_eq!(set.phase_counts(), IDLE);

    // The set is usable again afterwards.
    engine.platform().set_fail_coupled(false);
    let cpu0 = spawn_enter(&engine, 0, DEEP_COUPLED);
    let cpu1 = spawn_enter(&engine, 1, DEEP_COUPLED);
    assert_eq!(cpu0.join().unwrap(), Ok(DEEP_COUPLED));
    assert_eq!(cpu1.join().unwrap(), Ok(DEEP_COUPLED));
}

#[test]
fn parallel_barrier_holds_back_early_cpus() {
    let engine = coupled_system(3);
    let barrier = Arc::new(AtomicUsize::new(0));
    let arrived = Arc::new(AtomicUsize::new(0));

    let cpus = (0..3)
        .map(|cpu| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let arrived = arrived.clone();
            thread::spawn(move || {
                for round in 1..=3 {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    engine
                        .parallel_barrier(CpuId::new(cpu), &barrier)
                        .unwrap();
                    assert!(arrived.load(Ordering::SeqCst) >= round * 3);
                }
            })
        })
        .collect::<Vec<_>>();
    for cpu in cpus {
        cpu.join().unwrap();
    }
    assert_eq!(barrier.load(Ordering::SeqCst), 0);
}
