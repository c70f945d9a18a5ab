//! Scheduling against a region-partitioned host whose legacy scheduler
//! declines everything.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rgb_host_sim::{RegionServer, SimEntity};
use rgb_tick::{
    AffinityError, EntityExecutor, HostModel, InterruptToken, Lane, SchedulerConfig, TaskId,
    TaskScheduler,
};

struct Fixture {
    server: Arc<RegionServer>,
    scheduler: Arc<TaskScheduler>,
    executor: Arc<EntityExecutor<SimEntity>>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup(regions: usize) -> Fixture {
    init_tracing();
    let server = Arc::new(RegionServer::start(regions).unwrap());
    let scheduler = Arc::new(
        TaskScheduler::new(server.clone())
            .with_regions(server.clone())
            .with_config(SchedulerConfig { tick_millis: 5 }),
    );
    let executor =
        Arc::new(EntityExecutor::new(Arc::clone(&scheduler)).with_affinity(server.clone()));
    Fixture {
        server,
        scheduler,
        executor,
    }
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&runs);
    (runs, move || {
        counted.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_falls_back_to_region_scheduler() {
    let Fixture {
        server, scheduler, ..
    } = setup(2);

    let first = scheduler.run_repeating(|| {}, 20).unwrap();
    let second = scheduler.run_once_delayed(|| {}, 20).unwrap();

    assert!(first.is_fallback());
    assert!(second.is_fallback());
    assert_ne!(first, second);
    assert!(first.to_raw() < -1);
    assert_eq!(TaskId::from_raw(first.to_raw()), Some(first));
    assert_eq!(scheduler.model(Lane::Sync), Some(HostModel::Partitioned));
    assert_eq!(scheduler.model(Lane::Async), None);
    assert_eq!(server.pending_global(), 2);
}

#[test]
fn test_sync_work_runs_on_global_thread() {
    let Fixture {
        server, scheduler, ..
    } = setup(2);
    let (tx, rx) = crossbeam_channel::unbounded();

    let inner = Arc::clone(&scheduler);
    scheduler
        .run_once(move || {
            let _ = tx.send(inner.is_caller_on_primary_context());
        })
        .unwrap();
    assert!(!scheduler.is_caller_on_primary_context());

    server.step(1);
    assert_eq!(rx.try_recv(), Ok(true));
}

#[test]
fn test_zero_delay_becomes_one_tick() {
    let Fixture {
        server, scheduler, ..
    } = setup(1);
    let (runs, work) = counter();

    // The global scheduler rejects zero-tick delays; they are raised to one.
    let id = scheduler.run_repeating(work, 0).unwrap();
    server.step(4);
    scheduler.cancel(id);
    server.step(4);

    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert_eq!(server.pending_global(), 0);
}

#[test]
fn test_cancel_after_runs() {
    let Fixture {
        server, scheduler, ..
    } = setup(1);
    let (runs, work) = counter();

    let id = scheduler.run_repeating(work, 2).unwrap();
    server.step(6);
    scheduler.cancel(id);
    scheduler.cancel(id);
    server.step(6);

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(!scheduler.registry().contains(id));
}

#[test]
fn test_cancel_before_first_run() {
    let Fixture {
        server, scheduler, ..
    } = setup(1);
    let (runs, work) = counter();

    let id = scheduler.run_repeating(work, 5).unwrap();
    scheduler.cancel_raw(id.to_raw());
    server.step(10);

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.registry().outstanding(), 0);
}

#[test]
fn test_one_shot_releases_id_after_running() {
    let Fixture {
        server, scheduler, ..
    } = setup(1);
    let (runs, work) = counter();

    let id = scheduler.run_once_delayed(work, 2).unwrap();
    assert!(scheduler.registry().contains(id));

    server.step(2);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!scheduler.registry().contains(id));
    scheduler.cancel(id);
}

#[test]
fn test_panicking_one_shot_releases_id() {
    let Fixture {
        server, scheduler, ..
    } = setup(1);

    let id = scheduler.run_once_delayed(|| panic!("boom"), 1).unwrap();
    server.step(3);

    assert!(!scheduler.registry().contains(id));
    assert_eq!(scheduler.registry().outstanding(), 0);
}

#[test]
fn test_async_repeating_uses_wall_clock() {
    let Fixture { scheduler, .. } = setup(1);
    let (runs, work) = counter();

    let id = scheduler.run_async_repeating(work, 2).unwrap();
    assert!(id.is_fallback());
    assert_eq!(scheduler.model(Lane::Async), Some(HostModel::Partitioned));

    // 2 ticks at 5ms: no ticks are stepped, the pool runs on its own
    for _ in 0..500 {
        if runs.load(Ordering::SeqCst) >= 2 {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert!(runs.load(Ordering::SeqCst) >= 2);

    scheduler.cancel(id);
    thread::sleep(Duration::from_millis(30));
    let settled = runs.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(runs.load(Ordering::SeqCst), settled);
}

#[test]
fn test_async_once_runs_without_ticks() {
    let Fixture { scheduler, .. } = setup(1);
    let (tx, rx) = crossbeam_channel::unbounded();

    scheduler
        .run_async_once(move || {
            let _ = tx.send(());
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    assert_eq!(scheduler.registry().outstanding(), 0);
}

#[test]
fn test_executor_runs_on_owning_region() {
    let Fixture {
        server, executor, ..
    } = setup(3);
    let entity = server.spawn_entity(2).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&runs);
    let probe = Arc::clone(&server);
    let region = server.drive(|| {
        executor.run_on_owner_and_wait(&entity, move || {
            counted.fetch_add(1, Ordering::SeqCst);
            probe.current_region()
        })
    });

    assert_eq!(region, Ok(Some(2)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_executor_follows_moved_entity() {
    let Fixture {
        server, executor, ..
    } = setup(2);
    let entity = server.spawn_entity(0).unwrap();
    server.move_entity(entity, 1).unwrap();

    let probe = Arc::clone(&server);
    let region = server.drive(|| {
        executor.run_on_owner_and_wait(&entity, move || probe.current_region())
    });

    assert_eq!(region, Ok(Some(1)));
}

#[test]
fn test_executor_inline_in_owning_region() {
    let Fixture {
        server, executor, ..
    } = setup(2);
    let entity = server.spawn_entity(1).unwrap();

    let inner = Arc::clone(&executor);
    let result = server.drive(|| {
        executor.run_on_owner_and_wait(&entity, move || {
            // Already on the owner: runs inline instead of waiting on a tick.
            let outer = thread::current().id();
            inner.run_on_owner_and_wait(&entity, move || thread::current().id() == outer)
        })
    });

    assert_eq!(result, Ok(Ok(true)));
}

#[test]
fn test_executor_retired_entity() {
    let Fixture {
        server, executor, ..
    } = setup(1);
    let entity = server.spawn_entity(0).unwrap();
    server.retire_entity(entity).unwrap();
    let (runs, work) = counter();

    assert_eq!(
        executor.run_on_owner_and_wait(&entity, work),
        Err(AffinityError::OwnerRetired)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_executor_entity_retired_while_waiting() {
    let Fixture {
        server, executor, ..
    } = setup(1);
    let entity = server.spawn_entity(0).unwrap();
    let (runs, work) = counter();

    // No ticks are stepped, so the task stays pending until the entity goes.
    let result = thread::scope(|scope| {
        let waiter = scope.spawn(|| executor.run_on_owner_and_wait(&entity, work));
        thread::sleep(Duration::from_millis(20));
        server.retire_entity(entity).unwrap();
        waiter.join().unwrap()
    });

    assert_eq!(result, Err(AffinityError::OwnerRetired));
    server.step(3);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_executor_interrupted_while_waiting() {
    let Fixture {
        server, executor, ..
    } = setup(1);
    let entity = server.spawn_entity(0).unwrap();
    let token = InterruptToken::new();
    let (runs, work) = counter();

    let result = thread::scope(|scope| {
        let waiter =
            scope.spawn(|| executor.run_on_owner_and_wait_interruptibly(&entity, work, &token));
        thread::sleep(Duration::from_millis(20));
        token.interrupt();
        waiter.join().unwrap()
    });

    assert_eq!(result, Err(AffinityError::Interrupted));
    assert!(token.is_interrupted());

    // The task was not cancelled; it still runs, and its result is dropped.
    server.step(1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
