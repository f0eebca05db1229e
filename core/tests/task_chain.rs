mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::scheduler;
use futures::executor::block_on;
use gitkeeper_core::error::TaskError;
use gitkeeper_core::task::{Task, TaskAffinity, TaskOutcome, TaskQueue};
use pretty_assertions::assert_eq;

#[test]
fn exclusive_chains_never_overlap() {
    let scheduler = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let running = running.clone();
            let max_seen = max_seen.clone();
            Task::new(format!("mutation {i}"), TaskAffinity::Exclusive, move |_| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            })
            .start(&scheduler)
        })
        .collect();

    for handle in handles {
        assert!(block_on(handle.wait()).is_success());
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn then_passes_values_down_the_chain() {
    let scheduler = scheduler();
    let value = Task::ready("seed", 20)
        .then("double", TaskAffinity::Concurrent, |_, v| async move { Ok(v * 2) })
        .then("describe", TaskAffinity::None, |_, v| async move { Ok(format!("got {v}")) })
        .run_synchronously(&scheduler)
        .unwrap();
    assert_eq!(value.as_deref(), Some("got 40"));
}

#[test]
fn unhandled_fault_reaches_finally_and_caller() {
    let scheduler = scheduler();
    let ran_after = Arc::new(AtomicUsize::new(0));
    let finally_saw = Arc::new(Mutex::new(None));

    let after = ran_after.clone();
    let sink = finally_saw.clone();
    let outcome = block_on(
        Task::<u32>::failed("broken", TaskError::faulted("boom"))
            .then("skipped", TaskAffinity::None, move |_, v| async move {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            })
            .catch(|_| false)
            .finally(move |success, error| {
                *sink.lock().unwrap() = Some((success, error.cloned()));
            })
            .start(&scheduler)
            .wait(),
    );

    assert_eq!(outcome, TaskOutcome::Faulted(TaskError::faulted("boom")));
    assert_eq!(ran_after.load(Ordering::SeqCst), 0);
    assert_eq!(
        *finally_saw.lock().unwrap(),
        Some((false, Some(TaskError::faulted("boom"))))
    );
}

#[test]
fn handled_fault_stops_propagating() {
    let scheduler = scheduler();
    let offered = Arc::new(AtomicUsize::new(0));
    let seen = offered.clone();

    let result = Task::<u32>::failed("broken", TaskError::faulted("boom"))
        .catch(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        })
        .catch(|_| panic!("an earlier handler already took the fault"))
        .run_synchronously(&scheduler);

    assert_eq!(result, Ok(None));
    assert_eq!(offered.load(Ordering::SeqCst), 1);
}

#[test]
fn catch_only_covers_steps_before_it() {
    let scheduler = scheduler();
    let outcome = block_on(
        Task::ready("fine", 1)
            .catch(|_| true)
            .then("fails later", TaskAffinity::None, |_, _| async move {
                Err::<u32, _>(TaskError::faulted("late"))
            })
            .start(&scheduler)
            .wait(),
    );
    assert_eq!(outcome, TaskOutcome::Faulted(TaskError::faulted("late")));
}

#[test]
fn on_failure_recovers_and_then_always_sees_everything() {
    let scheduler = scheduler();
    let recovered = Task::<u32>::failed("broken", TaskError::faulted("boom"))
        .on_failure("recover", TaskAffinity::None, |_, e| async move {
            assert_eq!(e, TaskError::faulted("boom"));
            Ok(7)
        })
        .run_synchronously(&scheduler)
        .unwrap();
    assert_eq!(recovered, Some(7));

    let untouched = Task::ready("fine", 3)
        .on_failure("recover", TaskAffinity::None, |_, _| async move { Ok(0) })
        .run_synchronously(&scheduler)
        .unwrap();
    assert_eq!(untouched, Some(3));

    let described = Task::<u32>::failed("broken", TaskError::Canceled)
        .then_always("describe", TaskAffinity::None, |_, prior| async move {
            Ok(match prior {
                Ok(v) => format!("value {v}"),
                Err(e) => format!("error {e}"),
            })
        })
        .run_synchronously(&scheduler)
        .unwrap();
    assert_eq!(described.as_deref(), Some("error operation canceled"));
}

#[test]
fn then_task_appends_a_whole_chain() {
    let scheduler = scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));

    let (a, b, c) = (order.clone(), order.clone(), order.clone());
    let second = Task::from_fn("second", TaskAffinity::Exclusive, move |_| {
        a.lock().unwrap().push("second");
        Ok("done")
    })
    .on_start(move || b.lock().unwrap().push("second starts"));

    let task = Task::from_fn("first", TaskAffinity::Concurrent, move |_| {
        c.lock().unwrap().push("first");
        Ok(())
    })
    .then_task(second);

    assert!(task.is_exclusive());
    assert_eq!(task.affinities(), &[TaskAffinity::Concurrent, TaskAffinity::Exclusive]);
    assert_eq!(task.run_synchronously(&scheduler).unwrap(), Some("done"));
    assert_eq!(*order.lock().unwrap(), vec!["first", "second starts", "second"]);
}

#[test]
fn canceled_chain_is_classified_as_canceled() {
    let scheduler = scheduler();
    let handle = Task::new("slow", TaskAffinity::Concurrent, |ctx| async move {
        for _ in 0..200 {
            ctx.check_cancelled()?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    })
    .then("never", TaskAffinity::None, |_, _| async move { Ok(()) })
    .start(&scheduler);

    std::thread::sleep(Duration::from_millis(20));
    handle.cancel();
    assert_eq!(block_on(handle.wait()), TaskOutcome::Faulted(TaskError::Canceled));
}

#[test]
fn panicking_body_faults_the_chain() {
    let scheduler = scheduler();
    let explode = true;
    let result = Task::from_fn("explodes", TaskAffinity::Concurrent, move |_| {
        if explode {
            panic!("kaboom");
        }
        Ok(1)
    })
    .run_synchronously(&scheduler);
    assert!(matches!(result, Err(TaskError::Faulted(msg)) if msg.contains("kaboom")));
}

#[test]
fn disposed_scheduler_cancels_new_chains() {
    let scheduler = scheduler();
    scheduler.dispose();
    let finally_ran = Arc::new(AtomicUsize::new(0));
    let counter = finally_ran.clone();
    let outcome = block_on(
        Task::ready("late", 1)
            .finally(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .start(&scheduler)
            .wait(),
    );
    assert_eq!(outcome, TaskOutcome::Faulted(TaskError::Canceled));
    assert_eq!(finally_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn queue_collects_in_order_and_fails_with_first_error() {
    let scheduler = scheduler();
    let values = TaskQueue::new("all")
        .queue(Task::ready("a", 1))
        .queue(Task::new("b", TaskAffinity::Concurrent, |_| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(2)
        }))
        .queue(Task::ready("c", 3))
        .into_task()
        .run_synchronously(&scheduler)
        .unwrap();
    assert_eq!(values, Some(vec![1, 2, 3]));

    let failed = TaskQueue::new("some fail")
        .queue(Task::ready("ok", 1))
        .queue(Task::failed("first", TaskError::faulted("one")))
        .queue(Task::failed("second", TaskError::faulted("two")))
        .into_task()
        .run_synchronously(&scheduler);
    assert_eq!(failed, Err(TaskError::faulted("one")));
}

#[test]
fn progress_reaches_hooks_and_aggregator() {
    let scheduler = scheduler();
    let mut aggregated = scheduler.progress().subscribe();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();

    Task::from_fn("download", TaskAffinity::Concurrent, |ctx| {
        ctx.report_progress(0, 4, Some("start"));
        ctx.report_progress(2, 4, None);
        ctx.report_progress(4, 4, None);
        Ok(())
    })
    .on_progress(move |p| sink.lock().unwrap().push(p.value))
    .run_synchronously(&scheduler)
    .unwrap();

    assert_eq!(*reported.lock().unwrap(), vec![0, 2, 4]);
    assert!(aggregated.try_recv().is_ok());
}

#[test]
fn ui_steps_run_on_the_ui_thread() {
    let scheduler = scheduler();
    let pump = scheduler.ui().spawn_pump_thread().unwrap();
    let ui = scheduler.ui().clone();

    let on_ui = Task::ready("background", ())
        .then("render", TaskAffinity::Ui, move |_, _| async move { Ok(ui.is_ui_thread()) })
        .run_synchronously(&scheduler)
        .unwrap();
    assert_eq!(on_ui, Some(true));

    scheduler.dispose();
    pump.join().unwrap();
}
