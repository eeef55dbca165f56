use anyhow::anyhow;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use weft::{Attempt, ConcurrentProc, Error, EvalState, Evaluation, Loop, TaskError};

fn answer() -> ConcurrentProc<(), u32> {
    ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.wait(Duration::from_millis(10)).await?;
        Ok(42)
    })
}

#[test]
fn blocking_call_returns_the_result() -> anyhow::Result<()> {
    let lp = Loop::new()?;
    let start = lp.now();

    assert_eq!(answer().call_blocking(&lp, ())?, 42);
    assert!(lp.now() - start >= 0.010);
    Ok(())
}

#[weft::test]
async fn scheduled_evaluation_concludes_later(lp: Loop) -> anyhow::Result<()> {
    let eval = answer().schedule(&lp, ());

    assert_eq!(eval.state(), EvalState::Fresh);
    assert_eq!(eval.await_result().await?, 42);
    assert_eq!(eval.state(), EvalState::Concluded);

    // Every await observes the same settled result.
    assert_eq!(eval.await_result().await?, 42);
    assert_eq!(eval.result().transpose()?, Some(42));
    Ok(())
}

#[weft::test]
async fn call_inside_a_task(lp: Loop) -> anyhow::Result<()> {
    let answer = answer();
    let outer = ConcurrentProc::new(move |lp: Loop, bonus: u32| {
        let answer = answer.clone();
        async move { Ok(answer.call(&lp, ()).await? + bonus) }
    });

    assert_eq!(outer.call(&lp, 1).await?, 43);
    Ok(())
}

#[weft::test]
async fn attempt_returns_inline_results(lp: Loop) -> anyhow::Result<()> {
    let double = ConcurrentProc::new(|lp: Loop, ms: u64| async move {
        if ms > 0 {
            lp.wait(Duration::from_millis(ms)).await?;
        }
        Ok(ms * 2)
    });

    let Attempt::Done(value) = double.attempt(&lp, 0).await? else {
        panic!("body without suspension should finish inline");
    };
    assert_eq!(value, 0);

    let Attempt::Pending(eval) = double.attempt(&lp, 5).await? else {
        panic!("body with a wait should suspend");
    };
    assert!(eval.is_waiting());
    assert_eq!(eval.await_result().await?, 10);
    Ok(())
}

#[weft::test]
async fn inline_failure_is_returned_to_the_caller(lp: Loop) -> anyhow::Result<()> {
    let failing = ConcurrentProc::new(|_: Loop, ()| async move {
        Err::<u32, _>(Error::task(anyhow!("refused")))
    });

    let err = failing.attempt(&lp, ()).await.unwrap_err();

    assert_eq!(err.to_string(), "task failed: refused");
    Ok(())
}

#[test]
fn failures_reach_the_error_hook() -> anyhow::Result<()> {
    let reports = Rc::new(RefCell::new(Vec::<TaskError>::new()));
    let sink = reports.clone();

    let lp = Loop::builder()
        .on_task_error(move |report| sink.borrow_mut().push(report.clone()))
        .build()?;

    let failing = ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.wait(Duration::from_millis(1)).await?;
        Err::<(), _>(Error::task(anyhow!("nope")))
    })
    .named("failing");

    failing.spawn(&lp, ());

    let err = failing.call_blocking(&lp, ()).unwrap_err();
    assert_eq!(err.to_string(), "task failed: nope");

    lp.block_on(lp.wait(Duration::from_millis(10)))??;

    let reports = reports.borrow();
    assert_eq!(reports.len(), 2);
    assert!(
        reports
            .iter()
            .all(|r| r.proc_name.as_deref() == Some("failing"))
    );
    assert_ne!(reports[0].evaluation, reports[1].evaluation);
    Ok(())
}

#[weft::test]
async fn conclusion_happens_at_most_once(lp: Loop) -> anyhow::Result<()> {
    let forever = ConcurrentProc::new(|lp: Loop, ()| async move { lp.wait_resume::<u32>().await });

    let eval = forever.schedule(&lp, ());
    lp.yield_now().await?;
    assert!(eval.is_waiting());

    eval.conclude_to(9)?;
    assert!(matches!(eval.conclude_to(10), Err(Error::Protocol(_))));

    assert_eq!(eval.await_result().await?, 9);
    assert_eq!(lp.idle_context_count(), lp.context_count());
    Ok(())
}

#[weft::test]
async fn fresh_evaluation_concluded_before_start(lp: Loop) -> anyhow::Result<()> {
    let started = Rc::new(Cell::new(false));
    let flag = started.clone();

    let probe = ConcurrentProc::new(move |_: Loop, ()| {
        let flag = flag.clone();
        async move {
            flag.set(true);
            Ok(1u8)
        }
    });

    let eval = probe.schedule(&lp, ());
    eval.conclude_to(2)?;
    lp.yield_now().await?;

    assert!(!started.get());
    assert_eq!(eval.await_result().await?, 2);
    Ok(())
}

#[weft::test]
async fn self_conclusion_cancels_the_next_wait(lp: Loop) -> anyhow::Result<()> {
    type Slot = Rc<RefCell<Option<Evaluation<u32>>>>;

    let cancelled = Rc::new(Cell::new(false));
    let slot = Slot::default();

    let quitter = ConcurrentProc::new(|lp: Loop, (slot, cancelled): (Slot, Rc<Cell<bool>>)| async move {
        let me = slot
            .borrow()
            .clone()
            .ok_or_else(|| Error::fatal("handle missing"))?;

        me.conclude_to(1)?;

        let after = lp.wait(Duration::from_millis(1)).await;
        cancelled.set(after.is_err_and(|e| e.is_cancellation()));

        Ok(2u32)
    });

    let eval = quitter.schedule(&lp, (slot.clone(), cancelled.clone()));
    *slot.borrow_mut() = Some(eval.clone());

    assert_eq!(eval.await_result().await?, 1);
    assert!(cancelled.get());
    Ok(())
}

#[weft::test]
async fn sequential_calls_reuse_one_context(lp: Loop) -> anyhow::Result<()> {
    let locate = ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.wait(Duration::from_millis(1)).await?;
        Ok(lp.current_context())
    });

    let first = locate.call(&lp, ()).await?;
    let second = locate.call(&lp, ()).await?;

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(lp.context_count(), 1);
    assert_eq!(lp.current_context(), None);
    Ok(())
}

#[weft::test]
async fn idle_contexts_start_tasks_without_waiting_for_quota(lp: Loop) -> anyhow::Result<()> {
    let nap = ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.wait(Duration::from_millis(20)).await?;
        Ok(())
    });

    // Overlapping sleepers grow the pool one context per iteration.
    let sleepers: Vec<_> = (0..3).map(|_| nap.schedule(&lp, ())).collect();
    for sleeper in &sleepers {
        sleeper.await_result().await?;
    }
    assert_eq!(lp.context_count(), 3);
    assert_eq!(lp.idle_context_count(), 3);

    let quick = ConcurrentProc::new(|_lp: Loop, n: u32| async move { Ok(n) });
    let started: Vec<_> = (0..3).map(|n| quick.schedule(&lp, n)).collect();

    lp.run_once()?;

    assert!(started.iter().all(|eval| eval.is_concluded()));
    assert_eq!(started[2].result().transpose()?, Some(2));
    assert_eq!(lp.context_count(), 3);
    Ok(())
}

#[weft::test(context_quota = 4)]
async fn immediate_carts_wait_for_the_next_pass(lp: Loop) -> anyhow::Result<()> {
    let log = Rc::new(RefCell::new(Vec::new()));

    let worker = ConcurrentProc::new(|lp: Loop, (tag, log): (char, Rc<RefCell<Vec<char>>>)| async move {
        for _ in 0..3 {
            log.borrow_mut().push(tag);
            lp.yield_now().await?;
        }
        Ok(())
    });

    let a = worker.schedule(&lp, ('a', log.clone()));
    let b = worker.schedule(&lp, ('b', log.clone()));

    a.await_result().await?;
    b.await_result().await?;

    assert_eq!(*log.borrow(), ['a', 'b', 'a', 'b', 'a', 'b']);
    Ok(())
}

#[weft::test]
async fn quota_postpones_extra_starts(lp: Loop) -> anyhow::Result<()> {
    let log = Rc::new(RefCell::new(Vec::new()));

    let worker = ConcurrentProc::new(|lp: Loop, (tag, log): (char, Rc<RefCell<Vec<char>>>)| async move {
        for _ in 0..2 {
            log.borrow_mut().push(tag);
            lp.yield_now().await?;
        }
        Ok(())
    });

    let a = worker.schedule(&lp, ('a', log.clone()));
    let b = worker.schedule(&lp, ('b', log.clone()));

    a.await_result().await?;
    b.await_result().await?;

    // One fresh context per iteration: `b` only starts on the second pass.
    assert_eq!(*log.borrow(), ['a', 'a', 'b', 'b']);
    Ok(())
}
