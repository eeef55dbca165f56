use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use weft::{ConcurrentProc, Error, Loop, TaskError};

fn explode() -> weft::Result<u32> {
    panic!("boom")
}

fn wait_ms(lp: &Loop, ms: u64) -> weft::Result<()> {
    let handle = lp.clone();
    lp.block_on(async move { handle.wait(Duration::from_millis(ms)).await })?
}

#[test]
fn panicking_task_tears_the_loop_down() -> anyhow::Result<()> {
    let lp = Loop::new()?;

    let bystander = ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.wait(Duration::from_secs(60)).await?;
        Ok(1u32)
    });
    let boom = ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.wait(Duration::from_millis(1)).await?;
        explode()
    });

    let victim = bystander.schedule(&lp, ());
    let err = boom.call_blocking(&lp, ()).unwrap_err();

    let cause = match err {
        Error::LoopTeardown(cause) => cause,
        other => panic!("expected a teardown, got {other:?}"),
    };
    assert!(cause.is_fatal());

    assert!(matches!(victim.result(), Some(Err(Error::LoopTeardown(_)))));
    assert_eq!(lp.pending_resumptions(), 0);
    assert!(!lp.is_awaiting_io());

    // The reinitialized loop works as before.
    wait_ms(&lp, 2)?;
    assert_eq!(bystander.schedule(&lp, ()).state(), weft::EvalState::Fresh);
    Ok(())
}

#[test]
fn fatal_error_from_a_body_is_reported_and_tears_down() -> anyhow::Result<()> {
    let reports = Rc::new(RefCell::new(Vec::<TaskError>::new()));
    let sink = reports.clone();

    let lp = Loop::builder()
        .on_task_error(move |report| sink.borrow_mut().push(report.clone()))
        .build()?;

    let doomed = ConcurrentProc::new(|_: Loop, ()| async move {
        Err::<(), _>(Error::fatal("disk on fire"))
    });
    doomed.spawn(&lp, ());

    let err = wait_ms(&lp, 10).unwrap_err();

    assert_eq!(err, Error::LoopTeardown(Box::new(Error::fatal("disk on fire"))));
    assert_eq!(reports.borrow().len(), 1);

    wait_ms(&lp, 1)?;
    Ok(())
}

#[test]
fn waiting_on_nothing_is_fatal() -> anyhow::Result<()> {
    let lp = Loop::new()?;

    let err = lp.block_on(lp.wait_resume::<u32>()).unwrap_err();

    let cause = match err {
        Error::LoopTeardown(cause) => cause,
        other => panic!("expected a teardown, got {other:?}"),
    };
    assert_eq!(*cause, Error::fatal("infinitely running loop detected"));

    wait_ms(&lp, 1)?;
    Ok(())
}

#[test]
fn foreign_pending_future_is_rejected() -> anyhow::Result<()> {
    let lp = Loop::new()?;

    let err = lp.block_on(std::future::pending::<()>()).unwrap_err();

    assert!(matches!(err, Error::Protocol(_)));
    Ok(())
}

#[test]
fn block_on_is_not_reentrant() -> anyhow::Result<()> {
    let lp = Loop::new()?;
    let inner = lp.clone();

    let nested = lp.block_on(async move { inner.block_on(async { 1 }) })?;

    assert!(matches!(nested, Err(Error::Protocol(_))));
    Ok(())
}

#[weft::test]
async fn tasks_cannot_drive_the_loop(lp: Loop) -> anyhow::Result<()> {
    let driver = ConcurrentProc::new(|lp: Loop, ()| async move {
        Ok(matches!(lp.run_once(), Err(Error::Protocol(_))))
    });

    assert!(driver.call(&lp, ()).await?);
    Ok(())
}
