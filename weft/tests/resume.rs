use std::time::Duration;
use weft::{ConcurrentProc, Error, Loop};

fn parked() -> ConcurrentProc<(), u32> {
    ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.current_evaluation().insert_data(String::from("tag"));
        lp.wait_resume::<u32>().await
    })
}

#[weft::test]
async fn manual_resume_delivers_the_value(lp: Loop) -> anyhow::Result<()> {
    let eval = parked().schedule(&lp, ());
    lp.yield_now().await?;

    eval.handle().resume(3u32)?;
    assert!(eval.is_waiting());

    assert_eq!(eval.await_result().await?, 3);
    Ok(())
}

#[weft::test]
async fn resume_is_checked(lp: Loop) -> anyhow::Result<()> {
    let eval = parked().schedule(&lp, ());

    // Not started yet.
    assert!(matches!(eval.handle().resume(1u32), Err(Error::Protocol(_))));

    lp.yield_now().await?;

    assert!(matches!(eval.handle().resume("three"), Err(Error::Protocol(_))));

    eval.handle().resume(3u32)?;
    assert!(matches!(eval.handle().resume(4u32), Err(Error::Protocol(_))));

    // The running outer evaluation cannot be resumed.
    let me = lp.current_evaluation();
    assert!(matches!(me.resume(()), Err(Error::Protocol(_))));

    assert_eq!(eval.await_result().await?, 3);
    assert!(matches!(eval.handle().resume(5u32), Err(Error::Protocol(_))));
    Ok(())
}

#[weft::test]
async fn resume_overrides_a_result_wait(lp: Loop) -> anyhow::Result<()> {
    let slow = ConcurrentProc::new(|lp: Loop, ()| async move {
        lp.wait(Duration::from_millis(50)).await?;
        Ok(1u32)
    });
    let waiter = ConcurrentProc::new(|_: Loop, target: weft::Evaluation<u32>| async move {
        target.await_result().await
    });

    let target = slow.schedule(&lp, ());
    let overridden = waiter.schedule(&lp, target.clone());
    lp.wait(Duration::from_millis(1)).await?;

    overridden.handle().resume(99u32)?;

    assert_eq!(overridden.await_result().await?, 99);
    assert_eq!(target.await_result().await?, 1);
    Ok(())
}

#[weft::test]
async fn evaluation_data_side_table(lp: Loop) -> anyhow::Result<()> {
    let eval = parked().schedule(&lp, ());
    lp.yield_now().await?;

    let handle = eval.handle();
    assert_eq!(handle.data::<String>().as_deref(), Some("tag"));
    assert_eq!(handle.data::<u8>(), None);

    handle.with_data(|tag: &mut String| tag.push('!'));
    assert_eq!(handle.remove_data::<String>().as_deref(), Some("tag!"));
    assert_eq!(handle.remove_data::<String>(), None);

    eval.conclude_to(0)?;
    Ok(())
}
