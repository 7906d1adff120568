// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::AsyncValue;

use std::time::Duration;

use tokio::time::sleep;

#[tokio::test]
async fn send() {
    let (_value, sender, receiver) = AsyncValue::<_, ()>::new();
    let _send_task = tokio::spawn(async move { sender.send(42) });
    assert_eq!(Some(42), receiver.recv().await);
}

#[tokio::test]
async fn cancel_explicit() {
    let (value, mut sender, receiver) = AsyncValue::<(), ()>::new();

    // A task that will never do any meaningful work, and just waits to be interrupted.
    let _send_task = tokio::spawn(async move { sender.interrupted().await });

    tokio::select! {
      _ = sleep(Duration::from_secs(1)) => {},
      _ = receiver.recv() => { panic!("Should have continued to wait.") }
    }

    // Dropping the AsyncValue closes the item channel, so the task observes cancellation.
    std::mem::drop(value);
    assert_eq!(None, receiver.recv().await);
}

#[tokio::test]
async fn cancel_implicit() {
    let (value, mut sender, receiver) = AsyncValue::<(), ()>::new();

    let send_task = tokio::spawn(async move { sender.interrupted().await });

    tokio::select! {
      _ = sleep(Duration::from_secs(1)) => {},
      _ = receiver.recv() => { panic!("Should have continued to wait.") }
    }

    // Dropping the only receiver means no one can observe the result, so the work should be
    // considered canceled, and no new receiver can be created.
    std::mem::drop(receiver);
    assert_eq!(None, send_task.await.unwrap());
    assert!(value.receiver().is_none());
}

#[tokio::test]
async fn interrupt_explicit() {
    let (mut value, mut sender, receiver) = AsyncValue::<(), ()>::new();

    let send_task = tokio::spawn(async move { sender.interrupted().await });

    tokio::select! {
      _ = sleep(Duration::from_secs(1)) => {},
      _ = receiver.recv() => { panic!("Should have continued to wait.") }
    }

    value.try_interrupt(()).unwrap();
    assert_eq!(Some(()), send_task.await.unwrap());
    assert_eq!(None, receiver.recv().await);
}

#[tokio::test]
async fn interrupt_payload_is_delivered() {
    #[derive(Debug, PartialEq)]
    enum Signal {
        Dirtied,
    }

    let (mut value, mut sender, receiver) = AsyncValue::<u32, Signal>::new();
    let send_task = tokio::spawn(async move {
        match sender.interrupted().await {
            Some(Signal::Dirtied) => 7,
            None => 0,
        }
    });

    value.try_interrupt(Signal::Dirtied).unwrap();
    assert_eq!(7, send_task.await.unwrap());
    assert_eq!(None, receiver.recv().await);
}
