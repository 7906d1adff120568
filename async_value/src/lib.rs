// Copyright 2020 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

//!
//! A cancellable, interruptible value computed by one sender and broadcast to
//! multiple receivers.
//!
//! `AsyncValue<T, I>` is the mechanism the Engine uses to let many callers of
//! the same Node observe a single in-flight computation, and to let the Graph
//! push an asynchronous interrupt (of type `I`) into that computation without
//! blocking on it. The value itself is delivered exactly once, via a
//! `tokio::sync::watch` channel (so a receiver created after completion still
//! observes the value); interrupts are delivered via a `tokio::sync::oneshot`,
//! since at most one interrupt needs to be in flight before the running task
//! reacts to it (it either does, or the value completes first).
//!
//! Work is implicitly cancelled if every `AsyncValueReceiver` is dropped: the
//! `item_receiver` is held weakly by the `AsyncValue`, so once the last strong
//! `Arc` goes away, `receiver()` starts returning `None` and the running task
//! (which polls `AsyncValueSender::interrupted()`) observes channel closure.
//!

use std::sync::{Arc, Weak};

use tokio::sync::{oneshot, watch};

pub struct AsyncValue<T: Clone + Send + Sync + 'static, I: Send + 'static> {
    item_receiver: Weak<watch::Receiver<Option<T>>>,
    interrupt_sender: Option<oneshot::Sender<I>>,
}

impl<T: Clone + Send + Sync + 'static, I: Send + 'static> AsyncValue<T, I> {
    pub fn new() -> (AsyncValue<T, I>, AsyncValueSender<T, I>, AsyncValueReceiver<T>) {
        let (interrupt_sender, interrupt_receiver) = oneshot::channel();
        let (item_sender, item_receiver) = watch::channel(None);
        let item_receiver = Arc::new(item_receiver);
        (
            AsyncValue {
                item_receiver: Arc::downgrade(&item_receiver),
                interrupt_sender: Some(interrupt_sender),
            },
            AsyncValueSender {
                item_sender,
                interrupt_receiver,
            },
            AsyncValueReceiver { item_receiver },
        )
    }

    ///
    /// Returns an AsyncValueReceiver for this value if the associated work has not already been
    /// canceled (ie, if at least one other receiver is still live).
    ///
    pub fn receiver(&self) -> Option<AsyncValueReceiver<T>> {
        self.item_receiver
            .upgrade()
            .map(|item_receiver| AsyncValueReceiver { item_receiver })
    }

    ///
    /// Attempts to deliver an interrupt to the running work. Returns the interrupt back if the
    /// work has already completed (and is thus no longer listening).
    ///
    pub fn try_interrupt(&mut self, i: I) -> Result<(), I> {
        if let Some(interrupt_sender) = self.interrupt_sender.take() {
            interrupt_sender.send(i)
        } else {
            Ok(())
        }
    }
}

pub struct AsyncValueReceiver<T: Clone + Send + Sync + 'static> {
    item_receiver: Arc<watch::Receiver<Option<T>>>,
}

impl<T: Clone + Send + Sync + 'static> AsyncValueReceiver<T> {
    ///
    /// Returns a Future that will wait for the result of this value, or None if the work was
    /// canceled (the sender was dropped without sending).
    ///
    pub async fn recv(&self) -> Option<T> {
        let mut item_receiver = (*self.item_receiver).clone();
        loop {
            if let Some(ref value) = *item_receiver.borrow() {
                return Some(value.clone());
            }

            #[allow(clippy::question_mark)]
            if item_receiver.changed().await.is_err() {
                return None;
            }
        }
    }
}

pub struct AsyncValueSender<T: Clone + Send + Sync + 'static, I: Send + 'static> {
    item_sender: watch::Sender<Option<T>>,
    interrupt_receiver: oneshot::Receiver<I>,
}

impl<T: Clone + Send + Sync + 'static, I: Send + 'static> AsyncValueSender<T, I> {
    pub fn send(self, item: T) {
        let _ = self.item_sender.send(Some(item));
    }

    ///
    /// Waits for either an interrupt to be delivered, or for all receivers to be dropped (in
    /// which case `None` is returned, and the caller should abandon its work).
    ///
    pub async fn interrupted(&mut self) -> Option<I> {
        tokio::select! {
          res = &mut self.interrupt_receiver => {
            match res {
              Ok(i) => Some(i),
              Err(_) => None,
            }
          }
          _ = self.item_sender.closed() => { None }
        }
    }
}

#[cfg(test)]
mod tests;
