//! Synchronous delivery of queued callbacks.
//!
//! Callbacks are delivered in posting order on the current thread. A
//! callback that fails is logged and counted; the loop keeps going.
//! Callbacks posted while the loop runs are delivered in the same run.

use crate::bridge::Bridge;
use crate::error::Result;
use crate::selector::Selector;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

enum Callback {
    Message {
        receiver: Value,
        selector: Selector,
        signature: Option<String>,
        args: Vec<Value>,
    },
    Script(Box<dyn FnOnce(&Bridge) -> Result<()>>),
}

impl Callback {
    fn describe(&self) -> String {
        match self {
            Callback::Message { selector, .. } => selector.to_string(),
            Callback::Script(_) => "script callback".to_string(),
        }
    }
}

/// Outcome of [`RunLoop::run_until_idle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Callbacks that completed.
    pub delivered: usize,
    /// Callbacks that returned an error.
    pub failed: usize,
}

/// A queue of callbacks delivered through a bridge.
pub struct RunLoop {
    bridge: Bridge,
    queue: RefCell<VecDeque<Callback>>,
}

impl RunLoop {
    /// Creates an empty loop that delivers through `bridge`.
    #[must_use]
    pub fn new(bridge: &Bridge) -> Self {
        Self {
            bridge: bridge.clone(),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    /// Queues a message send.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidSelector`] for malformed selectors.
    pub fn post(&self, receiver: &Value, selector: &str, args: Vec<Value>) -> Result<()> {
        self.push_message(receiver, selector, None, args)
    }

    /// Queues a message send with an explicit signature.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidSelector`] for malformed selectors.
    pub fn post_with_signature(
        &self,
        receiver: &Value,
        selector: &str,
        signature: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        self.push_message(receiver, selector, Some(signature.to_string()), args)
    }

    /// Queues a script closure.
    pub fn post_fn<F>(&self, callback: F)
    where
        F: FnOnce(&Bridge) -> Result<()> + 'static,
    {
        self.queue
            .borrow_mut()
            .push_back(Callback::Script(Box::new(callback)));
    }

    /// Number of queued callbacks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Delivers callbacks until the queue is empty.
    pub fn run_until_idle(&self) -> RunReport {
        let mut report = RunReport::default();
        loop {
            // The queue borrow ends here; callbacks may post more.
            let Some(callback) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            let name = callback.describe();
            match self.deliver(callback) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    log::error!("run loop callback {name} failed: {err}");
                    report.failed += 1;
                }
            }
            self.bridge.drain_pool();
        }
        log::debug!(
            "run loop idle: {} delivered, {} failed",
            report.delivered,
            report.failed
        );
        report
    }

    fn push_message(
        &self,
        receiver: &Value,
        selector: &str,
        signature: Option<String>,
        args: Vec<Value>,
    ) -> Result<()> {
        let selector: Selector = selector.parse()?;
        self.queue.borrow_mut().push_back(Callback::Message {
            receiver: receiver.clone(),
            selector,
            signature,
            args,
        });
        Ok(())
    }

    fn deliver(&self, callback: Callback) -> Result<()> {
        match callback {
            Callback::Message {
                receiver,
                selector,
                signature,
                args,
            } => self
                .bridge
                .send_selector(&receiver, &selector, signature.as_deref(), &args)
                .map(drop),
            Callback::Script(callback) => callback(&self.bridge),
        }
    }
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
