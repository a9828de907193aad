use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// An awaitable boolean flag, used for the pause and stop controls. Any task
/// can flip it; any number of tasks can wait for either edge.
#[derive(Debug, Default)]
pub struct Switch {
    on: AtomicBool,
    changed: Notify,
}

impl Switch {
    pub fn new(on: bool) -> Self {
        Self {
            on: AtomicBool::new(on),
            changed: Notify::new(),
        }
    }

    pub fn set(&self, on: bool) {
        if self.on.swap(on, Ordering::SeqCst) != on {
            self.changed.notify_waiters();
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub async fn wait_on(&self) {
        self.wait_for(true).await
    }

    pub async fn wait_off(&self) {
        self.wait_for(false).await
    }

    async fn wait_for(&self, target: bool) {
        loop {
            if self.is_on() == target {
                return;
            }
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_on() == target {
                return;
            }
            notified.await;
        }
    }
}
