//! Shutdown coordination.
//!
//! The trigger records *why* the gateway is stopping (which signal, or a
//! fatal server error); listeners wake with that reason so the drain path
//! can log it. The first reason wins; later triggers are ignored.

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
pub struct Shutdown {
    tx: watch::Sender<Option<&'static str>>,
}

/// A handle that resolves once shutdown has been triggered.
pub struct ShutdownListener {
    rx: watch::Receiver<Option<&'static str>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Record the stop reason and wake all listeners. Only the first call
    /// takes effect.
    pub fn trigger(&self, reason: &'static str) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// The recorded stop reason, if shutdown has been triggered.
    pub fn reason(&self) -> Option<&'static str> {
        *self.tx.borrow()
    }
}

impl ShutdownListener {
    /// Wait until shutdown is triggered, returning the recorded reason.
    pub async fn triggered(&mut self) -> &'static str {
        loop {
            if let Some(reason) = *self.rx.borrow_and_update() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                // Coordinator dropped without a trigger; treat as stopped.
                return "shutdown";
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
