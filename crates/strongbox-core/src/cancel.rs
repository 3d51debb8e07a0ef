//! Cooperative cancellation and deadlines for long-running operations.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{DumpError, RestoreError};

/// Fires a [`CancelSignal`]
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

/// Observes cancellation; cheap to clone and hand to subtasks
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// A connected trigger and signal
pub fn cancel_pair() -> (CancelTrigger, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelSignal { rx })
}

impl CancelTrigger {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// A signal that is never fired
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the trigger is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Why a bounded operation stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    TimedOut(Duration),
    Cancelled,
}

/// Run `fut` until it completes, `deadline` elapses or `cancel` fires.
/// The future is dropped on interruption.
pub async fn bounded<F: Future>(
    deadline: Duration,
    cancel: &CancelSignal,
    fut: F,
) -> Result<F::Output, Interrupted> {
    // Cancellation wins over a future that is also ready
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        outcome = tokio::time::timeout(deadline, fut) => {
            outcome.map_err(|_| Interrupted::TimedOut(deadline))
        }
    }
}

impl From<Interrupted> for DumpError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(after) => DumpError::TimedOut { after },
            Interrupted::Cancelled => DumpError::Cancelled,
        }
    }
}

impl From<Interrupted> for RestoreError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(after) => RestoreError::TimedOut { after },
            Interrupted::Cancelled => RestoreError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let out = bounded(Duration::from_secs(5), &CancelSignal::never(), async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts() {
        let out = bounded(
            Duration::from_secs(2),
            &CancelSignal::never(),
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;
        assert_eq!(out, Err(Interrupted::TimedOut(Duration::from_secs(2))));
    }

    #[tokio::test]
    async fn test_cancel_interrupts() {
        let (trigger, signal) = cancel_pair();
        let task = tokio::spawn(async move {
            bounded(
                Duration::from_secs(3600),
                &signal,
                std::future::pending::<()>(),
            )
            .await
        });
        trigger.cancel();
        assert_eq!(task.await.unwrap(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_subscribed_signal_sees_cancel() {
        let (trigger, _) = cancel_pair();
        let late = trigger.signal();
        assert!(!late.is_cancelled());
        trigger.cancel();
        assert!(late.is_cancelled());
        assert!(!CancelSignal::never().is_cancelled());
    }
}
