use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// The first run of digits in `text`, as milliseconds. No digits means the
/// request runs once.
pub fn parse_interval(text: &str) -> Option<Duration> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u64>().ok().map(Duration::from_millis)
}

/// Shared stop flag for a poll loop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

impl CancelToken {
    pub fn new() -> CancelToken {
        let (sender, _) = watch::channel(false);
        CancelToken {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `duration`; returns true when woken by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => self.is_cancelled(),
            _ = self.cancelled() => true,
        }
    }
}

/// Handle to a spawned poll. Dropping it detaches the poll; call `cancel` to
/// stop it.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn spawn<F, Fut>(body: F) -> PollHandle
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let task = tokio::spawn(body(cancel.clone()));
        PollHandle { cancel, task }
    }

    /// Stops future iterations. A request already on the wire still lands.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the poll task to end.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}
