// Proposal epochs are driven through a boolean channel: every `true`
// runs one proposal round, `false` terminates the task. The round logic
// reaches the node through a shared handle captured by the closure; the
// task itself holds only the receiving end.

use std::future::Future;

use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Epoch {
    tx: mpsc::UnboundedSender<bool>,
}

impl Epoch {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Epoch { tx }, rx)
    }

    /// Kick off one proposal round.
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    /// Terminate the epoch task.
    pub fn stop(&self) {
        let _ = self.tx.send(false);
    }
}

pub fn spawn<F, Fut>(mut rx: mpsc::UnboundedReceiver<bool>, round: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(flag) = rx.recv().await {
            if !flag {
                break;
            }
            round().await;
        }
    });
}
