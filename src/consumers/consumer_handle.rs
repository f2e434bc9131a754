use tokio::{
    sync::oneshot,
    task::{JoinError, JoinHandle},
};

/// A handle on a consumption loop running in the background.
///
/// The loop keeps running until its delivery stream ends (e.g. the channel is closed), the
/// stream fails, it is told to [`stop`](ConsumerHandle::stop), it reaches its
/// [`exit_after`](crate::consumers::ConsumeConfig::exit_after) limit, or it is aborted.
/// Dropping the handle does not stop the loop.
#[derive(Debug)]
pub struct ConsumerHandle {
    consumer_tag: String,
    queue_name: String,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ConsumeError>>,
}

/// The reason a consumption loop ended abnormally.
#[derive(thiserror::Error, Debug)]
pub enum ConsumeError {
    #[error("The delivery stream failed")]
    Stream(#[source] anyhow::Error),
    /// The loop stopped but the broker may still push deliveries to the subscription.
    #[error("Failed to cancel the subscription with the broker")]
    Cancel(#[source] anyhow::Error),
    #[error("The consumption loop was aborted or panicked")]
    Aborted(#[source] JoinError),
}

impl ConsumerHandle {
    pub(crate) fn new(
        consumer_tag: String,
        queue_name: String,
        stop: oneshot::Sender<()>,
        task: JoinHandle<Result<(), ConsumeError>>,
    ) -> Self {
        Self {
            consumer_tag,
            queue_name,
            stop: Some(stop),
            task,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the loop to exit once the delivery currently being processed (if any) is settled.
    ///
    /// The subscription is then cancelled with the broker and the deliveries it had already
    /// pushed to this consumer are requeued.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // The loop may have already exited on its own.
            let _ = stop.send(());
        }
    }

    /// Cancel the loop right away, possibly in the middle of processing a delivery.
    /// The interrupted delivery is left unsettled.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<(), ConsumeError> {
        self.task.await.map_err(ConsumeError::Aborted)?
    }

    /// [`stop`](ConsumerHandle::stop) the loop, then [`join`](ConsumerHandle::join) it.
    pub async fn shutdown(mut self) -> Result<(), ConsumeError> {
        self.stop();
        self.join().await
    }

    /// Let the loop run unattended until its delivery stream ends.
    pub fn detach(self) {}
}
