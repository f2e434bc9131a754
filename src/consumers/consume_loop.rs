use crate::{
    consumers::{
        extensions::with_extensions, ConsumeError, ConsumerHandle, Handler, HandlingContext,
        MiddlewareChain,
    },
    transport::{Channel, DeliveryStream, InboundDelivery},
};
use futures_util::StreamExt;
use std::sync::Arc;
use task_local_extensions::Extensions;
use tokio::sync::oneshot;

/// Everything needed to run a delivery through middlewares and handler, then settle it.
pub(crate) struct Pipeline {
    /// Exchange-level middlewares: the outermost layer.
    pub(crate) exchange_middleware: Arc<MiddlewareChain>,
    pub(crate) queue_middleware: Arc<MiddlewareChain>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) queue_name: String,
    /// The broker settles deliveries itself, no ack/nack must be sent.
    pub(crate) auto_ack: bool,
}

impl Pipeline {
    /// Process an incoming delivery - middlewares, handler, ack/nack against the broker.
    ///
    /// The acknowledgement handle is taken before any middleware runs: whatever happens to the
    /// working copy of the delivery, the message settled is the one that entered this pass.
    #[tracing::instrument(
        name = "process_delivery",
        skip_all,
        fields(
            queue_name = %self.queue_name,
            delivery_tag = inbound.delivery.delivery_tag
        ),
        level = "debug"
    )]
    pub(crate) async fn process(&self, inbound: InboundDelivery) {
        let InboundDelivery { delivery, acker } = inbound;

        let exchange_before = self.exchange_middleware.before();
        let queue_before = self.queue_middleware.before();
        let queue_after = self.queue_middleware.after();
        let exchange_after = self.exchange_middleware.after();

        let pass = async move {
            let mut context = HandlingContext::new();
            let mut delivery = delivery;
            for middleware in exchange_before.iter().chain(queue_before.iter()) {
                middleware.before(&mut context, &mut delivery).await;
            }

            let response = self
                .handler
                .handle(context.clone(), delivery.clone())
                .await;

            for middleware in queue_after.iter().chain(exchange_after.iter()) {
                middleware.after(context.clone(), &delivery, &response).await;
            }
            context.cancel();
            response
        };
        let (_, response) = with_extensions(Extensions::new(), pass).await;

        if self.auto_ack {
            return;
        }
        let settled = if response.nack {
            acker.nack(true).await
        } else {
            acker.ack().await
        };
        if let Err(e) = settled {
            tracing::warn!(
                nack = response.nack,
                "Failed to settle the delivery with the broker: {:?}",
                e
            );
        }
    }
}

/// Start a consumption loop in the background.
pub(crate) fn spawn(
    pipeline: Pipeline,
    channel: Arc<dyn Channel>,
    stream: DeliveryStream,
    consumer_tag: String,
    exit_after: Option<u64>,
) -> ConsumerHandle {
    let (stop_sender, stop_receiver) = oneshot::channel();
    let queue_name = pipeline.queue_name.clone();
    let task = tokio::spawn(run(
        pipeline,
        channel,
        stream,
        stop_receiver,
        exit_after,
        consumer_tag.clone(),
    ));
    ConsumerHandle::new(consumer_tag, queue_name, stop_sender, task)
}

/// Drain `stream` one delivery at a time, in arrival order.
///
/// The loop exits when the stream ends, when the stream fails, when a stop signal is received
/// or after `exit_after` deliveries. A stop signal is only honoured between deliveries.
/// On stop and on `exit_after` the subscription is cancelled and the deliveries the broker
/// had already pushed are handed back (see [`cancel_and_drain`]).
#[tracing::instrument(
    name = "consumer_run",
    skip_all,
    fields(queue_name = %pipeline.queue_name, consumer_tag = %consumer_tag)
)]
async fn run(
    pipeline: Pipeline,
    channel: Arc<dyn Channel>,
    mut stream: DeliveryStream,
    mut stop: oneshot::Receiver<()>,
    exit_after: Option<u64>,
    consumer_tag: String,
) -> Result<(), ConsumeError> {
    tracing::info!("Consumer started");
    let mut processed: u64 = 0;
    let mut listening = true;

    let result = loop {
        if exit_after == Some(processed) {
            break cancel_and_drain(&pipeline, channel.as_ref(), &mut stream, &consumer_tag)
                .await;
        }

        tokio::select! {
            // Prefer stopping over processing more deliveries.
            biased;

            signal = &mut stop, if listening => match signal {
                Ok(()) => {
                    tracing::info!("Consumer received a stop signal");
                    break cancel_and_drain(&pipeline, channel.as_ref(), &mut stream, &consumer_tag)
                .await;
                }
                // The handle is gone: nobody can stop us anymore.
                Err(_) => listening = false,
            },

            next = stream.next() => match next {
                None => break Ok(()),
                Some(Err(e)) => {
                    tracing::error!("Consumer error: {:?}", e);
                    break Err(ConsumeError::Stream(e));
                }
                Some(Ok(inbound)) => {
                    pipeline.process(inbound).await;
                    processed += 1;
                }
            },
        }
    };

    tracing::info!(processed, "Consumer stopped");
    result
}

/// Cancel the subscription, then hand back what the broker pushed before the cancellation
/// took effect.
///
/// Buffered deliveries are nacked with requeue, for another consumer to pick up. With
/// `auto_ack` the broker already considers them delivered: they go through the pipeline.
async fn cancel_and_drain(
    pipeline: &Pipeline,
    channel: &dyn Channel,
    stream: &mut DeliveryStream,
    consumer_tag: &str,
) -> Result<(), ConsumeError> {
    channel.cancel(consumer_tag).await.map_err(|e| {
        tracing::error!("Failed to cancel the consumer: {:?}", e);
        ConsumeError::Cancel(e)
    })?;

    let mut requeued: u64 = 0;
    while let Some(next) = stream.next().await {
        let inbound = next.map_err(|e| {
            tracing::error!("Consumer error while draining: {:?}", e);
            ConsumeError::Stream(e)
        })?;
        if pipeline.auto_ack {
            pipeline.process(inbound).await;
            continue;
        }
        match inbound.acker.nack(true).await {
            Ok(()) => requeued += 1,
            Err(e) => tracing::warn!(
                delivery_tag = inbound.delivery.delivery_tag,
                "Failed to requeue a buffered delivery: {:?}",
                e
            ),
        }
    }
    if requeued > 0 {
        tracing::info!(requeued, "Requeued the deliveries buffered before the cancellation");
    }
    Ok(())
}
