//! Subscription pumps.
//!
//! Each subscription owns one task pulling from its broker consumer and
//! forwarding MESSAGE frames, so broker order is kept per subscription
//! while different subscriptions interleave freely.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bridge::connection::Connection;
use crate::broker::{AckMode, Consumer};

/// How long `cancel` waits for a pump to close its consumer.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

pub struct Subscription {
    id: String,
    destination: String,
    ack_mode: AckMode,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn(
        connection: Weak<Connection>,
        id: String,
        destination: String,
        ack_mode: AckMode,
        consumer: Box<dyn Consumer>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump(
            connection,
            id.clone(),
            destination.clone(),
            ack_mode,
            consumer,
            stop_rx,
        ));
        Self {
            id,
            destination,
            ack_mode,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Destination as the client wrote it.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Stop the pump and wait until its consumer is closed. A pump that
    /// does not finish within `CANCEL_GRACE` is aborted.
    pub(crate) async fn cancel(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CANCEL_GRACE, &mut task).await.is_err() {
                tracing::warn!(subscription = %self.id, "Subscription pump did not stop, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn pump(
    connection: Weak<Connection>,
    id: String,
    destination: String,
    ack_mode: AckMode,
    mut consumer: Box<dyn Consumer>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = &mut stop => break,
            message = consumer.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let Some(connection) = connection.upgrade() else {
            break;
        };

        // Wait out any receipt-bearing frame in flight.
        let gate = connection.delivery_gate();
        let _shared = tokio::select! {
            biased;
            _ = &mut stop => break,
            guard = gate.read() => guard,
        };

        // A stalled transport must not keep the pump from stopping.
        let delivered = tokio::select! {
            biased;
            _ = &mut stop => break,
            delivered = connection.deliver_message(&id, &destination, ack_mode, message) => delivered,
        };
        if let Err(e) = delivered {
            tracing::debug!(
                session_id = %connection.session_id(),
                subscription = %id,
                error = %e,
                "Stopping subscription pump"
            );
            break;
        }
    }

    if let Err(e) = consumer.close().await {
        tracing::debug!(subscription = %id, error = %e, "Consumer close failed");
    }
}
