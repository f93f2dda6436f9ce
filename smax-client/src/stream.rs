//! Stream of values pulled for a subscription.

use crate::types::SmaxValue;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// An async stream of values delivered by a subscription worker.
///
/// Returned by [`crate::SmaxClient::subscribe_stream`]. Implements
/// [`futures::Stream`] for use with [`futures::StreamExt`] combinators.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// let mut stream = client.subscribe_stream("weather:*").await?;
///
/// while let Some(value) = stream.next().await {
///     println!("{} = {}", value.name(), value);
/// }
/// ```
pub struct ValueStream {
    receiver: mpsc::Receiver<SmaxValue>,
}

impl ValueStream {
    pub(crate) fn new(receiver: mpsc::Receiver<SmaxValue>) -> Self {
        Self { receiver }
    }

    /// Receives the next value; `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<SmaxValue> {
        self.receiver.recv().await
    }

    /// Receives a value without waiting, if one is queued.
    pub fn try_next(&mut self) -> Option<SmaxValue> {
        self.receiver.try_recv().ok()
    }

    /// Closes the stream; its worker stops at the next delivery.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Stream for ValueStream {
    type Item = SmaxValue;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dim, Metadata, TypeTag, Value};
    use futures::StreamExt;

    fn value(n: i32) -> SmaxValue {
        SmaxValue::leaf(Value::from(n), TypeTag::Int32, Dim::Scalar, Metadata::default())
    }

    #[tokio::test]
    async fn stream_yields_then_ends() -> Result<(), Box<dyn std::error::Error>> {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = ValueStream::new(rx);

        tx.send(value(1)).await?;
        tx.send(value(2)).await?;
        assert_eq!(stream.recv().await.and_then(|v| v.value().cloned()), Some(Value::from(1)));
        assert_eq!(stream.try_next().and_then(|v| v.value().cloned()), Some(Value::from(2)));
        assert!(stream.try_next().is_none());

        drop(tx);
        assert!(stream.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn closing_refuses_new_values() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = ValueStream::new(rx);
        stream.close();
        assert!(tx.send(value(3)).await.is_err());
    }
}
