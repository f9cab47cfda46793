//! Decoding and fan-out of inbound frames.
//!
//! One dispatcher instance is owned by the connection driver task, so all
//! delivery is serialized: a frame is fully dispatched before the next
//! event is processed. A malformed frame is reported and dropped without
//! touching connection state or the retained last message.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};

use super::error::WsError;
use super::traits::{FrameDecoder, Subscriber};

pub(crate) struct MessageDispatcher<M, P> {
    decoder: P,
    subscribers: Vec<Box<dyn Subscriber<M>>>,
    /// Broadcast fan-out for stream-style consumers
    broadcast_tx: broadcast::Sender<M>,
    /// Most recent successfully decoded message, retained for late observers
    last_message_tx: watch::Sender<Option<M>>,
}

impl<M, P> MessageDispatcher<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: FrameDecoder<M>,
{
    pub(crate) fn new(
        decoder: P,
        broadcast_tx: broadcast::Sender<M>,
        last_message_tx: watch::Sender<Option<M>>,
    ) -> Self {
        Self {
            decoder,
            subscribers: Vec::new(),
            broadcast_tx,
            last_message_tx,
        }
    }

    /// Register a callback subscriber. Subscribers are invoked in
    /// registration order and are never unregistered; they live as long as
    /// the dispatcher.
    pub(crate) fn attach(&mut self, subscriber: Box<dyn Subscriber<M>>) {
        self.subscribers.push(subscriber);
    }

    /// Decode one raw frame and deliver the resulting messages.
    pub(crate) fn dispatch(&mut self, bytes: &[u8]) {
        match self.decoder.decode(bytes) {
            Ok(messages) => {
                for message in messages {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "dispatching decoded message");

                    _ = self.last_message_tx.send(Some(message.clone()));
                    _ = self.broadcast_tx.send(message.clone());

                    for subscriber in &mut self.subscribers {
                        if let Err(e) = subscriber.on_message(&message) {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "subscriber on_message failed");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    }
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "failed to decode inbound frame");

                let decode_err = WsError::InvalidMessage(e.to_string());
                self.notify_error(&decode_err);
            }
        }
    }

    pub(crate) fn notify_open(&mut self) {
        for subscriber in &mut self.subscribers {
            if let Err(e) = subscriber.on_open() {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "subscriber on_open failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    pub(crate) fn notify_close(&mut self) {
        for subscriber in &mut self.subscribers {
            if let Err(e) = subscriber.on_close() {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "subscriber on_close failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    pub(crate) fn notify_error(&mut self, error: &WsError) {
        for subscriber in &mut self.subscribers {
            if let Err(e) = subscriber.on_error(error) {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "subscriber on_error failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test-only setup")]

    use std::error::Error as StdError;
    use std::sync::{Arc, Mutex};

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Sample {
        value: i64,
    }

    struct JsonDecoder;

    impl FrameDecoder<Sample> for JsonDecoder {
        fn decode(&self, bytes: &[u8]) -> crate::Result<Vec<Sample>> {
            let msg: Sample = serde_json::from_slice(bytes)?;
            Ok(vec![msg])
        }
    }

    /// Records invocations into a shared log; optionally fails on_message.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Subscriber<Sample> for Recorder {
        fn on_message(
            &mut self,
            message: &Sample,
        ) -> Result<(), Box<dyn StdError + Send + Sync>> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, message.value));
            if self.fail {
                return Err("recorder failure".into());
            }
            Ok(())
        }

        fn on_error(
            &mut self,
            error: &WsError,
        ) -> Result<(), Box<dyn StdError + Send + Sync>> {
            let label = match error {
                WsError::InvalidMessage(_) => "invalid",
                _ => "other",
            };
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:error:{label}", self.name));
            Ok(())
        }
    }

    fn dispatcher() -> (
        MessageDispatcher<Sample, JsonDecoder>,
        watch::Receiver<Option<Sample>>,
    ) {
        let (broadcast_tx, _) = broadcast::channel(16);
        let (last_tx, last_rx) = watch::channel(None);
        (
            MessageDispatcher::new(JsonDecoder, broadcast_tx, last_tx),
            last_rx,
        )
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let (mut dispatcher, _last_rx) = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            dispatcher.attach(Box::new(Recorder {
                name,
                log: Arc::clone(&log),
                fail: false,
            }));
        }

        dispatcher.dispatch(br#"{"value": 7}"#);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:7", "second:7", "third:7"]
        );
    }

    #[test]
    fn failing_subscriber_does_not_block_the_rest() {
        let (mut dispatcher, _last_rx) = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.attach(Box::new(Recorder {
            name: "faulty",
            log: Arc::clone(&log),
            fail: true,
        }));
        dispatcher.attach(Box::new(Recorder {
            name: "healthy",
            log: Arc::clone(&log),
            fail: false,
        }));

        dispatcher.dispatch(br#"{"value": 1}"#);
        dispatcher.dispatch(br#"{"value": 2}"#);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["faulty:1", "healthy:1", "faulty:2", "healthy:2"]
        );
    }

    #[test]
    fn malformed_frame_leaves_last_message_untouched() {
        let (mut dispatcher, last_rx) = dispatcher();

        dispatcher.dispatch(br#"{"value": 42}"#);
        assert_eq!(*last_rx.borrow(), Some(Sample { value: 42 }));

        dispatcher.dispatch(b"not json at all");
        assert_eq!(
            *last_rx.borrow(),
            Some(Sample { value: 42 }),
            "decode failure must not overwrite the retained message"
        );

        dispatcher.dispatch(br#"{"value": 43}"#);
        assert_eq!(*last_rx.borrow(), Some(Sample { value: 43 }));
    }

    #[test]
    fn decode_failure_reports_invalid_message() {
        let (mut dispatcher, _last_rx) = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.attach(Box::new(Recorder {
            name: "obs",
            log: Arc::clone(&log),
            fail: false,
        }));

        dispatcher.dispatch(b"not json at all");

        assert_eq!(*log.lock().unwrap(), vec!["obs:error:invalid"]);
    }

    #[test]
    fn last_message_updates_even_without_subscribers() {
        let (mut dispatcher, last_rx) = dispatcher();
        dispatcher.dispatch(br#"{"value": 5}"#);
        assert_eq!(*last_rx.borrow(), Some(Sample { value: 5 }));
    }
}
