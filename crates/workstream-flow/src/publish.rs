//! Appending envelopes to the main event stream.

use std::sync::Arc;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::substrate::Substrate;

/// Producer-side handle for the main event stream.
#[derive(Debug, Clone)]
pub struct StreamPublisher<S> {
    substrate: Arc<S>,
    stream: String,
}

impl<S: Substrate> StreamPublisher<S> {
    /// Creates a publisher for the given stream.
    pub fn new(substrate: Arc<S>, stream: impl Into<String>) -> Self {
        Self {
            substrate,
            stream: stream.into(),
        }
    }

    /// Returns the stream name.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Appends an envelope as a stream entry with a single `event` field.
    ///
    /// Returns the assigned entry ID.
    ///
    /// # Errors
    ///
    /// Fails on serialization or substrate errors.
    pub async fn publish(&self, envelope: &Envelope) -> Result<String> {
        let fields = envelope.encode()?;
        self.substrate.stream_append(&self.stream, &fields).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EventPayload, InitialRequestPayload};
    use crate::substrate::memory::InMemorySubstrate;

    #[tokio::test]
    async fn publishes_the_event_field() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let publisher = StreamPublisher::new(substrate.clone(), "audit:events");

        let envelope = Envelope::build(
            EventPayload::InitialRequestReceived(InitialRequestPayload {
                project_id: "P1".parse().unwrap(),
                request_text: "full audit".into(),
            }),
            "gateway",
        );
        publisher.publish(&envelope).await.unwrap();

        let entries = substrate.stream_range("audit:events").await.unwrap();
        assert_eq!(entries.len(), 1);
        let decoded = Envelope::decode(&entries[0].fields).unwrap();
        assert_eq!(decoded.event_id, envelope.event_id);
    }
}
