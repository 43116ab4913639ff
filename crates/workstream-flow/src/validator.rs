//! Validator service: contract enforcement as its own consumer group.
//!
//! The validator is a stream consumer whose handler accepts everything; the
//! runtime it rides on already validates, quarantines, and acks. Running it
//! in a dedicated group (`validators`) surfaces contract violations for
//! every event regardless of which other groups process it. It holds no
//! locks and mutates no stores.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::consumer::{ConsumerConfig, EventHandler, HandlerError, StreamConsumer};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::schema::SchemaRegistry;
use crate::substrate::{RawFields, Substrate};

/// Handler that accepts every validated envelope without side effects.
#[derive(Debug, Clone, Default)]
pub struct AcceptAllHandler;

#[async_trait]
impl EventHandler for AcceptAllHandler {
    async fn handle(
        &self,
        _envelope: &Envelope,
        _raw: &RawFields,
    ) -> std::result::Result<(), HandlerError> {
        Ok(())
    }
}

/// The conventional consumer group of the validator service.
pub const VALIDATOR_GROUP: &str = "validators";

/// Contract-enforcement service over the main stream.
pub struct ValidatorService<S> {
    consumer: StreamConsumer<S>,
}

impl<S: Substrate> ValidatorService<S> {
    /// Creates the service from a consumer configuration.
    ///
    /// The configuration's `group` should be [`VALIDATOR_GROUP`] unless
    /// several validator fleets are deliberately run side by side.
    pub fn new(substrate: Arc<S>, registry: Arc<SchemaRegistry>, config: ConsumerConfig) -> Self {
        let consumer =
            StreamConsumer::new(substrate, registry, Arc::new(AcceptAllHandler), config);
        Self { consumer }
    }

    /// Returns the underlying consumer (for single-poll drives in tests).
    #[must_use]
    pub fn consumer(&self) -> &StreamConsumer<S> {
        &self.consumer
    }

    /// Runs the validation loop until cancelled.
    ///
    /// # Errors
    ///
    /// Fails when the consumer group cannot be created.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.consumer.run(cancel).await
    }
}
