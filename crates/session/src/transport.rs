// Chunk-aware whisper send/receive over a joined presence channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use tandem_common::protocol::chunk::{
    parse_assembled, split_into_chunks, ChunkAssembler, ChunkEnvelope,
};
use tandem_common::protocol::whisper::{strip_chunked, WhisperEvent};

use crate::ports::{IdSource, PresenceChannel};

/// Sends whole or chunked whispers and reassembles incoming chunked ones.
///
/// Payloads whose serialized form stays under the chunk threshold travel
/// as a single whisper under the event name; larger ones are split into
/// an indexed chunk train under `chunked-{event}`. Incoming chunk trains
/// are buffered per message id until complete; stale buffers are dropped
/// by the periodic eviction sweep.
pub struct WhisperTransport {
    channel: Arc<dyn PresenceChannel>,
    ids: Arc<dyn IdSource>,
    chunk_size: usize,
    assembler: ChunkAssembler,
}

impl WhisperTransport {
    pub fn new(
        channel: Arc<dyn PresenceChannel>,
        ids: Arc<dyn IdSource>,
        chunk_size: usize,
        assembly_ttl: Duration,
    ) -> Self {
        Self { channel, ids, chunk_size, assembler: ChunkAssembler::new(assembly_ttl) }
    }

    /// Serialize and send a whisper, chunking when the payload is large.
    pub fn send<T: Serialize>(&self, event: &WhisperEvent, payload: &T) -> Result<()> {
        let value = serde_json::to_value(payload).context("failed to serialize whisper payload")?;
        let serialized = value.to_string();

        if serialized.chars().count() < self.chunk_size {
            debug!(event = %event.name(), "broadcasting whisper");
            return self.channel.whisper(&event.name(), value);
        }

        let id = self.ids.message_id();
        let chunked_event = event.chunked_name();
        for envelope in split_into_chunks(&id, &serialized, self.chunk_size) {
            let index = envelope.index;
            let chunk_value = serde_json::to_value(&envelope)
                .context("failed to serialize whisper chunk envelope")?;
            debug!(event = %chunked_event, index, "broadcasting whisper chunk");
            self.channel.whisper(&chunked_event, chunk_value)?;
        }
        Ok(())
    }

    /// Route one incoming whisper. Whole events pass straight through;
    /// chunked events are buffered until their message completes. Unknown
    /// events and malformed payloads are dropped.
    pub fn receive(
        &mut self,
        event: &str,
        payload: Value,
        now: Instant,
    ) -> Option<(WhisperEvent, Value)> {
        if let Some(inner) = strip_chunked(event) {
            let Some(inner_event) = WhisperEvent::parse(inner) else {
                warn!(event, "dropping chunk for unknown event");
                return None;
            };
            let envelope: ChunkEnvelope = match serde_json::from_value(payload) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(event, %error, "dropping malformed chunk envelope");
                    return None;
                }
            };
            let message_id = envelope.id.clone();
            let assembled = self.assembler.accept(envelope, now)?;
            return match parse_assembled(&message_id, &assembled) {
                Ok(value) => {
                    debug!(event = %inner_event.name(), %message_id, "reassembled chunked whisper");
                    Some((inner_event, value))
                }
                Err(error) => {
                    warn!(event, %error, "dropping unparseable reassembled payload");
                    None
                }
            };
        }

        match WhisperEvent::parse(event) {
            Some(parsed) => Some((parsed, payload)),
            None => {
                debug!(event, "ignoring unknown whisper event");
                None
            }
        }
    }

    /// Drop stale chunk assemblies; returns how many were evicted.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        self.assembler.evict_stale(now)
    }

    /// Deadline of the next assembly eviction, or None when nothing is
    /// buffered.
    pub fn next_eviction(&self) -> Option<Instant> {
        self.assembler.next_eviction()
    }

    /// Number of chunked messages still waiting for completion.
    pub fn pending_assemblies(&self) -> usize {
        self.assembler.pending_count()
    }
}
