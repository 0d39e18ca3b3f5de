// Chunked transport for oversized whisper payloads.
//
// A serialized payload above the size threshold is split into fixed-size
// slices, each tagged with a shared message id, a zero-based index, and a
// final flag. Reassembly is strict: a message completes only when every
// index 0..=max is populated and the final flag was seen at the highest
// index. Duplicate chunks overwrite their slot idempotently. Assemblies
// with no chunk activity within the TTL are evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One slice of a chunked whisper payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkEnvelope {
    /// Shared id tying the slices of one message together.
    pub id: String,
    /// Zero-based slice index.
    pub index: u32,
    /// Slice content.
    pub chunk: String,
    /// Marks the last slice of the message.
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("reassembled payload for message {id} is not valid JSON")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a reassembled payload back into JSON.
pub fn parse_assembled(id: &str, assembled: &str) -> Result<serde_json::Value, ChunkError> {
    serde_json::from_str(assembled)
        .map_err(|source| ChunkError::Malformed { id: id.to_string(), source })
}

/// Split a serialized payload into fixed-size slices sharing `id`.
///
/// Slice boundaries respect character boundaries, so any UTF-8 payload
/// survives the round trip. An empty payload still produces one (final)
/// slice so the receiver has something to complete on.
pub fn split_into_chunks(id: &str, payload: &str, chunk_size: usize) -> Vec<ChunkEnvelope> {
    let chunk_size = chunk_size.max(1);
    let mut slices: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in payload.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            slices.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() || slices.is_empty() {
        slices.push(current);
    }

    let last = slices.len() - 1;
    slices
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| ChunkEnvelope {
            id: id.to_string(),
            index: index as u32,
            chunk,
            is_final: index == last,
        })
        .collect()
}

/// Reassembly buffer for one in-flight chunked message.
#[derive(Debug)]
struct Assembly {
    slots: Vec<Option<String>>,
    final_index: Option<u32>,
    last_activity: Instant,
}

impl Assembly {
    fn is_complete(&self) -> bool {
        let Some(final_index) = self.final_index else {
            return false;
        };
        self.slots.len() == final_index as usize + 1 && self.slots.iter().all(Option::is_some)
    }
}

/// Reassembles chunked messages arriving in arbitrary order.
///
/// Call `accept()` for each incoming chunk, then `evict_stale()`
/// periodically to drop assemblies whose sender gave up (or whose chunks
/// were lost — the transport never retransmits).
#[derive(Debug)]
pub struct ChunkAssembler {
    ttl: Duration,
    assemblies: HashMap<String, Assembly>,
}

impl ChunkAssembler {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, assemblies: HashMap::new() }
    }

    /// Feed one arriving chunk. Returns the reassembled payload string
    /// once the message is complete; the buffer is discarded on release.
    pub fn accept(&mut self, envelope: ChunkEnvelope, now: Instant) -> Option<String> {
        let complete = {
            let assembly = self.assemblies.entry(envelope.id.clone()).or_insert_with(|| Assembly {
                slots: Vec::new(),
                final_index: None,
                last_activity: now,
            });
            assembly.last_activity = now;

            let index = envelope.index as usize;
            if assembly.slots.len() <= index {
                assembly.slots.resize(index + 1, None);
            }
            assembly.slots[index] = Some(envelope.chunk);
            if envelope.is_final {
                assembly.final_index = Some(envelope.index);
            }
            assembly.is_complete()
        };

        if !complete {
            return None;
        }
        let assembly = self.assemblies.remove(&envelope.id)?;
        Some(assembly.slots.into_iter().flatten().collect())
    }

    /// Drop assemblies with no chunk activity within the TTL.
    /// Returns how many were evicted.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let before = self.assemblies.len();
        let ttl = self.ttl;
        self.assemblies.retain(|_, assembly| now.duration_since(assembly.last_activity) < ttl);
        before - self.assemblies.len()
    }

    /// Number of messages still waiting for chunks.
    pub fn pending_count(&self) -> usize {
        self.assemblies.len()
    }

    /// Time at which the oldest assembly becomes stale, or None if empty.
    pub fn next_eviction(&self) -> Option<Instant> {
        self.assemblies.values().map(|assembly| assembly.last_activity + self.ttl).min()
    }
}
