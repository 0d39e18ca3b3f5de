// Wire protocol for whisper messaging: event registry, typed payloads,
// and the chunking codec for oversized payloads.

pub mod chunk;
pub mod whisper;
