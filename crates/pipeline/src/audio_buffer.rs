//! Bounded inbound audio buffer
//!
//! Chunks are kept in arrival order. When the chunk capacity is exceeded the
//! oldest chunk is dropped; that loss is accepted.

use std::collections::VecDeque;

use voice_call_config::AudioBufferConfig;

/// Per-session queue of raw audio chunks
#[derive(Debug)]
pub struct AudioBuffer {
    chunks: VecDeque<Vec<u8>>,
    max_chunks: usize,
    min_audio_length: usize,
    buffered_bytes: usize,
    evicted: u64,
}

impl AudioBuffer {
    pub fn new(config: &AudioBufferConfig) -> Self {
        Self {
            chunks: VecDeque::with_capacity(config.max_chunks),
            max_chunks: config.max_chunks.max(1),
            min_audio_length: config.min_audio_length,
            buffered_bytes: 0,
            evicted: 0,
        }
    }

    /// Append a chunk; returns true once at least twice the minimum length is buffered
    pub fn add_chunk(&mut self, chunk: Vec<u8>) -> bool {
        if chunk.is_empty() {
            return self.is_ready();
        }
        self.buffered_bytes += chunk.len();
        self.chunks.push_back(chunk);

        while self.chunks.len() > self.max_chunks {
            if let Some(old) = self.chunks.pop_front() {
                self.buffered_bytes -= old.len();
                self.evicted += 1;
                tracing::debug!(
                    dropped_bytes = old.len(),
                    evicted_total = self.evicted,
                    "Audio buffer full, dropped oldest chunk"
                );
            }
        }

        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.buffered_bytes >= self.min_audio_length * 2
    }

    /// Take everything buffered, oldest first, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buffered_bytes);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.buffered_bytes = 0;
        out
    }

    /// Copy of everything buffered, oldest first, leaving the buffer as is
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buffered_bytes);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered_bytes = 0;
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks dropped on overflow since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
