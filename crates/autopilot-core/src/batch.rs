//! Groups chunks into embedding requests.
//!
//! A batch never holds more than `max_items` chunks or more than
//! `max_tokens_per_batch` tokens. Chunks keep their order, so the j-th vector
//! returned for a batch belongs to `batch.chunks[j]`.

use crate::chunks::Chunk;
use crate::config::ChunkingConfig;
use crate::tokens::TokenCounter;

/// One embedding request worth of chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub chunks: Vec<Chunk>,
    /// Sum of the chunks' token counts.
    pub tokens: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Texts in request order.
    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Batcher {
    counter: TokenCounter,
    max_tokens_per_chunk: usize,
    max_tokens_per_batch: usize,
    max_items: usize,
}

impl Batcher {
    pub fn new(counter: TokenCounter, config: &ChunkingConfig) -> Self {
        Self {
            counter,
            max_tokens_per_chunk: config.max_tokens_per_chunk,
            max_tokens_per_batch: config.max_tokens_per_batch,
            max_items: config.max_batch_items.max(1),
        }
    }

    /// Lazily forms batches from `chunks`, in order.
    pub fn batches<I>(&self, chunks: I) -> Batches<I::IntoIter>
    where
        I: IntoIterator<Item = Chunk>,
    {
        Batches {
            batcher: self.clone(),
            source: chunks.into_iter(),
            pending: None,
            dropped: 0,
        }
    }

    /// Token count of an embeddable chunk, or `None` if it must not be sent.
    fn admit(&self, chunk: &Chunk) -> Option<usize> {
        if chunk.text.trim().is_empty() {
            return None;
        }
        let tokens = self.counter.count(&chunk.text);
        let limit = self.max_tokens_per_chunk.min(self.max_tokens_per_batch);
        if tokens > limit {
            tracing::warn!(
                "dropping {}:{}-{} with {tokens} tokens (limit {limit})",
                chunk.file_path,
                chunk.start_line,
                chunk.end_line
            );
            return None;
        }
        Some(tokens)
    }
}

/// Iterator returned by [`Batcher::batches`].
pub struct Batches<I: Iterator<Item = Chunk>> {
    batcher: Batcher,
    source: I,
    /// Admitted chunk that did not fit in the previous batch.
    pending: Option<(Chunk, usize)>,
    dropped: usize,
}

impl<I: Iterator<Item = Chunk>> Batches<I> {
    /// Chunks rejected so far (blank or over the per-chunk limit).
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn next_admitted(&mut self) -> Option<(Chunk, usize)> {
        if let Some(pending) = self.pending.take() {
            return Some(pending);
        }
        for chunk in self.source.by_ref() {
            match self.batcher.admit(&chunk) {
                Some(tokens) => return Some((chunk, tokens)),
                None => self.dropped += 1,
            }
        }
        None
    }
}

impl<I: Iterator<Item = Chunk>> Iterator for Batches<I> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let mut batch = Batch {
            chunks: Vec::new(),
            tokens: 0,
        };
        while let Some((chunk, tokens)) = self.next_admitted() {
            let full = batch.chunks.len() >= self.batcher.max_items
                || batch.tokens + tokens > self.batcher.max_tokens_per_batch;
            if full && !batch.is_empty() {
                self.pending = Some((chunk, tokens));
                break;
            }
            batch.tokens += tokens;
            batch.chunks.push(chunk);
        }
        (!batch.is_empty()).then_some(batch)
    }
}
