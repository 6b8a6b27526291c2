use std::collections::VecDeque;

/// FIFO of pending display units awaiting the drain clock.
///
/// Mutated only by appends from the listener bindings and pop-fronts from
/// the drain clock; units are never reordered or deduplicated. Unbounded:
/// the producer is assumed slower than the eventual drain rate, so no
/// backpressure is applied.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    units: VecDeque<char>,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every unit of `text` to the tail, preserving order.
    /// Callable any number of times, including while a drain is active.
    pub fn append(&mut self, text: &str) {
        self.units.extend(text.chars());
    }

    pub fn pop_front(&mut self) -> Option<char> {
        self.units.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}

/// Append-only surface of already-drained units: the observable "typing"
/// text handed to the external renderer.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: char) {
        self.text.push(unit);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn snapshot(&self) -> String {
        self.text.clone()
    }
}
