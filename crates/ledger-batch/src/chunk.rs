//! Chunks of validated entities

use crate::domain::ValidatedEntity;

/// Fixed-capacity batch handed to exactly one writer invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 1-based position of the chunk within its job
    pub sequence: u64,
    /// Input records consumed to build this chunk, skipped ones included
    pub consumed: usize,
    pub entities: Vec<ValidatedEntity>,
}

impl Chunk {
    pub fn new(sequence: u64, capacity: usize) -> Self {
        Self {
            sequence,
            consumed: 0,
            entities: Vec::with_capacity(capacity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }
}

/// Cuts the record stream into chunks of `size` consumed records
#[derive(Debug)]
pub struct ChunkBuilder {
    size: usize,
    next_sequence: u64,
    current: Chunk,
}

impl ChunkBuilder {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            next_sequence: 2,
            current: Chunk::new(1, size),
        }
    }

    /// Count one consumed record, optionally carrying an entity.
    ///
    /// Returns the finished chunk once `size` records have been consumed.
    pub fn push(&mut self, entity: Option<ValidatedEntity>) -> Option<Chunk> {
        if let Some(entity) = entity {
            self.current.entities.push(entity);
        }
        self.current.consumed += 1;

        (self.current.consumed >= self.size).then(|| self.rotate())
    }

    /// The trailing partial chunk, if any record went into it
    pub fn finish(mut self) -> Option<Chunk> {
        (self.current.consumed > 0).then(|| self.rotate())
    }

    fn rotate(&mut self) -> Chunk {
        let next = Chunk::new(self.next_sequence, self.size);
        self.next_sequence += 1;
        std::mem::replace(&mut self.current, next)
    }
}
