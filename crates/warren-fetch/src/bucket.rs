//! # Buckets
//!
//! Opaque blob handles behind the storage backend. Fetched blocks, decoded
//! output, and reconstructed blocks all live in buckets so the coordinator
//! never cares whether the backend is heap, disk, or something slower.

use bytes::Bytes;
use std::io::{self, Write};

/// Opaque blob handle produced by a [`BucketFactory`].
pub trait Bucket: Send {
    /// Append bytes.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read the full contents.
    fn read_all(&self) -> io::Result<Bytes>;

    /// Current size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream contents into `dst`, up to `limit` bytes (`None` = everything).
    /// Returns the number of bytes written.
    fn copy_to(&self, dst: &mut dyn Write, limit: Option<u64>) -> io::Result<u64> {
        let data = self.read_all()?;
        let cap = limit.map_or(data.len(), |l| data.len().min(l as usize));
        dst.write_all(&data[..cap])?;
        Ok(cap as u64)
    }
}

/// Creates buckets. `size_hint` is `None` when the final size is unknown.
pub trait BucketFactory: Send + Sync {
    fn make_bucket(&self, size_hint: Option<u64>) -> io::Result<Box<dyn Bucket>>;
}

// ─── In-Memory Implementation ───────────────────────────────────────────────

/// Heap-backed bucket.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    data: Vec<u8>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryBucket {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Bucket pre-filled with `data` (handy in tests).
    pub fn of(data: &[u8]) -> Self {
        MemoryBucket {
            data: data.to_vec(),
        }
    }
}

impl Bucket for MemoryBucket {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn read_all(&self) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(&self.data))
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Factory handing out [`MemoryBucket`]s.
#[derive(Debug, Default, Clone)]
pub struct MemoryBucketFactory;

impl BucketFactory for MemoryBucketFactory {
    fn make_bucket(&self, size_hint: Option<u64>) -> io::Result<Box<dyn Bucket>> {
        Ok(Box::new(match size_hint {
            Some(hint) => MemoryBucket::with_capacity(hint as usize),
            None => MemoryBucket::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut bucket = MemoryBucket::new();
        bucket.write_all(b"hello ").unwrap();
        bucket.write_all(b"world").unwrap();
        assert_eq!(bucket.len(), 11);
        assert_eq!(&bucket.read_all().unwrap()[..], b"hello world");
    }

    #[test]
    fn copy_to_honors_the_cap() {
        let bucket = MemoryBucket::of(b"0123456789");

        let mut uncapped = Vec::new();
        assert_eq!(bucket.copy_to(&mut uncapped, None).unwrap(), 10);
        assert_eq!(uncapped, b"0123456789");

        let mut capped = Vec::new();
        assert_eq!(bucket.copy_to(&mut capped, Some(4)).unwrap(), 4);
        assert_eq!(capped, b"0123");

        let mut oversized = Vec::new();
        assert_eq!(bucket.copy_to(&mut oversized, Some(100)).unwrap(), 10);
    }

    #[test]
    fn factory_respects_size_hint() {
        let factory = MemoryBucketFactory;
        let bucket = factory.make_bucket(Some(64)).unwrap();
        assert!(bucket.is_empty());
        let bucket = factory.make_bucket(None).unwrap();
        assert_eq!(bucket.len(), 0);
    }
}
