//! # Erasure Codec
//!
//! Split types and the codec seam the decoder drives. The in-process
//! implementation is a systematic GF(256) code: data blocks are evaluations
//! of a degree-<K polynomial at points `0..K`, check blocks at `K..K+M`, so
//! any K surviving blocks pin the polynomial down and Lagrange interpolation
//! recovers the rest. Byte positions are independent — one small field
//! multiply per survivor per byte.

use std::io;
use std::sync::Arc;

use crate::bucket::{Bucket, BucketFactory};
use crate::error::FetchError;

/// Erasure block size in bytes.
pub const BLOCK_SIZE: usize = 32768;

// ─── Split Types ────────────────────────────────────────────────────────────

/// How a segment's blocks are coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitType {
    /// No check blocks; decode is straight concatenation.
    NonRedundant,
    /// Standard onion coding: M check blocks, any K of K+M reconstruct.
    OnionStandard,
}

impl SplitType {
    /// Decode the split-type field of segment metadata.
    pub fn from_metadata(raw: u16) -> Result<SplitType, FetchError> {
        match raw {
            0 => Ok(SplitType::NonRedundant),
            1 => Ok(SplitType::OnionStandard),
            other => Err(FetchError::InvalidMetadata(format!(
                "unknown split type {other}"
            ))),
        }
    }

    pub fn is_redundant(self) -> bool {
        matches!(self, SplitType::OnionStandard)
    }
}

// ─── Codec Seam ─────────────────────────────────────────────────────────────

/// Erasure-coding engine over fixed-size blocks.
pub trait ErasureCodec: Send + Sync {
    /// Reconstruct missing data blocks in place. Requires at least K present
    /// blocks across both arrays; check blocks are not guaranteed filled
    /// afterward.
    fn decode(
        &self,
        data: &mut [Option<Box<dyn Bucket>>],
        check: &mut [Option<Box<dyn Bucket>>],
        block_size: usize,
        factory: &dyn BucketFactory,
    ) -> io::Result<()>;

    /// Fill any missing check blocks from complete data.
    fn encode(
        &self,
        data: &[Option<Box<dyn Bucket>>],
        check: &mut [Option<Box<dyn Bucket>>],
        block_size: usize,
        factory: &dyn BucketFactory,
    ) -> io::Result<()>;
}

/// Codec for a split type and geometry. `NonRedundant` performs no coding.
pub fn codec_for(split: SplitType, k: usize, m: usize) -> Option<Arc<dyn ErasureCodec>> {
    match split {
        SplitType::NonRedundant => None,
        SplitType::OnionStandard => Some(Arc::new(InterpolationCodec::new(k, m))),
    }
}

// ─── GF(256) Arithmetic ─────────────────────────────────────────────────────

/// GF(2^8) with primitive polynomial x^8 + x^4 + x^3 + x^2 + 1 (0x11D) and
/// generator 2. Log/antilog tables give O(1) multiply and inverse; addition
/// is XOR.
mod gf256 {
    const fn build_tables() -> ([u8; 256], [u8; 512]) {
        let mut log = [0u8; 256];
        let mut exp = [0u8; 512];
        let mut x: u16 = 1;
        let mut i = 0usize;
        while i < 255 {
            exp[i] = x as u8;
            exp[i + 255] = x as u8; // doubled for modular-free lookups
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= 0x11D;
            }
            i += 1;
        }
        (log, exp)
    }

    const TABLES: ([u8; 256], [u8; 512]) = build_tables();
    const LOG: [u8; 256] = TABLES.0;
    const EXP: [u8; 512] = TABLES.1;

    pub fn mul(a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
    }

    /// Multiplicative inverse. Zero has none.
    pub fn inv(a: u8) -> u8 {
        assert_ne!(a, 0, "inverse of zero in GF(256)");
        EXP[255 - LOG[a as usize] as usize]
    }
}

// ─── Interpolation Codec ────────────────────────────────────────────────────

/// Systematic polynomial-evaluation code over GF(256).
pub struct InterpolationCodec {
    k: usize,
    m: usize,
}

impl InterpolationCodec {
    /// Geometry must fit the field: K + M distinct evaluation points.
    pub fn new(k: usize, m: usize) -> Self {
        assert!(k >= 1, "codec needs at least one data block");
        assert!(k + m <= 256, "K + M exceeds GF(256) evaluation points");
        InterpolationCodec { k, m }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn m(&self) -> usize {
        self.m
    }
}

/// Lagrange basis weights for evaluating at `target` from points `xs`.
/// `target` must not be among `xs`.
fn lagrange_weights(xs: &[u8], target: u8) -> Vec<u8> {
    xs.iter()
        .map(|&xi| {
            let mut num = 1u8;
            let mut den = 1u8;
            for &xt in xs {
                if xt != xi {
                    num = gf256::mul(num, target ^ xt);
                    den = gf256::mul(den, xi ^ xt);
                }
            }
            gf256::mul(num, gf256::inv(den))
        })
        .collect()
}

/// Read a block, zero-padded (or truncated) to the codec block size.
fn padded(block: &dyn Bucket, block_size: usize) -> io::Result<Vec<u8>> {
    let bytes = block.read_all()?;
    let mut out = vec![0u8; block_size];
    let n = bytes.len().min(block_size);
    out[..n].copy_from_slice(&bytes[..n]);
    Ok(out)
}

/// Combine survivor values with the given weights into one block.
fn combine(weights: &[u8], vals: &[Vec<u8>], block_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; block_size];
    for (&weight, val) in weights.iter().zip(vals) {
        if weight == 0 {
            continue;
        }
        for (o, &b) in out.iter_mut().zip(val.iter()) {
            *o ^= gf256::mul(weight, b);
        }
    }
    out
}

impl ErasureCodec for InterpolationCodec {
    fn decode(
        &self,
        data: &mut [Option<Box<dyn Bucket>>],
        check: &mut [Option<Box<dyn Bucket>>],
        block_size: usize,
        factory: &dyn BucketFactory,
    ) -> io::Result<()> {
        debug_assert_eq!(data.len(), self.k);
        debug_assert_eq!(check.len(), self.m);
        let k = self.k;

        // Any K survivors pin the polynomial down; prefer data blocks so a
        // fully-systematic survivor set costs nothing to interpolate from.
        let mut xs: Vec<u8> = Vec::with_capacity(k);
        let mut vals: Vec<Vec<u8>> = Vec::with_capacity(k);
        for (i, slot) in data.iter().enumerate() {
            if xs.len() == k {
                break;
            }
            if let Some(block) = slot {
                xs.push(i as u8);
                vals.push(padded(block.as_ref(), block_size)?);
            }
        }
        for (j, slot) in check.iter().enumerate() {
            if xs.len() == k {
                break;
            }
            if let Some(block) = slot {
                xs.push((k + j) as u8);
                vals.push(padded(block.as_ref(), block_size)?);
            }
        }
        if xs.len() < k {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} blocks present, {k} needed to reconstruct", xs.len()),
            ));
        }

        for index in 0..k {
            if data[index].is_some() {
                continue;
            }
            let weights = lagrange_weights(&xs, index as u8);
            let out = combine(&weights, &vals, block_size);
            let mut bucket = factory.make_bucket(Some(block_size as u64))?;
            bucket.write_all(&out)?;
            data[index] = Some(bucket);
        }
        Ok(())
    }

    fn encode(
        &self,
        data: &[Option<Box<dyn Bucket>>],
        check: &mut [Option<Box<dyn Bucket>>],
        block_size: usize,
        factory: &dyn BucketFactory,
    ) -> io::Result<()> {
        debug_assert_eq!(data.len(), self.k);
        debug_assert_eq!(check.len(), self.m);
        let k = self.k;

        let mut xs: Vec<u8> = Vec::with_capacity(k);
        let mut vals: Vec<Vec<u8>> = Vec::with_capacity(k);
        for (i, slot) in data.iter().enumerate() {
            let Some(block) = slot else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("data block {i} missing; cannot derive check blocks"),
                ));
            };
            xs.push(i as u8);
            vals.push(padded(block.as_ref(), block_size)?);
        }

        for (j, slot) in check.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            let weights = lagrange_weights(&xs, (k + j) as u8);
            let out = combine(&weights, &vals, block_size);
            let mut bucket = factory.make_bucket(Some(block_size as u64))?;
            bucket.write_all(&out)?;
            *slot = Some(bucket);
        }
        Ok(())
    }
}
