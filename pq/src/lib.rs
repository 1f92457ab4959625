//! Product Quantization codec: trains per-subspace codebooks over training vectors,
//! compresses vectors to `m`-byte codes, and scores codes against a raw query via
//! Asymmetric Distance Computation (ADC).

mod kmeans;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Centroids per subspace. Fixed so one code byte addresses a full codebook row.
pub const KSUB: usize = 256;

const CODEBOOK_MAGIC: &[u8; 4] = b"PQ01";

#[derive(Debug, Error)]
pub enum PqError {
    #[error("codec is not trained")]
    NotTrained,
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("code size mismatch: expected {expected} bytes, got {got}")]
    CodeSizeMismatch { expected: usize, got: usize },
    #[error("subquantizer count {m} does not divide dimension {dim}")]
    InvalidSubdivision { m: usize, dim: usize },
    #[error("empty training set")]
    EmptyTrainingSet,
    #[error("malformed codebook blob: {0}")]
    MalformedCodebook(&'static str),
}

/// Training parameters. `m` is the subquantizer count and must divide the vector
/// dimension; `niter` bounds Lloyd iterations per subspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqParams {
    pub m: usize,
    pub niter: usize,
    pub seed: u64,
}

impl Default for PqParams {
    fn default() -> Self { Self { m: 8, niter: 25, seed: 0 } }
}

impl PqParams {
    pub fn new(m: usize) -> Self { Self { m, ..Default::default() } }
    pub fn with_niter(self, niter: usize) -> Self { Self { niter, ..self } }
    pub fn with_seed(self, seed: u64) -> Self { Self { seed, ..self } }
}

/// A (possibly trained) product quantizer for vectors of one fixed dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantizer {
    m: usize,
    dsub: usize,
    niter: usize,
    seed: u64,
    /// Flat `m * KSUB * dsub` table; empty until trained.
    codebooks: Vec<f32>,
}

impl ProductQuantizer {
    pub fn new(dim: usize, params: PqParams) -> Result<Self, PqError> {
        if params.m == 0 || dim == 0 || dim % params.m != 0 {
            return Err(PqError::InvalidSubdivision { m: params.m, dim });
        }
        Ok(Self { m: params.m, dsub: dim / params.m, niter: params.niter, seed: params.seed, codebooks: Vec::new() })
    }

    pub fn dim(&self) -> usize { self.m * self.dsub }
    pub fn m(&self) -> usize { self.m }
    pub fn dsub(&self) -> usize { self.dsub }
    pub fn code_size(&self) -> usize { self.m }
    pub fn is_trained(&self) -> bool { !self.codebooks.is_empty() }

    /// Bytes of raw f32 vector per byte of code.
    pub fn compression_ratio(&self) -> usize { 4 * self.dim() / self.m }

    fn codebook(&self, s: usize) -> &[f32] {
        let stride = KSUB * self.dsub;
        &self.codebooks[s * stride..(s + 1) * stride]
    }

    fn check_dim(&self, v: &[f32]) -> Result<(), PqError> {
        if v.len() != self.dim() {
            return Err(PqError::DimensionMismatch { expected: self.dim(), got: v.len() });
        }
        Ok(())
    }

    /// Train all `m` codebooks. Each subspace runs k-means independently over the
    /// corresponding slice of every training vector.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), PqError> {
        if vectors.is_empty() {
            return Err(PqError::EmptyTrainingSet);
        }
        for v in vectors {
            self.check_dim(v)?;
        }

        let (m, dsub, niter, seed) = (self.m, self.dsub, self.niter, self.seed);
        let trained: Vec<Vec<f32>> = (0..m)
            .into_par_iter()
            .map(|s| {
                let mut slice = Vec::with_capacity(vectors.len() * dsub);
                for v in vectors {
                    slice.extend_from_slice(&v[s * dsub..(s + 1) * dsub]);
                }
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(s as u64));
                kmeans::train_centroids(&slice, dsub, KSUB, niter, &mut rng)
            })
            .collect();

        let mut codebooks = Vec::with_capacity(m * KSUB * dsub);
        for cb in trained {
            codebooks.extend(cb);
        }
        self.codebooks = codebooks;
        Ok(())
    }

    /// Compress a vector to `m` centroid indices.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>, PqError> {
        if !self.is_trained() {
            return Err(PqError::NotTrained);
        }
        self.check_dim(vector)?;

        let mut code = Vec::with_capacity(self.m);
        for s in 0..self.m {
            let sub = &vector[s * self.dsub..(s + 1) * self.dsub];
            let (idx, _) = kmeans::nearest(self.codebook(s), self.dsub, KSUB, sub);
            code.push(idx as u8);
        }
        Ok(code)
    }

    /// Reconstruct the (lossy) vector a code stands for.
    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>, PqError> {
        if !self.is_trained() {
            return Err(PqError::NotTrained);
        }
        if code.len() != self.m {
            return Err(PqError::CodeSizeMismatch { expected: self.m, got: code.len() });
        }

        let mut out = Vec::with_capacity(self.dim());
        for (s, &c) in code.iter().enumerate() {
            let cb = self.codebook(s);
            out.extend_from_slice(&cb[c as usize * self.dsub..(c as usize + 1) * self.dsub]);
        }
        Ok(out)
    }

    /// Precompute the per-subspace squared distances from `query` to every centroid.
    pub fn distance_table(&self, query: &[f32]) -> Result<DistanceTable, PqError> {
        if !self.is_trained() {
            return Err(PqError::NotTrained);
        }
        self.check_dim(query)?;

        let mut table = Vec::with_capacity(self.m * KSUB);
        for s in 0..self.m {
            let sub = &query[s * self.dsub..(s + 1) * self.dsub];
            let cb = self.codebook(s);
            for c in 0..KSUB {
                table.push(kmeans::squared_l2(&cb[c * self.dsub..(c + 1) * self.dsub], sub));
            }
        }
        Ok(DistanceTable { m: self.m, table })
    }

    /// Serialize the trained codebooks: `PQ01` | u32 m | u32 ksub | u32 dsub |
    /// `m * ksub * dsub` little-endian f32.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PqError> {
        if !self.is_trained() {
            return Err(PqError::NotTrained);
        }
        let mut out = Vec::with_capacity(16 + self.codebooks.len() * 4);
        out.extend_from_slice(CODEBOOK_MAGIC);
        out.extend_from_slice(&(self.m as u32).to_le_bytes());
        out.extend_from_slice(&(KSUB as u32).to_le_bytes());
        out.extend_from_slice(&(self.dsub as u32).to_le_bytes());
        for f in &self.codebooks {
            out.extend_from_slice(&f.to_le_bytes());
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PqError> {
        if bytes.len() < 16 || &bytes[0..4] != CODEBOOK_MAGIC {
            return Err(PqError::MalformedCodebook("missing PQ01 magic"));
        }
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().expect("4 bytes")) as usize;
        let (m, ksub, dsub) = (u32_at(4), u32_at(8), u32_at(12));
        if ksub != KSUB {
            return Err(PqError::MalformedCodebook("unsupported centroid count"));
        }
        if m == 0 || dsub == 0 {
            return Err(PqError::MalformedCodebook("zero subquantizer geometry"));
        }
        let expected = 16 + m * ksub * dsub * 4;
        if bytes.len() != expected {
            return Err(PqError::MalformedCodebook("truncated centroid table"));
        }

        let codebooks = bytes[16..].chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
        Ok(Self { m, dsub, niter: 0, seed: 0, codebooks })
    }
}

/// Precomputed ADC table for one query: `m * KSUB` squared distances.
#[derive(Debug, Clone)]
pub struct DistanceTable {
    m: usize,
    table: Vec<f32>,
}

impl DistanceTable {
    pub fn m(&self) -> usize { self.m }

    /// Approximate squared distance from the query to the vector behind `code`.
    pub fn distance(&self, code: &[u8]) -> Result<f32, PqError> {
        if code.len() != self.m {
            return Err(PqError::CodeSizeMismatch { expected: self.m, got: code.len() });
        }
        Ok(code.iter().enumerate().map(|(s, &c)| self.table[s * KSUB + c as usize]).sum())
    }
}
