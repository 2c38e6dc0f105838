//! Exact nearest-neighbor search over a flat, row-major matrix of vectors.
//!
//! Distances are squared Euclidean. Corpora here are single-session uploads, so a
//! linear scan over every row is cheap enough and always exact.

use crate::error::{Result, RetrievalError};
use std::cmp::Ordering;

const MAGIC: &[u8; 4] = b"DQFX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimensions: usize,
    len: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Ok(Self::default());
        };

        let dimensions = first.len();
        if dimensions == 0 {
            return Err(RetrievalError::InvalidConfiguration(
                "cannot index zero-dimensional vectors".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(dimensions * vectors.len());
        for vector in vectors {
            if vector.len() != dimensions {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            data.extend_from_slice(vector);
        }

        Ok(Self {
            dimensions,
            len: vectors.len(),
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero for an empty index.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The `k` closest rows, nearest first; equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: squared_euclidean(row, query),
            })
            .collect::<Vec<_>>();

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, nearest_first);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(nearest_first);

        Ok(neighbors)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimensions as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.len as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(RetrievalError::IndexCorrupted(
                "missing vector index header".to_string(),
            ));
        }

        let version = u32::from_le_bytes(read_array(&bytes[4..8]));
        if version != FORMAT_VERSION {
            return Err(RetrievalError::IndexCorrupted(format!(
                "unsupported vector index format version {version}"
            )));
        }

        let dimensions = read_usize(&bytes[8..16])?;
        let len = read_usize(&bytes[16..24])?;
        if len > 0 && dimensions == 0 {
            return Err(RetrievalError::IndexCorrupted(
                "non-empty index with zero dimensions".to_string(),
            ));
        }

        let payload = &bytes[HEADER_LEN..];
        let expected = len
            .checked_mul(dimensions)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| RetrievalError::IndexCorrupted("index size overflows".to_string()))?;
        if payload.len() != expected {
            return Err(RetrievalError::IndexCorrupted(format!(
                "expected {expected} payload bytes for {len}x{dimensions} vectors, found {}",
                payload.len()
            )));
        }

        let data = payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(read_array(chunk)))
            .collect();

        Ok(Self {
            dimensions: if len == 0 { 0 } else { dimensions },
            len,
            data,
        })
    }
}

pub fn squared_euclidean(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}

fn nearest_first(left: &Neighbor, right: &Neighbor) -> Ordering {
    left.distance
        .total_cmp(&right.distance)
        .then_with(|| left.position.cmp(&right.position))
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

fn read_usize(bytes: &[u8]) -> Result<usize> {
    usize::try_from(u64::from_le_bytes(read_array(bytes)))
        .map_err(|_| RetrievalError::IndexCorrupted("index size exceeds platform limits".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nearest_row_is_returned_with_squared_distance() {
        let index = FlatIndex::build(&[vec![0.0], vec![10.0]]).unwrap();
        let hits = index.search(&[1.0], 1).unwrap();
        assert_eq!(
            hits,
            vec![Neighbor {
                position: 0,
                distance: 1.0
            }]
        );

        let all = index.search(&[1.0], 5).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].distance, 81.0);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = FlatIndex::build(&[vec![2.0, 0.0], vec![0.0, 0.0], vec![-2.0, 0.0]]).unwrap();
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions = hits.iter().map(|hit| hit.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![1, 0, 2]);

        let top_two = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(top_two[1].position, 0);
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let result = FlatIndex::build(&[vec![1.0, 2.0], vec![1.0]]);
        assert!(matches!(
            result,
            Err(RetrievalError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn query_dimension_must_match() {
        let index = FlatIndex::build(&[vec![1.0, 2.0]]).unwrap();
        let result = index.search(&[1.0], 1);
        assert!(matches!(result, Err(RetrievalError::DimensionMismatch { .. })));
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = FlatIndex::build(&[]).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 2.0, 3.0], 4).unwrap().is_empty());

        let restored = FlatIndex::from_bytes(&index.to_bytes()).unwrap();
        assert_eq!(restored, index);
    }

    #[test]
    fn truncated_bytes_are_corrupt() {
        let index = FlatIndex::build(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let bytes = index.to_bytes();

        let result = FlatIndex::from_bytes(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(RetrievalError::IndexCorrupted(_))));

        let result = FlatIndex::from_bytes(b"nope");
        assert!(matches!(result, Err(RetrievalError::IndexCorrupted(_))));
    }

    fn vectors_and_queries() -> impl Strategy<Value = (Vec<Vec<f32>>, Vec<Vec<f32>>)> {
        (1usize..8).prop_flat_map(|dimensions| {
            let vector = prop::collection::vec(-100.0f32..100.0, dimensions);
            (
                prop::collection::vec(vector.clone(), 0..40),
                prop::collection::vec(vector, 100),
            )
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn search_results_are_sorted((vectors, queries) in vectors_and_queries(), k in 0usize..50) {
            let index = FlatIndex::build(&vectors).unwrap();
            for query in &queries {
                let hits = index.search(query, k).unwrap();
                prop_assert_eq!(hits.len(), k.min(vectors.len()));
                for pair in hits.windows(2) {
                    prop_assert!(pair[0].distance <= pair[1].distance);
                }
            }
        }

        #[test]
        fn reloaded_index_answers_like_the_saved_one((vectors, queries) in vectors_and_queries(), k in 1usize..10) {
            let index = FlatIndex::build(&vectors).unwrap();
            let restored = FlatIndex::from_bytes(&index.to_bytes()).unwrap();
            for query in &queries {
                prop_assert_eq!(index.search(query, k).unwrap(), restored.search(query, k).unwrap());
            }
        }
    }
}
