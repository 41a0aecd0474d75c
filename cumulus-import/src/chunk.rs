//! Transient point batches, the unit of ingestion.
//!
//! Parsers produce chunks, the builder consumes each exactly once, then the
//! chunk is dropped — chunks are never persisted. Positions are global
//! coordinates; optional attribute arrays run parallel to them and must
//! match their length.

use crate::error::{ImportError, Result};
use cumulus_core::Aabb;
use glam::DVec3;
use std::sync::OnceLock;

/// Mutable, non-persisted batch of points with optional parallel attributes.
#[derive(Debug, Default)]
pub struct Chunk {
    positions: Vec<DVec3>,
    colors: Option<Vec<[u8; 4]>>,
    normals: Option<Vec<[f32; 3]>>,
    intensities: Option<Vec<i32>>,
    classifications: Option<Vec<u8>>,
    bounds: OnceLock<Option<Aabb>>,
}

impl Chunk {
    /// Chunk holding only positions.
    pub fn from_positions(positions: Vec<DVec3>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    /// Attach colors. Fails unless the array runs parallel to positions.
    pub fn with_colors(mut self, colors: Vec<[u8; 4]>) -> Result<Self> {
        Self::check_parallel("colors", colors.len(), self.positions.len())?;
        self.colors = Some(colors);
        Ok(self)
    }

    /// Attach normals. Fails unless the array runs parallel to positions.
    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Result<Self> {
        Self::check_parallel("normals", normals.len(), self.positions.len())?;
        self.normals = Some(normals);
        Ok(self)
    }

    /// Attach intensities. Fails unless the array runs parallel to positions.
    pub fn with_intensities(mut self, intensities: Vec<i32>) -> Result<Self> {
        Self::check_parallel("intensities", intensities.len(), self.positions.len())?;
        self.intensities = Some(intensities);
        Ok(self)
    }

    /// Attach classifications. Fails unless the array runs parallel to
    /// positions.
    pub fn with_classifications(mut self, classifications: Vec<u8>) -> Result<Self> {
        Self::check_parallel(
            "classifications",
            classifications.len(),
            self.positions.len(),
        )?;
        self.classifications = Some(classifications);
        Ok(self)
    }

    fn check_parallel(name: &str, len: usize, expected: usize) -> Result<()> {
        if len != expected {
            return Err(ImportError::invariant(format!(
                "{name} array has {len} entries for {expected} positions"
            )));
        }
        Ok(())
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the chunk holds no points.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Global positions.
    pub fn positions(&self) -> &[DVec3] {
        &self.positions
    }

    /// Colors, when present.
    pub fn colors(&self) -> Option<&[[u8; 4]]> {
        self.colors.as_deref()
    }

    /// Normals, when present.
    pub fn normals(&self) -> Option<&[[f32; 3]]> {
        self.normals.as_deref()
    }

    /// Intensities, when present.
    pub fn intensities(&self) -> Option<&[i32]> {
        self.intensities.as_deref()
    }

    /// Classifications, when present.
    pub fn classifications(&self) -> Option<&[u8]> {
        self.classifications.as_deref()
    }

    /// Tight bounding box of the positions, computed once and cached.
    /// `None` for an empty chunk.
    pub fn bounding_box(&self) -> Option<Aabb> {
        *self
            .bounds
            .get_or_init(|| Aabb::from_points(&self.positions))
    }

    /// Tear the chunk into its arrays (consumes the chunk).
    #[allow(clippy::type_complexity)]
    pub(crate) fn into_arrays(
        self,
    ) -> (
        Vec<DVec3>,
        Option<Vec<[u8; 4]>>,
        Option<Vec<[f32; 3]>>,
        Option<Vec<i32>>,
        Option<Vec<u8>>,
    ) {
        (
            self.positions,
            self.colors,
            self.normals,
            self.intensities,
            self.classifications,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_array_invariant() {
        let chunk = Chunk::from_positions(vec![DVec3::ZERO, DVec3::ONE]);
        assert!(chunk.with_colors(vec![[255, 0, 0, 255]]).is_err());

        let chunk = Chunk::from_positions(vec![DVec3::ZERO, DVec3::ONE])
            .with_intensities(vec![1, 2])
            .unwrap();
        assert_eq!(chunk.intensities().unwrap().len(), 2);
    }

    #[test]
    fn test_bounding_box() {
        let chunk = Chunk::from_positions(vec![
            DVec3::new(1.0, -2.0, 3.0),
            DVec3::new(-1.0, 2.0, 0.0),
        ]);
        let b = chunk.bounding_box().unwrap();
        assert_eq!(b.min, DVec3::new(-1.0, -2.0, 0.0));
        assert_eq!(b.max, DVec3::new(1.0, 2.0, 3.0));

        assert!(Chunk::from_positions(vec![]).bounding_box().is_none());
    }
}
