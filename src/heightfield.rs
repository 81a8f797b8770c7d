use crate::error::ErosionError;

/// A square float heightfield stored row-major (`index = z * size + x`).
///
/// This is the shape exchanged with producers and consumers of the
/// simulation; the engine itself works on fixed-point copies.
#[derive(Clone, Debug, PartialEq)]
pub struct Heightfield {
    size: usize,
    data: Vec<f32>,
}

impl Heightfield {
    pub fn new(size: usize) -> Self {
        Self::new_with(size, 0.0)
    }

    pub fn new_with(size: usize, value: f32) -> Self {
        Self {
            size,
            data: vec![value; size * size],
        }
    }

    /// Wrap a flat row-major buffer; its length must be `size * size`.
    pub fn from_vec(size: usize, data: Vec<f32>) -> Result<Self, ErosionError> {
        if data.len() != size * size {
            return Err(ErosionError::DimensionMismatch {
                expected: size * size,
                actual: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    /// Build from a 2D array. Every row must be as long as there are rows.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, ErosionError> {
        let size = rows.len();
        let mut data = Vec::with_capacity(size * size);
        for row in rows {
            if row.len() != size {
                return Err(ErosionError::DimensionMismatch {
                    expected: size,
                    actual: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Self { size, data })
    }

    /// Side length of the grid.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn index(&self, x: usize, z: usize) -> usize {
        debug_assert!(x < self.size && z < self.size);
        z * self.size + x
    }

    pub fn get(&self, x: usize, z: usize) -> f32 {
        self.data[self.index(x, z)]
    }

    pub fn set(&mut self, x: usize, z: usize, value: f32) {
        let idx = self.index(x, z);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Iterate over grid rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.size.max(1))
    }

    /// Copy into a 2D array of rows, the layout handed to exporters and renderers.
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.rows().map(|row| row.to_vec()).collect()
    }

    /// Minimum and maximum height, or `None` for an empty grid.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        if self.data.is_empty() {
            return None;
        }
        let mut min_h = f32::MAX;
        let mut max_h = f32::MIN;
        for &h in &self.data {
            if h < min_h { min_h = h; }
            if h > max_h { max_h = h; }
        }
        Some((min_h, max_h))
    }

    /// Largest absolute per-cell difference to another grid of the same size.
    pub fn max_abs_difference(&self, other: &Heightfield) -> Option<f32> {
        if self.size != other.size {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_layout() {
        let mut field = Heightfield::new(4);
        field.set(1, 2, 3.5);

        assert_eq!(field.as_slice()[2 * 4 + 1], 3.5);
        assert_eq!(field.get(1, 2), 3.5);

        let rows = field.to_rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2][1], 3.5);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let result = Heightfield::from_vec(4, vec![0.0; 15]);
        assert!(matches!(
            result,
            Err(ErosionError::DimensionMismatch { expected: 16, actual: 15 })
        ));
    }

    #[test]
    fn test_from_rows_rejects_ragged_input() {
        let rows = vec![vec![0.0, 1.0], vec![2.0]];
        assert!(Heightfield::from_rows(rows).is_err());

        let rows = vec![vec![0.0, 1.0], vec![2.0, 3.0]];
        let field = Heightfield::from_rows(rows).unwrap();
        assert_eq!(field.get(0, 1), 2.0);
    }

    #[test]
    fn test_min_max() {
        let mut field = Heightfield::new_with(3, 0.5);
        field.set(0, 0, -1.0);
        field.set(2, 2, 4.0);
        assert_eq!(field.min_max(), Some((-1.0, 4.0)));
        assert_eq!(Heightfield::new(0).min_max(), None);
    }
}
