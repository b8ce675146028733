//! Row-by-row QR triangularization.

/// Upper-triangular factor `R` of a design matrix that grows one row at a time.
///
/// Each pushed row is folded into `R` with Givens rotations, so the cost per row
/// depends only on the number of columns. Column norms are preserved: for any
/// `j`, the squared entries of column `c` from row `j` down equal the residual
/// sum of squares of regressing column `c` on columns `0..j`.
#[derive(Debug, Clone)]
pub struct IncrementalQr {
    dim: usize,
    r: Vec<f64>,
    rows: usize,
}

impl IncrementalQr {
    pub fn new(dim: usize) -> Self {
        Self { dim, r: vec![0.0; dim * dim], rows: 0 }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of rows folded in so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn r(&self, i: usize, j: usize) -> f64 {
        self.r[i * self.dim + j]
    }

    /// Folds `row` into the factor. `row` is used as scratch space.
    pub fn push_row(&mut self, row: &mut [f64]) {
        debug_assert_eq!(row.len(), self.dim);
        let d = self.dim;
        for i in 0..d {
            if row[i] == 0.0 {
                continue;
            }
            let diag = self.r[i * d + i];
            let h = diag.hypot(row[i]);
            let (c, s) = (diag / h, row[i] / h);
            for j in i..d {
                let a = self.r[i * d + j];
                let b = row[j];
                self.r[i * d + j] = c * a + s * b;
                row[j] = c * b - s * a;
            }
        }
        self.rows += 1;
    }

    /// `sum(R[j.., col]^2)`.
    pub fn tail_sum_squares(&self, col: usize, from: usize) -> f64 {
        (from..=col.min(self.dim - 1)).map(|i| self.r(i, col).powi(2)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_factor_preserves_gram_matrix() {
        let rows = [
            [1.0, 2.0, 0.5],
            [-1.0, 0.0, 3.0],
            [2.0, 1.0, -1.0],
            [0.5, -2.0, 1.0],
            [0.0, 1.5, 2.0],
        ];
        let mut qr = IncrementalQr::new(3);
        for row in &rows {
            qr.push_row(&mut row.clone());
        }
        assert_eq!(qr.rows(), 5);

        // R^T R == A^T A
        for a in 0..3 {
            for b in 0..3 {
                let gram: f64 = rows.iter().map(|r| r[a] * r[b]).sum();
                let rtr: f64 = (0..3).map(|i| qr.r(i, a) * qr.r(i, b)).sum();
                assert_relative_eq!(gram, rtr, epsilon = 1e-10);
            }
        }
        // Upper triangular
        assert_eq!(qr.r(1, 0), 0.0);
        assert_eq!(qr.r(2, 0), 0.0);
        assert_eq!(qr.r(2, 1), 0.0);
    }

    #[test]
    fn test_tail_sum_is_residual() {
        // y = 2x exactly: regressing column 1 on column 0 leaves no residual.
        let mut qr = IncrementalQr::new(2);
        for x in [1.0, 2.0, 3.0, -1.0] {
            qr.push_row(&mut [x, 2.0 * x]);
        }
        assert_relative_eq!(qr.tail_sum_squares(1, 0), 4.0 * 15.0, epsilon = 1e-9);
        assert!(qr.tail_sum_squares(1, 1) < 1e-18);
    }
}
