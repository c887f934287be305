//! Pixel windows for partial reads

use serde::{Deserialize, Serialize};

/// Rectangular pixel region of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Window {
    pub fn new(row_off: usize, col_off: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_off,
            col_off,
            rows,
            cols,
        }
    }

    /// The whole raster.
    pub fn full(rows: usize, cols: usize) -> Self {
        Self::new(0, 0, rows, cols)
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Shape after keeping every `step`-th row and column.
    pub fn decimated_shape(&self, step: usize) -> (usize, usize) {
        let step = step.max(1);
        (self.rows.div_ceil(step), self.cols.div_ceil(step))
    }

    /// Clip to a raster of `rows` x `cols`.
    pub fn clipped(&self, rows: usize, cols: usize) -> Self {
        let row_off = self.row_off.min(rows);
        let col_off = self.col_off.min(cols);
        Self::new(
            row_off,
            col_off,
            self.row_end().min(rows) - row_off,
            self.col_end().min(cols) - col_off,
        )
    }
}
