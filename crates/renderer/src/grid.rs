//! Two-dimensional, bounds-checked storage.
//!
//! The engine keeps several `[frame][thread]` and `[pass][thread]` matrices
//! whose dimensions are only known at startup. [`Grid`] stores them in one
//! flat `Vec` with a computed stride.

use std::ops::{Index, IndexMut};

/// A `rows × cols` matrix stored row-major.
#[derive(Debug)]
pub struct Grid<T> {
    cells: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T> Grid<T> {
    /// Builds a grid by calling `f(row, col)` for every cell.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut cells = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(f(row, col));
            }
        }
        Self { cells, rows, cols }
    }

    /// Like [`from_fn`](Self::from_fn), stopping at the first error.
    pub fn try_from_fn<E>(
        rows: usize,
        cols: usize,
        mut f: impl FnMut(usize, usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        let mut cells = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(f(row, col)?);
            }
        }
        Ok(Self { cells, rows, cols })
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Cells of one row.
    pub fn row(&self, row: usize) -> &[T] {
        assert!(row < self.rows, "row {} out of bounds ({} rows)", row, self.rows);
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }

    /// Mutable cells of one row.
    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        assert!(row < self.rows, "row {} out of bounds ({} rows)", row, self.rows);
        &mut self.cells[row * self.cols..(row + 1) * self.cols]
    }

    /// Every cell, row-major.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.cells.iter()
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.rows && col < self.cols,
            "cell ({}, {}) out of bounds for {}x{} grid",
            row,
            col,
            self.rows,
            self.cols
        );
        row * self.cols + col
    }
}

impl<T> Index<(usize, usize)> for Grid<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        &self.cells[self.offset(row, col)]
    }
}

impl<T> IndexMut<(usize, usize)> for Grid<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        let offset = self.offset(row, col);
        &mut self.cells[offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_are_row_major() {
        let grid = Grid::from_fn(2, 3, |r, c| r * 10 + c);
        assert_eq!(grid[(0, 0)], 0);
        assert_eq!(grid[(1, 2)], 12);
        assert_eq!(grid.row(1), &[10, 11, 12]);
        assert_eq!(grid.iter().count(), 6);
    }

    #[test]
    fn test_index_mut() {
        let mut grid = Grid::from_fn(2, 2, |_, _| 0);
        grid[(1, 0)] = 7;
        grid.row_mut(0)[1] = 3;
        assert_eq!(grid.iter().copied().collect::<Vec<_>>(), vec![0, 3, 7, 0]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_column_out_of_bounds_panics() {
        let grid = Grid::from_fn(2, 2, |_, _| ());
        // (0, 2) would alias (1, 0) without the check.
        let _ = &grid[(0, 2)];
    }

    #[test]
    fn test_try_from_fn_stops_at_error() {
        let mut calls = 0;
        let result: Result<Grid<u32>, &str> = Grid::try_from_fn(3, 3, |r, c| {
            calls += 1;
            if (r, c) == (1, 1) { Err("boom") } else { Ok(0) }
        });
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls, 5);
    }
}
