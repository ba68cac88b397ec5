//! Row/column doubly-indexed sparse matrix over rationals.
//!
//! Every cell is stored once in its row's list and mirrored in its
//! column's list; each side records the position of its mirror, so
//! removal, pivoting and whole-row transposition run without hashing.
//! Rows own the coefficients; column cells are back-pointers only.

use crate::rational::{rational_sign, Rational};
use num_traits::Zero;

/// Cell as seen from its row: the column it lives in, its value, and
/// the position of its mirror in that column's list.
#[derive(Debug, Clone)]
pub struct RowCell {
    pub col: usize,
    pub coeff: Rational,
    col_offset: usize,
}

/// Cell as seen from its column: the row it lives in and the position
/// of its mirror in that row's list.
#[derive(Debug, Clone, Copy)]
pub struct ColCell {
    pub row: usize,
    pub row_offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SparseMatrix {
    rows: Vec<Vec<RowCell>>,
    columns: Vec<Vec<ColCell>>,
}

impl SparseMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, i: usize) -> &[RowCell] {
        &self.rows[i]
    }

    pub fn column(&self, j: usize) -> &[ColCell] {
        &self.columns[j]
    }

    pub fn add_row(&mut self) -> usize {
        self.rows.push(Vec::new());
        self.rows.len() - 1
    }

    pub fn add_column(&mut self) -> usize {
        self.columns.push(Vec::new());
        self.columns.len() - 1
    }

    /// Ensure column `j` exists.
    pub fn add_columns_up_to(&mut self, j: usize) {
        while self.columns.len() <= j {
            self.columns.push(Vec::new());
        }
    }

    fn position_in_row(&self, i: usize, j: usize) -> Option<usize> {
        self.rows[i].iter().position(|c| c.col == j)
    }

    /// Coefficient at `(i, j)`, if the cell exists.
    pub fn coeff(&self, i: usize, j: usize) -> Option<&Rational> {
        self.position_in_row(i, j).map(|off| &self.rows[i][off].coeff)
    }

    /// Insert a cell assumed absent; `v` must be nonzero.
    pub fn add_new_element(&mut self, i: usize, j: usize, v: Rational) {
        debug_assert!(!v.is_zero());
        debug_assert!(self.position_in_row(i, j).is_none());
        let col_offset = self.columns[j].len();
        let row_offset = self.rows[i].len();
        self.rows[i].push(RowCell {
            col: j,
            coeff: v,
            col_offset,
        });
        self.columns[j].push(ColCell { row: i, row_offset });
    }

    /// Remove the cell at position `row_offset` of row `i`, repairing
    /// the back-offsets of whichever cells get swapped into its place.
    pub fn remove_element(&mut self, i: usize, row_offset: usize) {
        let (col, col_offset) = {
            let cell = &self.rows[i][row_offset];
            (cell.col, cell.col_offset)
        };

        // Unlink from the column list. The swapped-in mirror belongs to
        // a different row, since a row holds at most one cell per column.
        let column = &mut self.columns[col];
        column.swap_remove(col_offset);
        if col_offset < column.len() {
            let moved = column[col_offset];
            self.rows[moved.row][moved.row_offset].col_offset = col_offset;
        }

        // Unlink from the row list.
        let row = &mut self.rows[i];
        row.swap_remove(row_offset);
        if row_offset < row.len() {
            let (mc, mco) = (row[row_offset].col, row[row_offset].col_offset);
            self.columns[mc][mco].row_offset = row_offset;
        }
    }

    /// Drop the last row, which may still contain cells.
    pub fn remove_last_row(&mut self) {
        let i = self.rows.len() - 1;
        while let Some(off) = self.rows[i].len().checked_sub(1) {
            self.remove_element(i, off);
        }
        self.rows.pop();
    }

    /// Pop empty columns off the tail.
    pub fn trim_empty_tail_columns(&mut self) {
        while self
            .columns
            .last()
            .map(|c| c.is_empty())
            .unwrap_or(false)
        {
            self.columns.pop();
        }
    }

    pub fn multiply_row(&mut self, i: usize, k: &Rational) {
        debug_assert!(!k.is_zero());
        for cell in &mut self.rows[i] {
            cell.coeff *= k;
        }
    }

    pub fn divide_row(&mut self, i: usize, k: &Rational) {
        debug_assert!(!k.is_zero());
        for cell in &mut self.rows[i] {
            cell.coeff /= k;
        }
    }

    /// Swap rows `i` and `k` wholesale, repairing column back-pointers.
    pub fn transpose_rows(&mut self, i: usize, k: usize) {
        if i == k {
            return;
        }
        self.rows.swap(i, k);
        for idx in [i, k] {
            for off in 0..self.rows[idx].len() {
                let (col, col_offset) = {
                    let c = &self.rows[idx][off];
                    (c.col, c.col_offset)
                };
                self.columns[col][col_offset].row = idx;
            }
        }
    }

    fn add_to_cell(&mut self, i: usize, j: usize, delta: Rational) {
        if delta.is_zero() {
            return;
        }
        match self.position_in_row(i, j) {
            Some(off) => {
                self.rows[i][off].coeff += delta;
                if self.rows[i][off].coeff.is_zero() {
                    self.remove_element(i, off);
                }
            }
            None => self.add_new_element(i, j, delta),
        }
    }

    /// `dst += alpha * src`, dropping cells that cancel to zero.
    pub fn add_rows(&mut self, alpha: &Rational, src: usize, dst: usize) {
        debug_assert!(src != dst);
        let src_cells: Vec<(usize, Rational)> = self.rows[src]
            .iter()
            .map(|c| (c.col, c.coeff.clone()))
            .collect();
        for (j, a) in src_cells {
            self.add_to_cell(dst, j, alpha * &a);
        }
    }

    /// Subtract the right multiple of `src` from `dst` so that column
    /// `j` of `dst` becomes zero. `src` must hold `sign` (±1) at `j`.
    pub fn pivot_row_to_row(&mut self, src: usize, dst: usize, j: usize, sign: i32) {
        debug_assert_eq!(self.coeff(src, j), Some(&rational_sign(sign)));
        let off = self
            .position_in_row(dst, j)
            .expect("pivot target row has no cell in the pivot column");
        let a = self.rows[dst][off].coeff.clone();
        self.remove_element(dst, off);
        let alpha = -(rational_sign(sign) * a);
        let src_cells: Vec<(usize, Rational)> = self.rows[src]
            .iter()
            .filter(|c| c.col != j)
            .map(|c| (c.col, c.coeff.clone()))
            .collect();
        for (jj, c) in src_cells {
            self.add_to_cell(dst, jj, &alpha * &c);
        }
    }

    /// Verify the mutual consistency of the two index sides. Used by
    /// debug assertions and the property tests.
    pub fn back_indexing_ok(&self) -> bool {
        for (i, row) in self.rows.iter().enumerate() {
            let mut seen = Vec::new();
            for (off, cell) in row.iter().enumerate() {
                if cell.coeff.is_zero() || seen.contains(&cell.col) {
                    return false;
                }
                seen.push(cell.col);
                let Some(col) = self.columns.get(cell.col) else {
                    return false;
                };
                let Some(mirror) = col.get(cell.col_offset) else {
                    return false;
                };
                if mirror.row != i || mirror.row_offset != off {
                    return false;
                }
            }
        }
        for (j, col) in self.columns.iter().enumerate() {
            for (off, cell) in col.iter().enumerate() {
                let Some(row) = self.rows.get(cell.row) else {
                    return false;
                };
                let Some(mirror) = row.get(cell.row_offset) else {
                    return false;
                };
                if mirror.col != j || mirror.col_offset != off {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn rat(n: i64) -> Rational {
        Rational::from_integer(BigInt::from(n))
    }

    fn build(rows: &[&[(usize, i64)]]) -> SparseMatrix {
        let mut m = SparseMatrix::new();
        for cells in rows {
            let i = m.add_row();
            for &(j, v) in *cells {
                m.add_columns_up_to(j);
                m.add_new_element(i, j, rat(v));
            }
        }
        m
    }

    fn dense_row(m: &SparseMatrix, i: usize) -> Vec<(usize, i64)> {
        let mut v: Vec<(usize, i64)> = m
            .row(i)
            .iter()
            .map(|c| {
                (
                    c.col,
                    c.coeff.to_integer().try_into().expect("small test value"),
                )
            })
            .collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn insert_remove_keeps_back_indexing() {
        let mut m = build(&[&[(0, 2), (2, -1)], &[(0, 1), (1, 3)]]);
        assert!(m.back_indexing_ok());
        m.remove_element(0, 0);
        assert!(m.back_indexing_ok());
        assert_eq!(dense_row(&m, 0), vec![(2, -1)]);
        assert_eq!(m.column(0).len(), 1);
    }

    #[test]
    fn add_rows_cancels_cells() {
        // r1 += 2*r0 : (2, -1, 0) + 2*(-1, 3, 1) over cols 0..3
        let mut m = build(&[&[(0, -1), (1, 3), (2, 1)], &[(0, 2), (1, -6)]]);
        m.add_rows(&rat(2), 0, 1);
        assert!(m.back_indexing_ok());
        assert_eq!(dense_row(&m, 1), vec![(2, 2)]);
    }

    #[test]
    fn pivot_zeroes_target_column() {
        // src row has +1 in column 1
        let mut m = build(&[&[(0, 2), (1, 1)], &[(0, 5), (1, -3), (2, 7)]]);
        m.pivot_row_to_row(0, 1, 1, 1);
        assert!(m.back_indexing_ok());
        assert_eq!(m.coeff(1, 1), None);
        // dst -= (-3)*src : col0 = 5 + 3*2 = 11
        assert_eq!(dense_row(&m, 1), vec![(0, 11), (2, 7)]);
    }

    #[test]
    fn pivot_with_negative_sign() {
        let mut m = build(&[&[(0, 4), (1, -1)], &[(0, 1), (1, 6)]]);
        m.pivot_row_to_row(0, 1, 1, -1);
        assert!(m.back_indexing_ok());
        assert_eq!(m.coeff(1, 1), None);
        // dst -= (-1)*6*src : col0 = 1 + 6*4 = 25
        assert_eq!(dense_row(&m, 1), vec![(0, 25)]);
    }

    #[test]
    fn transpose_rows_repairs_columns() {
        let mut m = build(&[&[(0, 1)], &[(0, 2), (1, 5)], &[(1, -4)]]);
        m.transpose_rows(0, 2);
        assert!(m.back_indexing_ok());
        assert_eq!(dense_row(&m, 0), vec![(1, -4)]);
        assert_eq!(dense_row(&m, 2), vec![(0, 1)]);
    }

    #[test]
    fn remove_last_row_and_trim() {
        let mut m = build(&[&[(0, 1)], &[(1, 2), (2, 3)]]);
        m.remove_last_row();
        assert!(m.back_indexing_ok());
        assert_eq!(m.row_count(), 1);
        m.trim_empty_tail_columns();
        assert_eq!(m.column_count(), 1);
    }

    #[test]
    fn scale_rows() {
        let mut m = build(&[&[(0, 2), (1, -4)]]);
        m.divide_row(0, &rat(2));
        assert_eq!(dense_row(&m, 0), vec![(0, 1), (1, -2)]);
        m.multiply_row(0, &rat(-3));
        assert_eq!(dense_row(&m, 0), vec![(0, -3), (1, 6)]);
    }
}
