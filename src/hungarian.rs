//! Hungarian (Kuhn-Munkres) minimum-cost bipartite matching (C9),
//! evaluation-only: scoring a track's output against ground truth never
//! participates in the online association pipeline itself.
//!
//! A classic O(n^3) potentials/augmenting-path formulation, not a
//! transliteration of the reference's zero-marking matrix reduction.

use nalgebra::DMatrix;

const INF: f32 = f32::MAX / 4.0;

/// One matched pair from [`solve`]: row/column indices into the original
/// (unpadded) cost matrix, plus the cost at that cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub row: usize,
    pub col: usize,
    pub cost: f32,
}

/// Minimum-cost perfect matching on a square padding of `cost` (rows padded
/// with zero-cost dummy columns and vice versa when rectangular), returning
/// only pairs that fall within the original `rows x cols` bounds.
///
/// Rows or columns entirely absent (`cost` with a zero dimension) produce an
/// empty assignment.
pub fn solve(cost: &DMatrix<f32>) -> Vec<Assignment> {
    let rows = cost.nrows();
    let cols = cost.ncols();
    if rows == 0 || cols == 0 {
        return Vec::new();
    }
    let n = rows.max(cols);

    // 1-indexed internally (row/col 0 is the sentinel "unassigned" marker),
    // following the classic Kuhn-Munkres potentials presentation.
    let mut a = vec![vec![0.0f32; n + 1]; n + 1];
    for r in 0..n {
        for c in 0..n {
            a[r + 1][c + 1] = if r < rows && c < cols { cost[(r, c)] } else { 0.0 };
        }
    }

    let mut u = vec![0.0f32; n + 1];
    let mut v = vec![0.0f32; n + 1];
    let mut p = vec![0usize; n + 1]; // p[col] = row matched to col, 0 if none
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![INF; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = INF;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = a[i0][j] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut out = Vec::with_capacity(rows.min(cols));
    for j in 1..=n {
        let i = p[j];
        if i == 0 {
            continue;
        }
        let row = i - 1;
        let col = j - 1;
        if row < rows && col < cols {
            out.push(Assignment {
                row,
                col,
                cost: cost[(row, col)],
            });
        }
    }
    out.sort_by_key(|a| a.row);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_square_cost_matrix_when_solve_then_matches_known_optimum() {
        let cost = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 3.0, 2.0, 0.0, 5.0, 3.0, 2.0, 2.0]);
        let assignment = solve(&cost);
        let total: f32 = assignment.iter().map(|a| a.cost).sum();
        assert_eq!(assignment.len(), 3);
        assert!((total - 5.0).abs() < 1e-4, "expected optimal cost 5, got {total}");
    }

    #[test]
    fn given_rectangular_cost_when_solve_then_every_row_matched_once() {
        let cost = DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 3.0, 4.0, 4.0, 3.0, 2.0, 1.0]);
        let assignment = solve(&cost);
        assert_eq!(assignment.len(), 2);
        let rows: std::collections::BTreeSet<usize> = assignment.iter().map(|a| a.row).collect();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn given_empty_cost_matrix_when_solve_then_no_assignments() {
        let cost = DMatrix::<f32>::zeros(0, 0);
        assert!(solve(&cost).is_empty());
    }

    #[test]
    fn given_identity_like_cost_when_solve_then_diagonal_chosen() {
        let cost = DMatrix::from_row_slice(3, 3, &[0.0, 9.0, 9.0, 9.0, 0.0, 9.0, 9.0, 9.0, 0.0]);
        let assignment = solve(&cost);
        for a in &assignment {
            assert_eq!(a.row, a.col);
        }
    }
}
