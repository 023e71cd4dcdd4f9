//! Linear-program model used by the constrained policies.
//!
//! Every program built here has the same shape:
//!
//! ```text
//!   max / min   c' x
//!   s.t.        A[i] x <= b[i]      for every row but the last
//!               A[last] x  = fix    (the single equality row, e.g. sum x = M)
//!               0 <= x_j <= 1       for every column
//! ```
//!
//! [`Matrix`] is a small dense row-major matrix; [`LinearProgram`] validates the
//! dimensions once and hands the problem to `microlp`. Solving never panics and never
//! errors: numerical failure or infeasibility is reported as [`LpStatus::Failed`].

use std::ops::{Index, IndexMut};

use microlp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem};
use tracing::trace;

use crate::error::{ensure_same_len, Error, Result};

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// All-zero `rows x cols` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Overwrite row `r`; the length must equal `cols`.
    pub fn set_row(&mut self, r: usize, values: &[f64]) -> Result<()> {
        ensure_same_len(values.len(), self.cols)?;
        if r >= self.rows {
            return Err(Error::IndexOutOfRange {
                index: r,
                len: self.rows,
            });
        }
        self.row_mut(r).copy_from_slice(values);
        Ok(())
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.cols + c]
    }
}

/// Objective direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

/// Result of solving a [`LinearProgram`].
#[derive(Debug, Clone, PartialEq)]
pub enum LpStatus {
    /// Optimal point found; `x.len()` equals the number of columns.
    Feasible { x: Vec<f64>, objective: f64 },
    /// Infeasible, unbounded or numerically failed; no usable point.
    Failed { reason: String },
}

impl LpStatus {
    pub fn is_feasible(&self) -> bool {
        matches!(self, LpStatus::Feasible { .. })
    }

    /// The solution vector, if feasible.
    pub fn solution(&self) -> Option<&[f64]> {
        match self {
            LpStatus::Feasible { x, .. } => Some(x),
            LpStatus::Failed { .. } => None,
        }
    }
}

/// A box-bounded LP with `rows - 1` upper-bounded rows and one equality row.
#[derive(Debug, Clone)]
pub struct LinearProgram {
    a: Matrix,
    b: Vec<f64>,
    c: Vec<f64>,
    fix: f64,
    direction: Direction,
}

impl LinearProgram {
    /// Build a program from `A`, the inequality bounds `b` (one per row except the last),
    /// the objective `c` (one per column) and the equality value `fix` for the last row.
    pub fn new(a: Matrix, b: Vec<f64>, c: Vec<f64>, fix: f64) -> Result<Self> {
        if a.rows() == 0 {
            return Err(Error::InvalidParameter {
                name: "lp_rows",
                value: "0".to_string(),
            });
        }
        ensure_same_len(b.len(), a.rows() - 1)?;
        ensure_same_len(c.len(), a.cols())?;
        Ok(Self {
            a,
            b,
            c,
            fix,
            direction: Direction::Maximize,
        })
    }

    pub fn maximize(mut self) -> Self {
        self.direction = Direction::Maximize;
        self
    }

    pub fn minimize(mut self) -> Self {
        self.direction = Direction::Minimize;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn num_rows(&self) -> usize {
        self.a.rows()
    }

    pub fn num_cols(&self) -> usize {
        self.a.cols()
    }

    pub fn matrix(&self) -> &Matrix {
        &self.a
    }

    /// Solve with the simplex engine.
    pub fn solve(&self) -> LpStatus {
        let dir = match self.direction {
            Direction::Maximize => OptimizationDirection::Maximize,
            Direction::Minimize => OptimizationDirection::Minimize,
        };
        let mut problem = Problem::new(dir);
        let vars: Vec<_> = self
            .c
            .iter()
            .map(|&coef| problem.add_var(coef, (0.0, 1.0)))
            .collect();

        let last = self.a.rows() - 1;
        for r in 0..self.a.rows() {
            let (op, rhs) = if r == last {
                (ComparisonOp::Eq, self.fix)
            } else {
                (ComparisonOp::Le, self.b[r])
            };
            let row = self.a.row(r);
            if row.iter().all(|&coef| coef == 0.0) {
                // 0 <= rhs (or 0 == rhs): decide it here instead of handing the engine an empty row.
                let holds = match op {
                    ComparisonOp::Eq => rhs.abs() <= 1e-12,
                    _ => rhs >= 0.0,
                };
                if holds {
                    continue;
                }
                return LpStatus::Failed {
                    reason: format!("row {r} is empty and cannot satisfy rhs {rhs}"),
                };
            }
            let mut expr = LinearExpr::empty();
            for (var, &coef) in vars.iter().zip(row) {
                if coef != 0.0 {
                    expr.add(*var, coef);
                }
            }
            problem.add_constraint(expr, op, rhs);
        }

        match problem.solve() {
            Ok(sol) => {
                let x: Vec<f64> = vars.iter().map(|v| sol[*v]).collect();
                trace!(objective = sol.objective(), ?x, "lp solved");
                LpStatus::Feasible {
                    x,
                    objective: sol.objective(),
                }
            }
            Err(e) => {
                trace!(error = %e, "lp failed");
                LpStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
