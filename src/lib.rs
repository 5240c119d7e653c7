//! # Clipping Dual Coordinate Descent
//!
//! `linfa-clippdcd` solves the box-constrained quadratic program
//!
//! ```text
//! min_a  0.5 * a^T H a - 1^T a    s.t.  0 <= a_i <= C
//! ```
//!
//! which is the dual problem of (twin) support vector machines. `H` is the dense, symmetric and
//! positive semi-definite dual matrix derived from the kernel, `C` the penalty of the classifier.
//! Assembling `H` and turning the coefficients into a decision function is left to the caller.
//!
//! # The solver
//! This implementation follows the clipping dual coordinate descent (ClippDCD) method of Peng,
//! Chen and Kong (2014). It repeatedly optimizes a single coefficient with all others fixed:
//!
//! 1. Compute the unconstrained step `-g_i / H_ii` from the gradient `g = H a - 1`
//! 2. Clip the new value to the box `[0, C]`
//! 3. Propagate the change into the gradient of all coordinates still in the active set
//!
//! Coefficients which settle at a bound with a gradient pointing outwards are retired from the
//! active set. Before the solver terminates the gradient of every retired coefficient is rebuilt
//! from scratch and all which lost their optimality are reinstated.
//!
//! # Example
//! ```rust
//! use linfa_clippdcd::ClippDcd;
//! use ndarray::array;
//!
//! let dual = array![[2., 0.], [0., 2.]];
//! let solution = ClippDcd::params().solve(&dual, 0.3).unwrap();
//!
//! assert_eq!(solution.alpha(), &[0.3, 0.3]);
//! ```
use ndarray::{ArrayBase, Data, Ix2};

use std::fmt;
use std::marker::PhantomData;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

pub mod benchmarks;
pub mod error;
mod float;
pub mod hyperparams;
mod param_guard;
pub mod solver;

pub use error::{ClippDcdError, Result};
pub use float::Float;
pub use hyperparams::{ClippDcdParams, ClippDcdValidParams, Selection};
pub use param_guard::ParamGuard;
pub use solver::{clippdcd, objective};

/// Clipping dual coordinate descent solver
///
/// Entry point to the hyperparameters, see [`ClippDcd::params`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClippDcd<F: Float> {
    phantom: PhantomData<F>,
}

/// Reason for stopping
///
/// The solver can either exit because the tolerance is reached or the iterations are maxed out.
/// To differentiate between both this flag is passed with the solution.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    ReachedThreshold,
    ReachedIterations,
}

/// Coefficients of a solved dual problem
///
/// Besides the coefficient vector this contains the quality of the solution and how it was
/// reached.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Debug, Clone, PartialEq)]
pub struct DualSolution<F: Float> {
    pub(crate) alpha: Vec<F>,
    pub(crate) exit_reason: ExitReason,
    pub(crate) iterations: usize,
    pub(crate) updates: usize,
    pub(crate) objective: F,
    pub(crate) max_violation: F,
}

impl<F: Float> DualSolution<F> {
    /// Dual coefficients, each one in `[0, C]`
    pub fn alpha(&self) -> &[F] {
        &self.alpha
    }

    pub fn into_alpha(self) -> Vec<F> {
        self.alpha
    }

    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    /// True if the iteration budget ran out before the tolerance was met
    ///
    /// The coefficients are still feasible, but not necessarily optimal.
    pub fn is_approximate(&self) -> bool {
        self.exit_reason == ExitReason::ReachedIterations
    }

    /// Number of outer iterations
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Number of coefficient changes applied
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Value of `0.5 * a^T H a - 1^T a` at the solution
    pub fn objective(&self) -> F {
        self.objective
    }

    /// Largest projected gradient at the solution
    pub fn max_violation(&self) -> F {
        self.max_violation
    }

    /// Returns the number of support vectors
    ///
    /// This function returns the number of coefficients which have an influence on the decision
    /// outcome greater than zero.
    pub fn nsupport(&self) -> usize {
        self.alpha
            .iter()
            // around 1e-5 for f32 and 2e-14 for f64
            .filter(|x| x.abs() > F::cast(100.) * F::epsilon())
            .count()
    }
}

impl<F: Float> ClippDcdParams<F> {
    /// Check the hyperparameters and solve the dual problem `(dual, c)`
    pub fn solve<D: Data<Elem = F>>(
        &self,
        dual: &ArrayBase<D, Ix2>,
        c: F,
    ) -> Result<DualSolution<F>> {
        self.check_ref()?.solve(dual, c)
    }
}

/// Display solution
///
/// In order to understand the solution of the solver the objective, number of iterations and
/// required support vectors are printed here.
impl<F: Float> fmt::Display for DualSolution<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_reason {
            ExitReason::ReachedThreshold => write!(
                f,
                "Exited after {} iterations with obj = {} and {} support vectors",
                self.iterations,
                self.objective,
                self.nsupport()
            ),
            ExitReason::ReachedIterations => write!(
                f,
                "Reached maximal iterations {} with obj = {}, violation {} and {} support vectors",
                self.iterations,
                self.objective,
                self.max_violation,
                self.nsupport()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DualSolution, ExitReason};

    fn solution(alpha: Vec<f64>, exit_reason: ExitReason) -> DualSolution<f64> {
        DualSolution {
            alpha,
            exit_reason,
            iterations: 3,
            updates: 5,
            objective: -0.5,
            max_violation: 0.25,
        }
    }

    #[test]
    fn counts_support_vectors() {
        let sol = solution(vec![0.0, 1e-20, 0.5, 1.0], ExitReason::ReachedThreshold);
        assert_eq!(sol.nsupport(), 2);
    }

    #[test]
    fn display_exit_reason() {
        let sol = solution(vec![0.5, 0.5], ExitReason::ReachedThreshold);
        assert!(!sol.is_approximate());
        assert_eq!(
            sol.to_string(),
            "Exited after 3 iterations with obj = -0.5 and 2 support vectors"
        );

        let sol = solution(vec![0.5, 0.0], ExitReason::ReachedIterations);
        assert!(sol.is_approximate());
        assert_eq!(
            sol.to_string(),
            "Reached maximal iterations 3 with obj = -0.5, violation 0.25 and 1 support vectors"
        );
    }
}
