use super::{ClippDcd, ClippDcdError, DualSolution, ExitReason, Float, Result};
use crate::hyperparams::{ClippDcdValidParams, Selection};

use log::{debug, trace, warn};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Data, Ix1, Ix2, Zip};

/// Current state of the ClippDCD solver
///
/// We are solving the dual problem with box constraints
/// min_a f(a), s.t. 0 <= a_t <= C, t = 1, ..., l
/// where f(a) = a^T H a / 2 - 1^T a
#[derive(Clone, Debug, PartialEq)]
pub struct SolverState<'a, F: Float> {
    /// Quadratic term of the problem
    dual: ArrayView2<'a, F>,
    /// Upper bound of each variable
    bound: F,
    /// Current value of each variable
    alpha: Array1<F>,
    /// Gradient H a - 1, stale for retired variables
    gradient: Array1<F>,
    /// Variables visited by the next pass, in index order
    active_set: Vec<usize>,
    /// Variables pinned at a bound and excluded from the passes
    retired: Vec<usize>,
    /// Variables retired during the current pass
    retiring: Vec<bool>,

    iterations: usize,
    updates: usize,

    /// Parameters, e.g. stopping condition etc.
    params: &'a ClippDcdValidParams<F>,
}

impl<'a, F: Float> SolverState<'a, F> {
    /// Initialize a solver state
    ///
    /// This is bounded by the lifetime of the dual matrix, because it can be quite large. All
    /// variables start at zero and are active.
    pub fn new(dual: ArrayView2<'a, F>, bound: F, params: &'a ClippDcdValidParams<F>) -> Self {
        let n = dual.nrows();

        SolverState {
            dual,
            bound,
            alpha: Array1::zeros(n),
            // d(a) = H a - 1 with a = 0
            gradient: Array1::from_elem(n, -F::one()),
            active_set: (0..n).collect(),
            retired: Vec::new(),
            retiring: vec![false; n],
            iterations: 0,
            updates: 0,
            params,
        }
    }

    /// Return number of active variables
    pub fn nactive(&self) -> usize {
        self.active_set.len()
    }

    /// Return number of total variables
    pub fn ntotal(&self) -> usize {
        self.alpha.len()
    }

    pub fn alpha(&self) -> &Array1<F> {
        &self.alpha
    }

    /// Projected gradient of a variable
    ///
    /// Zero if the variable satisfies its KKT condition, the gradient is cut at the bounds where
    /// it points out of the box.
    fn projected_gradient(&self, i: usize) -> F {
        let grad = self.gradient[i];
        if self.alpha[i] <= F::zero() {
            F::min(grad, F::zero())
        } else if self.alpha[i] >= self.bound {
            F::max(grad, F::zero())
        } else {
            grad
        }
    }

    fn violation(&self, i: usize) -> F {
        self.projected_gradient(i).abs()
    }

    /// Whether a variable sits at a bound and its gradient agrees with it
    fn at_optimal_bound(&self, i: usize) -> bool {
        let eps = self.params.eps();
        if self.alpha[i] == F::zero() {
            self.gradient[i] >= -eps
        } else if self.alpha[i] == self.bound {
            self.gradient[i] <= eps
        } else {
            false
        }
    }

    /// Add `delta * H[.., i]` to the gradient of every active variable
    ///
    /// The cached column is only used while no variable is retired. Once the active set has
    /// shrunk both ways walk the active indices.
    fn propagate(&mut self, i: usize, delta: F) -> Result<()> {
        if self.params.cache_rows() && self.retired.is_empty() {
            // no variable is retired, the active set covers the whole gradient
            Zip::from(&mut self.gradient)
                .and(&self.dual.column(i))
                .for_each(|grad, &dist| *grad += delta * dist);

            if let Some(index) = self.gradient.iter().position(|x| !x.is_finite()) {
                return Err(ClippDcdError::NonFiniteGradient { index });
            }
        } else {
            for &j in &self.active_set {
                self.gradient[j] += delta * self.dual[[j, i]];
                if !self.gradient[j].is_finite() {
                    return Err(ClippDcdError::NonFiniteGradient { index: j });
                }
            }
        }

        Ok(())
    }

    /// Optimize a single variable with all others fixed
    ///
    /// Returns whether the variable may be retired afterwards.
    fn update(&mut self, i: usize) -> Result<bool> {
        let diag = self.dual[[i, i]];
        if diag <= F::zero() {
            return Err(ClippDcdError::NonPositiveDiagonal {
                index: i,
                value: diag.to_f32().unwrap(),
            });
        }

        let old_alpha = self.alpha[i];
        let new_alpha = F::min(
            F::max(old_alpha - self.gradient[i] / diag, F::zero()),
            self.bound,
        );
        let delta = new_alpha - old_alpha;

        // every representable step is taken, the optimal step scales with 1 / H_ii
        if delta != F::zero() {
            self.alpha[i] = new_alpha;
            self.propagate(i, delta)?;
            self.updates += 1;
        }

        Ok(self.params.shrinking() && self.at_optimal_bound(i))
    }

    /// Run a single pass over the active set
    ///
    /// Returns the largest violation seen before each update. Variables retired in this pass
    /// keep receiving gradient updates until the pass is finished.
    fn sweep(&mut self) -> Result<F> {
        let mut max_violation = F::zero();
        let mut nretiring = 0;

        for k in 0..self.active_set.len() {
            let i = self.active_set[k];
            max_violation = F::max(max_violation, self.violation(i));

            if self.update(i)? {
                self.retiring[i] = true;
                nretiring += 1;
            }
        }

        if nretiring > 0 {
            let retiring = &mut self.retiring;
            let retired = &mut self.retired;
            self.active_set.retain(|&i| {
                if retiring[i] {
                    retiring[i] = false;
                    retired.push(i);
                    false
                } else {
                    true
                }
            });
        }

        debug!(
            "pass {}: max violation {:.3e}, {} of {} variables active",
            self.iterations,
            max_violation,
            self.nactive(),
            self.ntotal()
        );

        Ok(max_violation)
    }

    /// Update the active variable with the largest violation
    ///
    /// Returns the largest violation, no variable is changed if it is below the tolerance.
    fn greedy_step(&mut self) -> Result<F> {
        let mut max_violation = (F::zero(), None);
        for (k, &i) in self.active_set.iter().enumerate() {
            let violation = self.violation(i);
            if violation > max_violation.0 {
                max_violation = (violation, Some(k));
            }
        }

        let (violation, k) = match max_violation {
            (violation, Some(k)) if violation >= self.params.eps() => (violation, k),
            (violation, _) => return Ok(violation),
        };

        let i = self.active_set[k];
        trace!(
            "iteration {}: update variable {} with violation {:.3e}",
            self.iterations,
            i,
            violation
        );

        if self.update(i)? {
            self.active_set.remove(k);
            self.retired.push(i);
        }

        Ok(violation)
    }

    /// Reconstruct gradients of retired variables
    ///
    /// Retired variables do not take part in the gradient updates, so their gradient is computed
    /// from scratch with the current variables.
    fn reconstruct_gradient(&mut self) -> Result<()> {
        for &j in &self.retired {
            let grad = self.dual.row(j).dot(&self.alpha) - F::one();
            if !grad.is_finite() {
                return Err(ClippDcdError::NonFiniteGradient { index: j });
            }
            self.gradient[j] = grad;
        }

        Ok(())
    }

    /// Check the retired variables against a fresh gradient
    ///
    /// Every retired variable which violates its KKT condition is put back into the active set.
    /// Returns true if the whole problem is solved up to the tolerance.
    fn verify(&mut self) -> Result<bool> {
        self.reconstruct_gradient()?;

        let retired = std::mem::take(&mut self.retired);
        let (kept, reinstated): (Vec<_>, Vec<_>) =
            retired.into_iter().partition(|&j| self.at_optimal_bound(j));
        self.retired = kept;

        if !reinstated.is_empty() {
            for &j in &reinstated {
                trace!(
                    "reinstate variable {} with gradient {:.3e}",
                    j,
                    self.gradient[j]
                );
            }
            debug!(
                "reinstated {} of {} retired variables",
                reinstated.len(),
                reinstated.len() + self.retired.len()
            );

            self.active_set.extend(reinstated);
            self.active_set.sort_unstable();

            return Ok(false);
        }

        let max_violation = self
            .active_set
            .iter()
            .map(|&i| self.violation(i))
            .fold(F::zero(), F::max);

        Ok(max_violation < self.params.eps())
    }

    /// Value of the objective function
    ///
    /// Only exact when no retired variable has a stale gradient.
    fn objective(&self) -> F {
        // f(a) = a^T (H a - 1) / 2 - 1^T a / 2
        Zip::from(&self.alpha)
            .and(&self.gradient)
            .fold(F::zero(), |acc, &a, &g| acc + a * (g - F::one()))
            / F::cast(2.0)
    }

    pub fn solve(mut self) -> Result<DualSolution<F>> {
        let max_iterations = self.params.max_iterations();
        let mut exit_reason = ExitReason::ReachedIterations;

        while self.iterations < max_iterations {
            self.iterations += 1;

            let violation = match self.params.selection() {
                Selection::Cyclic => self.sweep()?,
                Selection::Greedy => self.greedy_step()?,
            };

            if violation < self.params.eps() && self.verify()? {
                exit_reason = ExitReason::ReachedThreshold;
                break;
            }
        }

        if exit_reason == ExitReason::ReachedIterations {
            self.reconstruct_gradient()?;
        }

        let max_violation = (0..self.ntotal())
            .map(|i| self.violation(i))
            .fold(F::zero(), F::max);
        let objective = self.objective();

        match exit_reason {
            ExitReason::ReachedThreshold => debug!(
                "converged after {} iterations and {} updates with obj = {}",
                self.iterations, self.updates, objective
            ),
            ExitReason::ReachedIterations => warn!(
                "reached maximal iterations {} with violation {:.3e} > {:.3e}",
                self.iterations,
                max_violation,
                self.params.eps()
            ),
        }

        Ok(DualSolution {
            alpha: self.alpha.to_vec(),
            exit_reason,
            iterations: self.iterations,
            updates: self.updates,
            objective,
            max_violation,
        })
    }
}

impl<F: Float> ClippDcdValidParams<F> {
    /// Solve the dual problem `min 0.5 a^T H a - 1^T a, s.t. 0 <= a <= c`
    ///
    /// `dual` has to be square with a positive diagonal and finite entries, `c` positive and
    /// finite. An exhausted iteration budget is reported in the solution, not as an error.
    pub fn solve<D: Data<Elem = F>>(
        &self,
        dual: &ArrayBase<D, Ix2>,
        c: F,
    ) -> Result<DualSolution<F>> {
        let (rows, cols) = dual.dim();
        if rows != cols {
            return Err(ClippDcdError::NotSquare { rows, cols });
        }
        if rows == 0 {
            return Err(ClippDcdError::EmptyMatrix);
        }
        if !c.is_finite() || c <= F::zero() {
            return Err(ClippDcdError::InvalidBound(c.to_f32().unwrap()));
        }
        if let Some(((row, col), _)) = dual.indexed_iter().find(|(_, x)| !x.is_finite()) {
            return Err(ClippDcdError::NonFiniteEntry { row, col });
        }
        if let Some((index, value)) = dual
            .diag()
            .iter()
            .enumerate()
            .find(|(_, x)| **x <= F::zero())
        {
            return Err(ClippDcdError::NonPositiveDiagonal {
                index,
                value: value.to_f32().unwrap(),
            });
        }

        SolverState::new(dual.view(), c, self).solve()
    }
}

/// Solve a dual problem given as rows with the default hyperparameters
///
/// ```rust
/// use linfa_clippdcd::clippdcd;
///
/// let solution = clippdcd(&[vec![4.0]], 10.0).unwrap();
/// assert_eq!(solution.alpha(), &[0.25]);
/// ```
pub fn clippdcd<F: Float>(dual: &[Vec<F>], c: F) -> Result<DualSolution<F>> {
    let rows = dual.len();
    let cols = dual.first().map(Vec::len).ok_or(ClippDcdError::EmptyMatrix)?;

    if let Some((row, entries)) = dual
        .iter()
        .enumerate()
        .find(|(_, entries)| entries.len() != cols)
    {
        return Err(ClippDcdError::RaggedRow {
            row,
            expected: cols,
            actual: entries.len(),
        });
    }
    if rows != cols {
        return Err(ClippDcdError::NotSquare { rows, cols });
    }

    let dual = Array2::from_shape_fn((rows, cols), |(i, j)| dual[i][j]);
    ClippDcd::<F>::params().solve(&dual, c)
}

/// Evaluate `0.5 * a^T H a - 1^T a`
///
/// ## Panics
///
/// If the shape of `alpha` is not compatible with `dual`
pub fn objective<F: Float, D: Data<Elem = F>, E: Data<Elem = F>>(
    dual: &ArrayBase<D, Ix2>,
    alpha: &ArrayBase<E, Ix1>,
) -> F {
    alpha.dot(&dual.dot(alpha)) / F::cast(2.0) - alpha.sum()
}

#[cfg(test)]
mod tests {
    use super::{objective, SolverState};
    use crate::{ClippDcd, ClippDcdError, ClippDcdValidParams, ParamGuard, Selection};

    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn random_dual(n: usize, seed: u64) -> Array2<f64> {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let records = Array2::random_using((n, 4), Uniform::new(-1., 1.), &mut rng);

        let gram = records.dot(&records.t());
        // the product is only symmetric up to rounding
        (&gram + &gram.t()) / 2. + Array2::<f64>::eye(n) * 0.1
    }

    fn params(selection: Selection) -> ClippDcdValidParams<f64> {
        ClippDcd::params()
            .selection(selection)
            .max_iterations(100_000)
            .check_unwrap()
    }

    #[test]
    fn autotraits() {
        fn has_autotraits<T: Send + Sync + Sized + Unpin>() {}
        has_autotraits::<SolverState<f64>>();
        has_autotraits::<ClippDcdValidParams<f64>>();
        has_autotraits::<crate::DualSolution<f64>>();
    }

    #[test]
    fn row_cache_does_not_change_result() {
        let dual = random_dual(25, 42);

        for &selection in &[Selection::Cyclic, Selection::Greedy] {
            for &shrinking in &[true, false] {
                let params = ClippDcd::params().selection(selection).shrinking(shrinking);
                let cached = params.clone().cache_rows(true).solve(&dual, 0.8).unwrap();
                let direct = params.cache_rows(false).solve(&dual, 0.8).unwrap();

                assert_eq!(cached, direct);
            }
        }
    }

    #[test]
    fn objective_decreases_monotonically() {
        let dual = random_dual(30, 3);
        let params = params(Selection::Cyclic);
        let mut state = SolverState::new(dual.view(), 0.5, &params);

        let mut last = objective(&dual, state.alpha());
        assert_abs_diff_eq!(last, 0.0);
        for _ in 0..50 {
            state.sweep().unwrap();
            let current = objective(&dual, state.alpha());
            assert!(current <= last + 1e-12, "{} > {}", current, last);
            last = current;
        }
    }

    #[test]
    fn greedy_objective_decreases_monotonically() {
        let dual = random_dual(30, 4);
        let params = params(Selection::Greedy);
        let mut state = SolverState::new(dual.view(), 2.0, &params);

        let mut last = objective(&dual, state.alpha());
        for _ in 0..300 {
            state.greedy_step().unwrap();
            let current = objective(&dual, state.alpha());
            assert!(current <= last + 1e-12, "{} > {}", current, last);
            last = current;
        }
    }

    #[test]
    fn incremental_gradient_matches_active_set() {
        let dual = random_dual(20, 7);
        let params = params(Selection::Cyclic);
        let mut state = SolverState::new(dual.view(), 0.3, &params);

        for _ in 0..10 {
            state.sweep().unwrap();
        }

        let exact = dual.dot(state.alpha()) - 1.0;
        for &i in &state.active_set {
            assert_abs_diff_eq!(state.gradient[i], exact[i], epsilon = 1e-10);
        }

        state.reconstruct_gradient().unwrap();
        assert_abs_diff_eq!(state.gradient, exact, epsilon = 1e-10);
    }

    // variable 1 is retired in the first pass, but the update of variable 2 pulls it away from
    // its bound again
    fn coupled_dual() -> Array2<f64> {
        array![[1., 1., 0.], [1., 3., -1.], [0., -1., 1.]]
    }

    #[test]
    fn retired_variable_is_reinstated() {
        let dual = coupled_dual();
        let params = params(Selection::Cyclic);
        let mut state = SolverState::new(dual.view(), 10.0, &params);

        state.sweep().unwrap();
        assert_eq!(state.retired, vec![1]);
        assert_eq!(state.active_set, vec![0, 2]);
        assert_eq!(state.alpha, array![1., 0., 1.]);

        // the remaining active variables are optimal
        assert_abs_diff_eq!(state.sweep().unwrap(), 0.0);

        assert!(!state.verify().unwrap());
        assert!(state.retired.is_empty());
        assert_eq!(state.active_set, vec![0, 1, 2]);
        assert_abs_diff_eq!(state.gradient[1], -1.0);
    }

    #[test]
    fn reinstated_variable_reaches_optimum() {
        let dual = coupled_dual();

        for &selection in &[Selection::Cyclic, Selection::Greedy] {
            let solution = ClippDcd::params()
                .selection(selection)
                .max_iterations(100_000)
                .solve(&dual, 10.0)
                .unwrap();

            assert!(!solution.is_approximate());
            assert_abs_diff_eq!(
                Array1::from(solution.alpha().to_vec()),
                array![0., 1., 2.],
                epsilon = 1e-3
            );
        }
    }

    #[test]
    fn retired_gradient_is_left_stale() {
        let dual = coupled_dual();

        let gradients = [true, false]
            .iter()
            .map(|&cache_rows| {
                let params = ClippDcd::params().cache_rows(cache_rows).check_unwrap();
                let mut state = SolverState::new(dual.view(), 10.0, &params);

                state.sweep().unwrap();
                assert_eq!(state.retired, vec![1]);

                let stale = state.gradient[1];
                state.propagate(0, 0.5).unwrap();
                assert_eq!(state.gradient[1], stale);

                state.gradient
            })
            .collect::<Vec<_>>();

        assert_eq!(gradients[0], gradients[1]);
    }

    #[test]
    fn verify_accepts_optimal_retired_variables() {
        let dual = array![[2., 0.], [0., 2.]];
        let params = params(Selection::Cyclic);
        let mut state = SolverState::new(dual.view(), 0.3, &params);

        assert_abs_diff_eq!(state.sweep().unwrap(), 1.0);
        assert_eq!(state.retired, vec![0, 1]);
        assert!(state.active_set.is_empty());
        assert!(state.verify().unwrap());
        assert_eq!(state.retired, vec![0, 1]);
    }

    #[test]
    fn without_shrinking_nothing_retires() {
        let dual = array![[2., 0.], [0., 2.]];
        let params = ClippDcd::params().shrinking(false).check_unwrap();
        let mut state = SolverState::new(dual.view(), 0.3, &params);

        state.sweep().unwrap();
        assert!(state.retired.is_empty());
        assert_eq!(state.nactive(), 2);
    }

    #[test]
    fn non_positive_diagonal() {
        let dual = array![[2., 0.], [0., -1.]];
        let res = ClippDcd::params().solve(&dual, 1.0);

        assert_eq!(
            res,
            Err(ClippDcdError::NonPositiveDiagonal {
                index: 1,
                value: -1.0
            })
        );
    }

    #[test]
    fn tiny_interior_step_is_taken() {
        let dual = array![[1e17]];
        let params = params(Selection::Cyclic);
        let mut state = SolverState::new(dual.view(), 1.0, &params);

        state.sweep().unwrap();
        assert_abs_diff_eq!(state.alpha[0], 1e-17, epsilon = 1e-30);
        assert!(state.violation(0) < params.eps());
        assert_eq!(state.updates, 1);
    }

    #[test]
    fn diagonal_checked_before_greedy_selection() {
        let dual = array![[1., 5.], [5., 0.]];

        for &selection in &[Selection::Cyclic, Selection::Greedy] {
            let res = ClippDcd::params().selection(selection).solve(&dual, 1.0);

            assert_eq!(
                res,
                Err(ClippDcdError::NonPositiveDiagonal {
                    index: 1,
                    value: 0.0
                })
            );
        }
    }

    #[test]
    fn overflowing_gradient() {
        let dual = array![[1e-300, 1e300], [1e300, 1.]];

        for &cache_rows in &[true, false] {
            let res = ClippDcd::params()
                .cache_rows(cache_rows)
                .solve(&dual, 1e300);

            assert_eq!(res, Err(ClippDcdError::NonFiniteGradient { index: 1 }));
        }
    }

    #[test]
    fn objective_of_solution() {
        let dual = random_dual(15, 11);
        let solution = ClippDcd::params().solve(&dual, 0.7).unwrap();
        let alpha = Array1::from(solution.alpha().to_vec());

        assert_abs_diff_eq!(
            solution.objective(),
            objective(&dual, &alpha),
            epsilon = 1e-10
        );
    }
}
