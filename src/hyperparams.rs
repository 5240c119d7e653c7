use crate::{ClippDcd, ClippDcdError, Float, ParamGuard};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// Order in which coordinates of the active set are visited
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Sweep the whole active set in index order, one outer iteration per pass
    Cyclic,
    /// Update only the coordinate with the largest KKT violation, one outer iteration per update
    Greedy,
}

/// A verified hyper-parameter set ready for solving a dual problem
///
/// See [`ClippDcdParams`] for more information.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct ClippDcdValidParams<F: Float> {
    pub(crate) eps: F,
    pub(crate) max_iterations: usize,
    pub(crate) shrinking: bool,
    pub(crate) cache_rows: bool,
    pub(crate) selection: Selection,
}

impl<F: Float> ClippDcdValidParams<F> {
    pub fn eps(&self) -> F {
        self.eps
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn shrinking(&self) -> bool {
        self.shrinking
    }

    pub fn cache_rows(&self) -> bool {
        self.cache_rows
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }
}

/// ClippDCD hyperparameters
///
/// The solve is controlled by a KKT tolerance, an iteration budget and a couple of switches for
/// the internal bookkeeping. None of them changes the problem being solved, only how close and
/// how fast the solver gets to its optimum.
///
/// ## Example
///
/// ```rust
/// use linfa_clippdcd::{ClippDcd, Selection};
/// use ndarray::array;
///
/// let dual = array![[2., 0.], [0., 2.]];
/// let solution = ClippDcd::params()
///     .eps(1e-8)
///     .max_iterations(500)
///     .selection(Selection::Greedy)
///     .solve(&dual, 1.0)
///     .unwrap();
///
/// assert!(!solution.is_approximate());
/// ```
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct ClippDcdParams<F: Float>(ClippDcdValidParams<F>);

impl<F: Float> ClippDcdParams<F> {
    /// Create hyper parameter set
    ///
    /// This creates a `ClippDcdParams` and sets it to the default values:
    ///  * eps of 1e-5
    ///  * 15000 iterations
    ///  * shrinking enabled
    ///  * row caching enabled
    ///  * cyclic coordinate selection
    pub fn new() -> Self {
        Self(ClippDcdValidParams {
            eps: F::cast(1e-5),
            max_iterations: 15000,
            shrinking: true,
            cache_rows: true,
            selection: Selection::Cyclic,
        })
    }

    /// Set stopping condition
    ///
    /// The solver stops once no coordinate violates its KKT condition by more than `eps`. This is
    /// also the slack allowed for the gradient sign when retiring a coordinate at a bound.
    pub fn eps(mut self, eps: F) -> Self {
        self.0.eps = eps;
        self
    }

    /// Set the iteration budget
    ///
    /// With cyclic selection an iteration is a full pass over the active set, with greedy
    /// selection a single coordinate update. An exhausted budget yields an approximate solution.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.0.max_iterations = max_iterations;
        self
    }

    /// Shrink active variable set
    ///
    /// Coordinates pinned at a bound whose gradient agrees with the bound are retired from the
    /// passes. They are checked again against a fresh gradient before the solver terminates.
    pub fn shrinking(mut self, shrinking: bool) -> Self {
        self.0.shrinking = shrinking;
        self
    }

    /// Propagate updates with a single pass over the whole dual matrix column
    ///
    /// This only takes effect while no variable is retired, afterwards the gradient is updated
    /// index by index over the active set. It only affects speed, the result is bit-for-bit
    /// identical.
    pub fn cache_rows(mut self, cache_rows: bool) -> Self {
        self.0.cache_rows = cache_rows;
        self
    }

    /// Set the coordinate selection strategy
    pub fn selection(mut self, selection: Selection) -> Self {
        self.0.selection = selection;
        self
    }
}

impl<F: Float> Default for ClippDcdParams<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> ClippDcd<F> {
    pub fn params() -> ClippDcdParams<F> {
        ClippDcdParams::new()
    }
}

impl<F: Float> ParamGuard for ClippDcdParams<F> {
    type Checked = ClippDcdValidParams<F>;
    type Error = ClippDcdError;

    fn check_ref(&self) -> Result<&Self::Checked, Self::Error> {
        if !self.0.eps.is_finite() || self.0.eps <= F::zero() {
            Err(ClippDcdError::InvalidEps(self.0.eps.to_f32().unwrap()))
        } else if self.0.max_iterations == 0 {
            Err(ClippDcdError::InvalidMaxIterations(self.0.max_iterations))
        } else {
            Ok(&self.0)
        }
    }

    fn check(self) -> Result<Self::Checked, Self::Error> {
        self.check_ref()?;
        Ok(self.0)
    }
}
