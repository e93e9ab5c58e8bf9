//! CP model construction, search, and solution parsing.

pub mod builder;
pub mod driver;
pub mod model;
pub mod objective;
pub mod search;
pub mod solution;

pub use builder::{BuildConfig, ConstraintBuilder};
pub use driver::{CpSolver, SolverResult, SolverStatistics, SolverStatus};
pub use model::{CpModel, CpSolution, IntervalVar};
pub use objective::{ObjectiveBuilder, ObjectiveSpec, ObjectiveWeights};
pub use solution::{SolutionContext, SolutionParser};
