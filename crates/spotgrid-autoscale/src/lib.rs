//! spotgrid-autoscale: queue-driven fleet scaling.
//!
//! Compares a `QueueSnapshot` and the idle/busy classification of fleet
//! instances against `ScalingThresholds`, and emits one `ScalingDecision`
//! per cycle. No side effects: the decision is applied by the reconciler.
//!
//! # Scaling Algorithm
//!
//! ```text
//! idle        = instances with no busy agent
//! if |idle| > max_idle_instances:
//!     retire  = first min(|idle|, max_units_per_scale) idle instances
//!     ScaleDown(active - |retire|)
//!
//! else if queued > max_queued_builds or avg_wait > max_average_queue_minutes:
//!     if active > target: NoOp (previous scale-down not yet fulfilled)
//!     n       = largest k <= max_units_per_scale with license(agents_per_instance * k)
//!     ScaleUp(max(target, active + n))
//!
//! clamp result to [1, 250]
//! ```

pub mod scaler;
pub mod selector;

pub use scaler::{DecisionInput, DecisionReason, Direction, ScalingDecision, decide};
pub use selector::{TerminationPlan, select_for_termination};
