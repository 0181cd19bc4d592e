//! Workflow Runtime (spec.md §4.1): step dispatch, the per-execution state
//! machine, transition selection, and resume-by-event/resume-by-timer.
//!
//! - `render` -- `{{var}}` / `{{var ?? default}}` template grammar (§6)
//! - `condition` -- CONDITION step operator semantics (§6)
//! - `runtime` -- `ProcessStep`/`HandleEvent`/`ProcessTimeout`/`StartExecution`

pub mod condition;
pub mod render;
pub mod runtime;
