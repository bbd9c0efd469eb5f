//! Query planning: LLM-driven decomposition of a question into a
//! retrieval plan, with robust extraction of the plan from model output.

pub mod plan_extract;
pub mod planner;

pub use plan_extract::extract_json_object;
pub use planner::Planner;
