//! Prompt templates and built-in screening tasks.
//!
//! Each submodule holds the prompts for one screening phase and builds the
//! matching [`ScreeningTask`].

pub mod exclusion;
pub mod inclusion;
pub mod venue;

use crate::task::ScreeningTask;

/// Names accepted by `--task` besides a JSON file path
pub const PRESET_NAMES: &[&str] = &["inclusion", "venue", "exclusion"];

/// Look up a built-in task by name
pub fn preset(name: &str) -> Option<ScreeningTask> {
    match name {
        "inclusion" => Some(inclusion::task()),
        "venue" => Some(venue::task()),
        "exclusion" => Some(exclusion::task()),
        _ => None,
    }
}

/// One-line description for `rustslr tasks`
pub fn describe(name: &str) -> &'static str {
    match name {
        "inclusion" => "FM/LLM agent focus, SE context, English (all must pass)",
        "venue" => "primary source, main venue, peer reviewed (all must pass)",
        "exclusion" => "EC7/EC8 architecture exclusion, JSON answers (any exclude wins)",
        _ => "",
    }
}
