//! Settings trees: path access, agent/preset merging and parameter resolution.

pub mod merger;
pub mod path;
pub mod resolver;

pub use merger::{ArrayMergeStrategy, SettingsMerger};
pub use path::{delete_path, get_path, parse_path, set_path, PathError, PathSegment};
pub use resolver::{ParameterResolutionResult, ParameterResolver, RESERVED_SETTING_KEYS};
