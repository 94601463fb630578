pub mod set_spec;
pub mod view;

pub use set_spec::{load_all, Program, SetSpec};
pub use view::{ConfigView, TimeRange, GLOBAL_SECTION};

use anyhow::{Context, Result};
use ini::Ini;
use std::path::Path;

/// Load and parse the INI config file. Does not yet build
/// `SetSpec`s — that's `set_spec::load_all`.
pub fn load_ini(path: &Path) -> Result<Ini> {
    Ini::load_from_file(path)
        .with_context(|| format!("failed to read config file {}", path.display()))
}
