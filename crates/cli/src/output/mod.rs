//! Output configuration and formatting

mod formatter;

pub use formatter::Formatter;

use cs_core::config::Defaults;

/// How command output is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    /// Machine-readable JSON on stdout
    pub json: bool,
    pub no_color: bool,
    /// Suppress everything but errors
    pub quiet: bool,
    /// Show progress bars for long operations
    pub progress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json: false,
            no_color: false,
            quiet: false,
            progress: true,
        }
    }
}

impl OutputConfig {
    /// Merge command-line switches over the `[defaults]` config section
    pub fn resolve(json: bool, no_color: bool, quiet: bool, defaults: &Defaults) -> Self {
        let json = json || defaults.output == "json";
        let no_color = no_color
            || match defaults.color.as_str() {
                "never" => true,
                "always" => false,
                _ => !console::colors_enabled_stderr(),
            };
        Self {
            json,
            no_color,
            quiet,
            progress: defaults.progress && !json && !quiet,
        }
    }
}
