//! Detecting whether progress output is wanted

use std::io::IsTerminal;

/// Environment variables set by common CI systems
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "JENKINS_URL",
    "BUILDKITE",
];

/// Whether spinners should be drawn
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    /// Detect from stderr and the environment; `quiet` disables output
    pub fn detect(quiet: bool) -> Self {
        Self {
            interactive: !quiet && Self::detect_interactive(),
        }
    }

    /// A context that never draws (for tests and `--quiet`)
    pub fn non_interactive() -> Self {
        Self { interactive: false }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn detect_interactive() -> bool {
        if !std::io::stderr().is_terminal() {
            return false;
        }
        !CI_VARS.iter().any(|var| std::env::var_os(var).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_is_never_interactive() {
        assert!(!UiContext::detect(true).is_interactive());
        assert!(!UiContext::non_interactive().is_interactive());
    }
}
