//! Terminal feedback on stderr
//!
//! Stdout is reserved for the content digest, so everything here draws to
//! stderr and stays silent when stderr is not a terminal.

mod context;
mod progress;

pub use context::UiContext;
pub use progress::TaskSpinner;
