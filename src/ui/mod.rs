//! Terminal progress for long-running build phases
//!
//! Spinners are drawn on stderr only when it is an interactive terminal
//! outside CI. Stdout stays free for machine-readable output.

mod context;
mod progress;

pub use context::UiContext;
pub use progress::TaskSpinner;
