//! Reporter trait for dependency injection
//!
//! Stages report progress and recovered errors through this trait so the
//! core is not coupled to a terminal. The CLI provides a colouring console
//! implementation; tests use [`NullReporter`] or a recording stub.

/// Sink for user-facing pipeline output.
pub trait Reporter: Send + Sync {
    /// A new stage has started (e.g. "Preparing RGBA atlases...").
    fn section(&self, title: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message. Shown highlighted; does not imply the run failed.
    fn error(&self, msg: &str);

    /// Display the final summary of a run.
    fn summary(&self, invocations: usize, issues: usize, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn summary(&self, invocations: usize, issues: usize, elapsed_secs: f64) {
        (**self).summary(invocations, issues, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: f64) {}
}
