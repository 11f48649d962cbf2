//! User-facing diagnostics, as distinct from the `log`-facade tracing used
//! internally by the writer/reader/schedulers.

/// Sink for warnings and errors meant for the end user, not the debug log.
pub trait Reporter: Send + Sync {
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default reporter: writes to stderr with the conventional prefixes.
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn warn(&self, message: &str) {
        eprintln!("**Warn: {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("**Error: {message}");
    }
}

/// A reporter that discards everything, useful for library callers that
/// want to handle diagnostics themselves via the `log` facade only.
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingReporter {
        warnings: Mutex<Vec<String>>,
    }

    impl Reporter for RecordingReporter {
        fn warn(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
        fn error(&self, _message: &str) {}
    }

    #[test]
    fn records_warnings() {
        let r = RecordingReporter {
            warnings: Mutex::new(Vec::new()),
        };
        r.warn("skipped symlink foo");
        assert_eq!(r.warnings.lock().unwrap().len(), 1);
    }
}
