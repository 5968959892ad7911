//! Run a closure under a fresh progress source.

use crate::handle::ProgressHandle;
use crate::source::ProgressSource;

/// Create a source of `total_units`, let `build` drive it, and return the
/// consumer view.
///
/// `build` typically hands the source to workers or captures child
/// progress into it.
pub fn progress(total_units: i64, build: impl FnOnce(&ProgressSource)) -> ProgressHandle {
    progress_with(total_units, build).0
}

/// Like [`progress`], also returning whatever `build` produced.
pub fn progress_with<T>(
    total_units: i64,
    build: impl FnOnce(&ProgressSource) -> T,
) -> (ProgressHandle, T) {
    let source = ProgressSource::new(total_units);
    let output = build(&source);
    (source.handle(), output)
}

/// Run `work` with a new source of `total_units` current on this thread,
/// its whole total reserved for the first progress `work` constructs.
pub fn capture(total_units: i64, work: impl FnOnce()) -> ProgressHandle {
    progress(total_units, |source| {
        source.capture_progress(source.total_units(), work)
    })
}
