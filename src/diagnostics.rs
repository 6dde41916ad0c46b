use crate::adapter::FrameInfo;
use crate::error::Error;
use crate::session::SessionHandle;
use std::path::Path;

/// Source file of library specializations emitted by the compiler.
pub const COMPILER_GENERATED: &str = "<compiler-generated>";

/// Keep frames with user-visible source locations.
pub fn filter_frames(frames: &[FrameInfo]) -> Vec<String> {
    frames
        .iter()
        .filter(|frame| match &frame.file {
            None => false,
            Some(file) => file != Path::new(COMPILER_GENERATED),
        })
        .map(|frame| frame.description.clone())
        .collect()
}

/// Main thread stack trace, innermost frame first.
pub fn main_thread_trace(session: &SessionHandle) -> Result<Vec<String>, Error> {
    Ok(filter_frames(&session.main_thread_frames()?))
}
