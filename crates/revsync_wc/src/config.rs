//! Working-copy options.

/// Options shared by all operations on one working copy.
#[derive(Debug, Clone)]
pub struct WcOptions {
    /// Stamp restored and newly added files with their committed date
    /// instead of the wall clock.
    pub use_commit_times: bool,
    /// Byte sequence the `native` line-ending style expands to.
    pub native_eol: Vec<u8>,
}

impl Default for WcOptions {
    fn default() -> Self {
        Self {
            use_commit_times: false,
            native_eol: if cfg!(windows) {
                b"\r\n".to_vec()
            } else {
                b"\n".to_vec()
            },
        }
    }
}
