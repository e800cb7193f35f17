//! Environment variable sources consulted during key resolution.
//!
//! The process environment is read through [`ProcessEnv`]; any map of
//! variables works as well, which keeps embedding hosts and tests away from
//! global process state.

use std::collections::HashMap;

pub trait EnvSource {
    /// Value of `name`, or `None` when unset. An empty value is still set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from the environment of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        // Non-unicode values are unusable as key text.
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<T: EnvSource + ?Sized> EnvSource for &T {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}
