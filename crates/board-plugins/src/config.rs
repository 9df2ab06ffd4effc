use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable overriding the module search prefixes at runtime.
/// Read at build time too, to bake in a deployment default.
pub const SEARCH_PATHS_ENV: &str = "BOARD_MODULE_SEARCH_PATHS";

/// Prefixes tried when no build-time list was given.
///
/// Board modules live in their own `board-plugins/` directory. Libraries of
/// the same file name in the plain library directories expect a different
/// token type and must never be picked up by accident, so neither those
/// directories nor the empty (system loader) prefix are searched by default.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "/usr/local/lib/board-plugins/",
    "/usr/lib/board-plugins/",
    "/usr/lib64/board-plugins/",
];

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LoaderConfig {
    /// Ordered prefixes; each is concatenated with the module file name.
    pub search_paths: Vec<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let search_paths = match option_env!("BOARD_MODULE_SEARCH_PATHS") {
            Some(list) => split_list(list),
            None => DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
        };
        Self { search_paths }
    }
}

impl LoaderConfig {
    pub fn with_search_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Defaults, replaced by `BOARD_MODULE_SEARCH_PATHS` when it is set.
    pub fn from_env() -> Self {
        match std::env::var_os(SEARCH_PATHS_ENV) {
            Some(list) => Self::from_list(list),
            None => Self::default(),
        }
    }

    /// Parse a list separated by the platform path separator.
    pub fn from_list(list: impl Into<OsString>) -> Self {
        let list = list.into();
        Self {
            search_paths: std::env::split_paths(&list).collect(),
        }
    }
}

fn split_list(list: &str) -> Vec<PathBuf> {
    std::env::split_paths(list).collect()
}
