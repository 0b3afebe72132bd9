use std::env;

use log::LevelFilter;
use spyglass::logging;

const DEFAULT_ADDRESS: &str = "127.0.0.1:9286";
const DEFAULT_LOG_FILE: &str = "spyglass.log";

#[cfg(target_os = "android")]
const DEFAULT_GLES_LIBRARY: &str = "libGLESv2.so";
#[cfg(target_os = "android")]
const DEFAULT_EGL_LIBRARY: &str = "libEGL.so";
#[cfg(not(target_os = "android"))]
const DEFAULT_GLES_LIBRARY: &str = "libGLESv2.so.2";
#[cfg(not(target_os = "android"))]
const DEFAULT_EGL_LIBRARY: &str = "libEGL.so.1";

/// Where the capture tool listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(String),
    Unix(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub address: Address,
    pub log_file: String,
    pub log_level: LevelFilter,
    pub gles_library: String,
    pub egl_library: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let address = lookup("SPYGLASS_ADDRESS").unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let address = match address.strip_prefix("unix:") {
            Some(path) => Address::Unix(path.to_string()),
            None => Address::Tcp(address),
        };

        Self {
            address,
            log_file: lookup("SPYGLASS_LOG").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
            log_level: lookup("SPYGLASS_LOG_LEVEL")
                .map(|level| logging::parse_level(&level))
                .unwrap_or(LevelFilter::Info),
            gles_library: lookup("SPYGLASS_GLES_LIBRARY").unwrap_or_else(|| DEFAULT_GLES_LIBRARY.to_string()),
            egl_library: lookup("SPYGLASS_EGL_LIBRARY").unwrap_or_else(|| DEFAULT_EGL_LIBRARY.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use log::LevelFilter;

    use crate::settings::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = pairs.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let settings = settings(&[]);

        assert_eq!(settings.address, Address::Tcp("127.0.0.1:9286".to_string()));
        assert_eq!(settings.log_file, "spyglass.log");
        assert_eq!(settings.log_level, LevelFilter::Info);
        assert_eq!(settings.gles_library, DEFAULT_GLES_LIBRARY);
    }

    #[test]
    fn we_can_dial_a_unix_socket() {
        let settings = settings(&[
            ("SPYGLASS_ADDRESS", "unix:/tmp/spyglass.sock"),
            ("SPYGLASS_LOG_LEVEL", "trace"),
        ]);

        assert_eq!(settings.address, Address::Unix("/tmp/spyglass.sock".to_string()));
        assert_eq!(settings.log_level, LevelFilter::Trace);
    }
}
