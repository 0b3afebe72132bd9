use std::io;

use serde::Deserialize;
use spyglass_connection::{ApiMask, ConnectionHeader, Flags};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum LaunchProfileError {
    #[error("could not read launch profile {path}: {source}")]
    FileRead { path: String, source: io::Error },
    #[error("could not parse launch profile: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("unknown api {0:?}")]
    UnknownApi(String),
    #[error("unknown capture flag {0:?}")]
    UnknownFlag(String),
}

pub(crate) fn read_launch_profile(path: &str) -> Result<LaunchProfile, LaunchProfileError> {
    let launch_profile_contents = std::fs::read_to_string(path)
        .map_err(|source| LaunchProfileError::FileRead { path: path.to_string(), source })?;

    parse_launch_profile(&launch_profile_contents)
}

pub(crate) fn parse_launch_profile(contents: &str) -> Result<LaunchProfile, LaunchProfileError> {
    Ok(toml::from_str(contents)?)
}

#[derive(Debug, Deserialize)]
pub(crate) struct LaunchProfile {
    pub executable: String,

    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default = "default_interceptor")]
    pub interceptor: String,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub start_frame: u32,

    #[serde(default)]
    pub num_frames: u32,

    #[serde(default)]
    pub observe_frame_frequency: u32,

    #[serde(default)]
    pub observe_draw_frequency: u32,

    #[serde(default = "default_apis")]
    pub apis: Vec<String>,

    /// Flag names as declared on [`Flags`], e.g. `"RECORD_ERROR_STATE"`.
    #[serde(default)]
    pub flags: Vec<String>,

    #[serde(default)]
    pub defer_start: bool,
}

impl LaunchProfile {
    /// The handshake sent to the spy once it connects.
    pub fn header(&self) -> Result<ConnectionHeader, LaunchProfileError> {
        let mut apis = ApiMask::empty();
        for api in &self.apis {
            apis |= ApiMask::from_name(&api.to_uppercase())
                .ok_or_else(|| LaunchProfileError::UnknownApi(api.clone()))?;
        }

        let mut flags = Flags::empty();
        for flag in &self.flags {
            flags |= Flags::from_name(&flag.to_uppercase())
                .ok_or_else(|| LaunchProfileError::UnknownFlag(flag.clone()))?;
        }
        flags.set(Flags::DEFER_START, self.defer_start);

        Ok(ConnectionHeader {
            observe_frame_frequency: self.observe_frame_frequency,
            observe_draw_frequency: self.observe_draw_frequency,
            start_frame: self.start_frame,
            num_frames: self.num_frames,
            apis,
            flags,
            ..Default::default()
        })
    }
}

fn default_interceptor() -> String {
    "./libspyglass_interceptor.so".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:9286".to_string()
}

fn default_output() -> String {
    "./capture.trace".to_string()
}

fn default_apis() -> Vec<String> {
    vec!["gles".to_string(), "vulkan".to_string()]
}

#[cfg(test)]
mod tests {
    use spyglass_connection::{ApiMask, Flags};

    use crate::profile::*;

    #[test]
    fn only_the_executable_is_required() {
        let profile = parse_launch_profile(r#"executable = "./game""#).unwrap();

        assert_eq!(profile.listen, "127.0.0.1:9286");
        assert_eq!(profile.output, "./capture.trace");
        assert!(profile.arguments.is_empty());
        assert!(!profile.defer_start);

        let header = profile.header().unwrap();
        assert_eq!(header.apis, ApiMask::all());
        assert_eq!(header.flags, Flags::empty());
        assert_eq!(header.start_frame, 0);
    }

    #[test]
    fn we_can_build_a_deferred_header() {
        let profile = parse_launch_profile(r#"
            executable = "./game"
            arguments = ["--fullscreen"]
            start_frame = 10
            num_frames = 3
            observe_frame_frequency = 1
            apis = ["vulkan"]
            flags = ["record_error_state", "NO_BUFFER"]
            defer_start = true
        "#).unwrap();

        let header = profile.header().unwrap();

        assert_eq!(profile.arguments, vec!["--fullscreen".to_string()]);
        assert_eq!(header.apis, ApiMask::VULKAN);
        assert_eq!(header.flags, Flags::RECORD_ERROR_STATE | Flags::NO_BUFFER | Flags::DEFER_START);
        assert_eq!((header.start_frame, header.num_frames), (10, 3));
        assert!(header.is_deferred());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let profile = parse_launch_profile(r#"
            executable = "./game"
            flags = ["MAKE_IT_FAST"]
        "#).unwrap();

        assert!(matches!(profile.header(), Err(LaunchProfileError::UnknownFlag(f)) if f == "MAKE_IT_FAST"));
    }

    #[test]
    fn profiles_without_an_executable_do_not_parse() {
        assert!(matches!(parse_launch_profile("start_frame = 1"), Err(LaunchProfileError::ConfigParse(_))));
    }
}
