use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{self, Command};
use std::thread;

use log::{error, info, warn, LevelFilter};
use spyglass_connection::START_MID_EXECUTION_CAPTURE;

use crate::error::LaunchError;
use crate::profile::LaunchProfile;

const DEFAULT_LAUNCH_PROFILE_PATH: &str = "./spyglass_launcher.toml";
const LOG_FILE: &str = "spyglass_launcher.log";

mod error;
mod profile;

fn main() {
    if let Err(e) = spyglass_logging::init(LOG_FILE, LevelFilter::Info) {
        eprintln!("Logging disabled: {}", e);
    }

    // Profile path from the environment, or the default
    let profile_path = env::var("SPYGLASS_PROFILE").unwrap_or_else(|_| DEFAULT_LAUNCH_PROFILE_PATH.to_string());

    if let Err(e) = launch(&profile_path) {
        error!("{}", e);
        process::exit(1);
    }
}

fn launch(profile_path: &str) -> Result<(), LaunchError> {
    let launch_profile = profile::read_launch_profile(profile_path)?;
    let header = launch_profile.header()?;

    let listener = TcpListener::bind(&launch_profile.listen)
        .map_err(|source| LaunchError::Listen { address: launch_profile.listen.clone(), source })?;

    let mut child = spawn_target(&launch_profile)?;

    let (mut stream, peer) = listener.accept().map_err(LaunchError::Accept)?;
    info!("Spy connected from {}", peer);

    header.write(&mut stream).map_err(LaunchError::Handshake)?;
    stream.flush().map_err(LaunchError::Handshake)?;

    if header.is_deferred() {
        let sender = stream.try_clone().map_err(LaunchError::Handshake)?;
        thread::spawn(move || wait_for_start(io::stdin().lock(), sender));
        info!("Capture deferred, press enter to start");
    }

    let output = File::create(&launch_profile.output)
        .map_err(|source| LaunchError::Output { path: launch_profile.output.clone(), source })?;
    let received = receive_trace(&mut stream, BufWriter::new(output))?;
    info!("Wrote {} bytes of trace to {}", received, launch_profile.output);

    match child.wait() {
        Ok(status) => info!("{} exited with {}", launch_profile.executable, status),
        Err(e) => warn!("Could not wait for {}: {}", launch_profile.executable, e),
    }
    Ok(())
}

fn spawn_target(launch_profile: &LaunchProfile) -> Result<process::Child, LaunchError> {
    info!("Launching {} with {}", launch_profile.executable, launch_profile.interceptor);

    Command::new(&launch_profile.executable)
        .args(&launch_profile.arguments)
        .env("LD_PRELOAD", &launch_profile.interceptor)
        .env("SPYGLASS_ADDRESS", &launch_profile.listen)
        .spawn()
        .map_err(|source| LaunchError::Spawn { executable: launch_profile.executable.clone(), source })
}

/// Sends the start sentinel once a line is read from `input`.
fn wait_for_start<R: BufRead, W: Write>(mut input: R, mut sender: W) {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => return,
        Ok(_) => {},
    }

    info!("Starting capture");
    let sent = sender.write_all(&START_MID_EXECUTION_CAPTURE.to_le_bytes())
        .and_then(|_| sender.flush());
    if let Err(e) = sent {
        warn!("Could not send the start request: {}", e);
    }
}

fn receive_trace<W: Write>(stream: &mut TcpStream, mut output: W) -> Result<u64, LaunchError> {
    let received = io::copy(stream, &mut output).map_err(LaunchError::Transfer)?;
    output.flush().map_err(LaunchError::Transfer)?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use spyglass_connection::START_MID_EXECUTION_CAPTURE;

    use crate::{receive_trace, wait_for_start};

    #[test]
    fn a_newline_sends_the_start_sentinel() {
        let mut sent = Vec::new();
        wait_for_start(&b"\n"[..], &mut sent);

        assert_eq!(sent, 0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(sent, START_MID_EXECUTION_CAPTURE.to_le_bytes());
    }

    #[test]
    fn closed_input_sends_nothing() {
        let mut sent = Vec::new();
        wait_for_start(&b""[..], &mut sent);

        assert!(sent.is_empty());
    }

    #[test]
    fn the_trace_is_copied_until_the_spy_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let spy = thread::spawn(move || {
            let mut stream = TcpStream::connect(address).unwrap();
            stream.write_all(b"trace bytes").unwrap();
        });

        let (mut stream, _) = listener.accept().unwrap();
        let mut output = Vec::new();
        let received = receive_trace(&mut stream, &mut output).unwrap();
        spy.join().unwrap();

        assert_eq!(received, 11);
        assert_eq!(output, b"trace bytes");

        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
    }
}
