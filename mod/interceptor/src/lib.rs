use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::OnceLock;

use log::{error, info};
use retour::RawDetour;

use spyglass::connection::ConnectionStream;
use spyglass::{logging, Spy};

mod driver;
mod detours;
mod error;
mod settings;

use driver::{GlProcs, Libraries, RealGl};
use error::InterceptError;
use settings::{Address, Settings};

static PROCS: OnceLock<GlProcs> = OnceLock::new();
static DETOURS: OnceLock<Vec<(&'static str, RawDetour)>> = OnceLock::new();

fn procs() -> &'static GlProcs {
    match PROCS.get() {
        Some(procs) => procs,
        // Detours are enabled only after the table is stored.
        None => unreachable!("GL detour ran before the entry point table was loaded"),
    }
}

#[cfg_attr(not(test), spyglass::dll::entrypoint)]
pub fn entry() -> bool {
    let settings = Settings::from_env();
    if let Err(e) = logging::init(&settings.log_file, settings.log_level) {
        eprintln!("spyglass: {}", e);
    }

    match start(&settings) {
        Ok(()) => true,
        Err(e) => {
            error!("Spyglass not started: {}", e);
            false
        },
    }
}

fn start(settings: &Settings) -> Result<(), InterceptError> {
    let mut gl = GlProcs::load(&Libraries::open(settings)?)?;
    let detours = detours::create(&mut gl)?;
    let gl = PROCS.get_or_init(|| gl);

    let connection = dial(&settings.address)?;
    let spy = spyglass::install(
        Spy::builder()
            .connection(connection)
            .gles_driver(Box::new(RealGl::new(gl))),
    );

    for (symbol, detour) in &detours {
        unsafe { detour.enable() }.map_err(|source| InterceptError::Hook { symbol: *symbol, source })?;
    }
    info!("{} GL entry points detoured, capture state {:?}", detours.len(), spy.core().state());
    let _ = DETOURS.set(detours);

    unsafe { libc::atexit(shutdown) };
    Ok(())
}

fn dial(address: &Address) -> Result<Box<dyn ConnectionStream>, InterceptError> {
    let connection: Result<Box<dyn ConnectionStream>, _> = match address {
        Address::Tcp(address) => TcpStream::connect(address).map(|s| Box::new(s) as Box<dyn ConnectionStream>),
        Address::Unix(path) => UnixStream::connect(path).map(|s| Box::new(s) as Box<dyn ConnectionStream>),
    };

    connection.map_err(|source| InterceptError::Connect { address: format!("{:?}", address), source })
}

extern "C" fn shutdown() {
    if let Some(spy) = spyglass::get() {
        spy.shutdown();
    }
}
