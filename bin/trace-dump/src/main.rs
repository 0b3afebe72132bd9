use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::env;
use std::io::BufReader;

use indicatif::ProgressBar;
use spyglass_encoder::{Message, Record, TraceReader};
use spyglass_observer::ApiIndex;

#[derive(Debug, Default)]
struct Summary {
    records: u64,
    kinds: BTreeMap<&'static str, u64>,
    commands: BTreeMap<&'static str, u64>,
    threads: BTreeMap<u64, u64>,
    observed_bytes: u64,
    resource_bytes: u64,
    resources: u64,
}

impl Summary {
    fn add(&mut self, record: &Record) {
        self.records += 1;
        *self.kinds.entry(record.message.kind()).or_default() += 1;

        match &record.message {
            Message::Command(command) => {
                *self.commands.entry(ApiIndex(command.api).name()).or_default() += 1;
                *self.threads.entry(command.thread).or_default() += 1;
            },
            Message::Observation(observation) => self.observed_bytes += observation.size,
            Message::Resource(resource) => {
                self.resources += 1;
                self.resource_bytes += resource.data.len() as u64;
            },
            _ => {},
        }
    }

    /// Observed bytes per byte actually stored.
    fn dedup_ratio(&self) -> f64 {
        if self.resource_bytes == 0 {
            return 1.0;
        }
        self.observed_bytes as f64 / self.resource_bytes as f64
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} records", self.records)?;
        for (kind, count) in &self.kinds {
            writeln!(f, "  {:<14} {}", kind, count)?;
        }

        writeln!(f, "commands by api")?;
        for (api, count) in &self.commands {
            writeln!(f, "  {:<14} {}", api, count)?;
        }
        writeln!(f, "{} threads issued commands", self.threads.len())?;

        writeln!(
            f,
            "{} bytes observed, {} bytes in {} resources, dedup ratio {:.2}",
            self.observed_bytes, self.resource_bytes, self.resources, self.dedup_ratio()
        )
    }
}

fn main() {
    let args = env::args().collect::<Vec<String>>();

    if args.len() != 2 {
        println!("Your invocation of this utility was incorrect.");
        println!("$ ./trace-dump <trace file path>");
        return;
    }

    let path = &args[1];
    let file_handle = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Could not open {}: {}", path, e);
            std::process::exit(1);
        },
    };

    let length = file_handle.metadata().map(|m| m.len()).unwrap_or(0);
    let bar = ProgressBar::new(length);
    let mut reader = TraceReader::new(bar.wrap_read(BufReader::new(file_handle)));
    let mut summary = Summary::default();

    loop {
        match reader.read_record() {
            Ok(Some(record)) => summary.add(&record),
            Ok(None) => break,
            Err(e) => {
                bar.println(format!("Trace cut short at byte {}: {}", reader.offset(), e));
                break;
            },
        }
    }
    bar.finish_and_clear();

    print!("{}", summary);
}

#[cfg(test)]
mod tests {
    use spyglass_encoder::{Command, Message, Observation, Record, Resource, ResourceRef};

    use crate::Summary;

    fn record(message: Message) -> Record {
        Record { id: 1, parent: None, group: false, message }
    }

    fn command(api: u8, thread: u64) -> Record {
        record(Message::Command(Command { api, name: "glDrawArrays".to_string(), thread, args: Vec::new() }))
    }

    fn observation(size: u64, resource: i64) -> Record {
        record(Message::Observation(Observation { pool: 0, base: 0x1000, size, resource: ResourceRef(resource) }))
    }

    #[test]
    fn commands_are_counted_per_api_and_thread() {
        let mut summary = Summary::default();
        for record in [command(0, 1), command(0, 2), command(1, 1)] {
            summary.add(&record);
        }

        assert_eq!(summary.records, 3);
        assert_eq!(summary.kinds["command"], 3);
        assert_eq!(summary.commands["gles"], 2);
        assert_eq!(summary.commands["vulkan"], 1);
        assert_eq!(summary.threads.len(), 2);
    }

    #[test]
    fn repeated_observations_raise_the_dedup_ratio() {
        let mut summary = Summary::default();
        summary.add(&record(Message::Resource(Resource { id: 1, hash: [0; 32], data: vec![7; 64] })));
        summary.add(&observation(64, 1));
        summary.add(&observation(64, -1));
        summary.add(&observation(64, -1));

        assert_eq!(summary.resource_bytes, 64);
        assert_eq!(summary.observed_bytes, 192);
        assert_eq!(summary.dedup_ratio(), 3.0);
        assert!(summary.to_string().contains("dedup ratio 3.00"));
    }

    #[test]
    fn an_empty_trace_has_no_dedup() {
        assert_eq!(Summary::default().dedup_ratio(), 1.0);
    }
}
