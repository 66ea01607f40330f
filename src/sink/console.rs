use chrono::Utc;
use metric;
use sink::Sink;

/// Prints every interval's readouts to stdout.
pub struct Console {
    name: String,
    buffer: Vec<metric::Readout>,
}

/// Configuration for the console sink.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    pub name: String,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> Console {
        Console {
            name: config.name,
            buffer: Vec::new(),
        }
    }
}

/// Print a single stats line.
fn fmt_line(readout: &metric::Readout) {
    if readout.tags.is_empty() {
        println!("    {}({}): {}", readout.name, readout.timestamp, readout.value);
    } else {
        let mut tags = String::new();
        readout.tags.render_into(&mut tags);
        println!(
            "    {}[{}]({}): {}",
            readout.name, tags, readout.timestamp, readout.value
        );
    }
}

impl Sink for Console {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, readout: metric::Readout) {
        self.buffer.push(readout);
    }

    fn flush(&mut self) {
        println!("Flushing metrics: {}", Utc::now().to_rfc3339());
        self.buffer
            .sort_by(|a, b| a.name.cmp(&b.name).then(a.timestamp.cmp(&b.timestamp)));
        for readout in &self.buffer {
            fmt_line(readout);
        }
        self.buffer.clear();
    }
}

#[cfg(test)]
mod test {
    use metric::Readout;
    use sink::{Sink, ConsoleConfig};
    use super::*;

    #[test]
    fn flush_drains_the_buffer() {
        let mut console = Console::new(ConsoleConfig {
            name: "console".to_string(),
        });
        console.deliver(Readout::new("b", 1, 2.0));
        console.deliver(Readout::new("a", 1, 1.0));
        assert_eq!(2, console.buffer.len());
        console.flush();
        assert!(console.buffer.is_empty());
    }
}
