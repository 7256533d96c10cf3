use clap::Parser;

/// voltronic-bridge - poll a Voltronic/PIP inverter and print its telemetry
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read (default: ./inverter.conf, then /etc/inverter/inverter.conf)
    #[clap(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// Log at debug level, including every frame sent and received
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,

    /// Poll one cycle, print the result and exit
    #[clap(short = '1', long = "run-once", conflicts_with = "raw")]
    pub run_once: bool,

    /// Send a single raw command and print the reply
    #[clap(short = 'r', long = "raw")]
    pub raw: Option<String>,

    /// Expected reply length for --raw, in bytes including checksum and CR
    #[clap(
        short = 'l',
        long = "reply-length",
        requires = "raw",
        value_parser = clap::value_parser!(u16).range(4..=1024)
    )]
    pub reply_length: Option<u16>,

    /// Stop continuous polling after this many seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    Continuous { runtime: Option<std::time::Duration> },
    Once,
    Raw { command: String, reply_length: Option<usize> },
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn run_mode(&self) -> RunMode {
        if let Some(command) = &self.raw {
            RunMode::Raw {
                command: command.clone(),
                reply_length: self.reply_length.map(usize::from),
            }
        } else if self.run_once {
            RunMode::Once
        } else {
            RunMode::Continuous {
                runtime: self.runtime.map(std::time::Duration::from_secs),
            }
        }
    }
}
