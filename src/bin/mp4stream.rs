use anyhow::Context;
use clap::{ArgAction, Parser};
use isomp4::{
    BoxHeader, FourCC, KnownBox, Mp4Box, Mp4Parser, ParserHandler, ParserOptions, Registry,
    boxes_moov::STSD, boxes_sample_entry::video_codec, default_registry,
};
use std::fs::File;
use std::io::{self, Read};

#[derive(Parser, Debug)]
#[command(version, about = "Stream an MP4/ISOBMFF file through the incremental box parser")]
struct Args {
    /// MP4/ISOBMFF file path, or '-' for stdin
    path: String,

    /// Bytes handed to the parser per append
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: usize,

    /// Emit the decoded top-level boxes as JSON instead of a tree
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Do not decode any box fields; print headers only
    #[arg(long, action = ArgAction::SetTrue)]
    no_decode: bool,

    /// Do not decode boxes of this type (repeatable)
    #[arg(long = "skip", value_name = "FOURCC")]
    skip: Vec<FourCC>,

    /// Maximum box nesting depth
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Log parser progress to stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let registry = if args.no_decode { Registry::new() } else { default_registry()? };
    let printer = Printer {
        json: args.json,
        skip: args.skip.clone(),
        offset: 0,
        depth: 0,
        top_level: Vec::new(),
    };
    let options = ParserOptions::default().max_depth(args.max_depth);
    let mut parser = Mp4Parser::with_registry(registry, printer).with_options(options);

    let reader: Box<dyn Read> = if args.path == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(File::open(&args.path).with_context(|| format!("opening {}", args.path))?)
    };
    let total = parser
        .feed_reader(reader, args.chunk_size)
        .with_context(|| format!("parsing {}", args.path))?;

    if !parser.is_idle() {
        log::warn!("stream ended inside a box ({} open)", parser.depth());
    }
    log::debug!("{total} bytes read");

    let printer = parser.into_handler();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&printer.top_level)?);
    }
    Ok(())
}

/// Prints a tree line per box as it starts, or collects top-level JSON.
struct Printer {
    json: bool,
    skip: Vec<FourCC>,
    /// Stream offset of the next header.
    offset: u64,
    depth: usize,
    top_level: Vec<serde_json::Value>,
}

impl ParserHandler for Printer {
    fn on_box_started(&mut self, header: &BoxHeader, raw_header: &[u8]) -> bool {
        if !self.json {
            let name = KnownBox::from(header.typ).full_name();
            println!(
                "{}{:>8} {:>10} {} {}",
                "  ".repeat(self.depth),
                format!("{:#x}", self.offset),
                header.size,
                header.typ,
                name
            );
        }
        self.offset += raw_header.len() as u64;
        self.depth += 1;
        !self.skip.contains(&header.typ)
    }

    fn on_box_decoded(&mut self, b: &Mp4Box, raw_fields: &[u8]) -> bool {
        self.offset += raw_fields.len() as u64;
        if !self.json && !raw_fields.is_empty() {
            println!("{}{}", "  ".repeat(self.depth + 1), b.body.to_json());
        }
        true
    }

    fn on_box_data(&mut self, _header: &BoxHeader, data: &[u8]) {
        self.offset += data.len() as u64;
    }

    fn on_box_ended(&mut self, header: &BoxHeader, b: Option<&Mp4Box>) {
        self.depth = self.depth.saturating_sub(1);
        if let Some(stsd) = b.filter(|b| b.box_type() == STSD) {
            match video_codec(stsd) {
                Ok(codec) if !self.json => {
                    println!("{}codec: {codec}", "  ".repeat(self.depth + 1))
                }
                Ok(_) => {}
                Err(e) => log::debug!("no video codec: {e}"),
            }
        }
        if self.depth == 0 && b.is_none() {
            self.top_level.push(serde_json::json!({
                "type": header.typ,
                "size": header.size,
                "header_length": header.header_length(),
            }));
        }
    }

    fn on_top_level_box(&mut self, b: Mp4Box) {
        self.top_level.push(b.to_json());
    }
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
