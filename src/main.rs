use clap::{Arg, ArgAction, ArgMatches, Command};
use std::io::BufRead;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use spyglass::core::config::{parse_duration, Config};
use spyglass::core::ids::{IdRange, IdSet};
use spyglass::data::slice::TableSlice;
use spyglass::data::types::qualified_fields;
use spyglass::data::value::Value;
use spyglass::engine::{exit_code, Engine};
use spyglass::{Error, ErrorKind, Result};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let matches = command().get_matches();
    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::from(exit_code(&err) as u8)
        }
    }
}

fn command() -> Command {
    Command::new("spyglass")
        .about("Telemetry storage and query engine")
        .subcommand_required(true)
        .arg(
            Arg::new("db-directory")
                .long("db-directory")
                .short('d')
                .value_name("PATH")
                .global(true)
                .help("Database directory"),
        )
        .arg(opt("max-partition-size", "Target events per shard (power of two)"))
        .arg(opt("max-resident-partitions", "Cap on concurrently in-memory shards"))
        .arg(opt("max-taste-partitions", "Size of the first evaluation wave"))
        .arg(opt("max-queries", "Concurrency cap on active queries"))
        .arg(opt("meta-index-fp-rate", "Bloom synopsis false-positive rate"))
        .arg(opt("max-segment-size", "Segment roll-over threshold in bytes"))
        .arg(opt("segments-cached", "Decoded segments kept in memory"))
        .arg(opt("shutdown-grace-period", "Grace period before actors are killed"))
        .subcommand(Command::new("start").about("Launch the engine"))
        .subcommand(
            Command::new("count")
                .about("Return the number of matches")
                .arg(Arg::new("expr").required(true)),
        )
        .subcommand(
            Command::new("export")
                .about("Stream matches in the chosen format")
                .arg(Arg::new("format").required(true).value_parser(["json", "ascii"]))
                .arg(Arg::new("expr").required(true)),
        )
        .subcommand(
            Command::new("get")
                .about("Retrieve events by literal id")
                .arg(Arg::new("id").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("status")
                .about("Emit a JSON status document")
                .arg(
                    Arg::new("detailed")
                        .long("detailed")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn opt(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("VALUE")
        .global(true)
        .help(help)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config = build_config(matches)?;
    match matches.subcommand() {
        Some(("start", _)) => start(config),
        Some(("count", sub)) => {
            let engine = Engine::open(config)?;
            let expr = sub.get_one::<String>("expr").unwrap();
            let result = engine.count(expr);
            engine.shutdown()?;
            println!("{}", result?);
            Ok(())
        }
        Some(("export", sub)) => {
            let engine = Engine::open(config)?;
            let format = sub.get_one::<String>("format").unwrap().clone();
            let expr = sub.get_one::<String>("expr").unwrap();
            let result = engine
                .query(expr, None)
                .and_then(|handle| handle.collect())
                .map(|slices| print_slices(&slices, &format));
            engine.shutdown()?;
            result
        }
        Some(("get", sub)) => {
            let engine = Engine::open(config)?;
            let mut ids = IdSet::new();
            for raw in sub.get_many::<String>("id").unwrap() {
                let id: u64 = raw.parse().map_err(|_| {
                    Error::new(ErrorKind::Parse, format!("invalid event id {:?}", raw))
                })?;
                ids.insert(IdRange::new(id, id + 1));
            }
            let result = engine.get(ids).map(|slices| print_slices(&slices, "json"));
            engine.shutdown()?;
            result
        }
        Some(("status", sub)) => {
            let engine = Engine::open(config)?;
            let result = engine.status(sub.get_flag("detailed"));
            engine.shutdown()?;
            println!("{}", serde_json::to_string_pretty(&result?).unwrap_or_default());
            Ok(())
        }
        _ => unreachable!("subcommand required"),
    }
}

/// Runs the engine in the foreground until stdin closes.
fn start(config: Config) -> Result<()> {
    let engine = Engine::open(config)?;
    println!("{}", engine.config().db_directory.display());
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if line.is_err() {
            break;
        }
    }
    engine.shutdown()
}

fn build_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = Config::default();
    let invalid = |name: &str, value: &str| {
        Error::new(
            ErrorKind::InvalidConfiguration,
            format!("invalid value {:?} for {}", value, name),
        )
    };
    if let Some(dir) = matches.get_one::<String>("db-directory") {
        config.db_directory = dir.into();
    }
    macro_rules! numeric {
        ($name:literal, $field:ident) => {
            if let Some(raw) = matches.get_one::<String>($name) {
                config.$field = raw.parse().map_err(|_| invalid($name, raw))?;
            }
        };
    }
    numeric!("max-partition-size", max_partition_size);
    numeric!("max-resident-partitions", max_resident_partitions);
    numeric!("max-taste-partitions", max_taste_partitions);
    numeric!("max-queries", max_queries);
    numeric!("meta-index-fp-rate", meta_index_fp_rate);
    numeric!("max-segment-size", max_segment_size);
    numeric!("segments-cached", segments_cached);
    if let Some(raw) = matches.get_one::<String>("shutdown-grace-period") {
        config.shutdown_grace_period = parse_duration(raw)
            .map_err(|_| invalid("shutdown-grace-period", raw))?;
    }
    config.validate()?;
    Ok(config)
}

fn print_slices(slices: &[TableSlice], format: &str) {
    for slice in slices {
        let fields = qualified_fields(&slice.layout);
        for (i, row) in slice.rows.iter().enumerate() {
            match format {
                "json" => {
                    let object: serde_json::Map<String, serde_json::Value> = fields
                        .iter()
                        .zip(row)
                        .map(|(field, value)| (field.field.clone(), value_to_json(value)))
                        .collect();
                    let mut document = serde_json::Map::new();
                    document.insert("id".into(), (slice.offset + i as u64).into());
                    document.insert(
                        "type".into(),
                        slice.layout.name().unwrap_or_default().into(),
                    );
                    document.insert("event".into(), object.into());
                    println!("{}", serde_json::Value::Object(document));
                }
                _ => {
                    let rendered: Vec<String> = row.iter().map(Value::to_string).collect();
                    println!(
                        "{} {} [{}]",
                        slice.offset + i as u64,
                        slice.layout.name().unwrap_or_default(),
                        rendered.join(", ")
                    );
                }
            }
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(x) => (*x).into(),
        Value::Integer(x) => (*x).into(),
        Value::Count(x) => (*x).into(),
        Value::Real(x) => serde_json::json!(x),
        Value::String(s) | Value::Enum(s) => s.clone().into(),
        Value::Time(t) => t.to_rfc3339().into(),
        Value::List(xs) => xs.iter().map(value_to_json).collect(),
        Value::Map(entries) => entries
            .iter()
            .map(|(k, v)| (k.to_string(), value_to_json(v)))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into(),
        other => other.to_string().into(),
    }
}
