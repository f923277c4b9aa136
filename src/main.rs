use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

use widesight::config::Config;
use widesight::db::{Panorama, SqliteStore};
use widesight::discovery::discover_images;
use widesight::geo::{geometry_to_wkt, track_length_m};
use widesight::metadata::ExifDecoder;
use widesight::{logging, Engine};

enum Command {
    CreateSequence { date: NaiveDate, note: Option<String> },
    Ingest { sequence_id: i64, inputs: Vec<PathBuf> },
    SetHeading { panorama_id: i64, heading: f64 },
    Delete { panorama_id: i64 },
    Resync { sequence_id: i64 },
    Show { sequence_id: i64 },
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("widesight {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path argument");
                };
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let Some((name, rest)) = positional.split_first() else {
        print_help();
        std::process::exit(1);
    };

    let command = match (name.as_str(), rest) {
        ("create-sequence", [date]) => Command::CreateSequence {
            date: parse_date(date)?,
            note: None,
        },
        ("create-sequence", [date, note]) => Command::CreateSequence {
            date: parse_date(date)?,
            note: Some(note.clone()),
        },
        ("ingest", [sequence, inputs @ ..]) if !inputs.is_empty() => Command::Ingest {
            sequence_id: parse_id(sequence)?,
            inputs: inputs.iter().map(PathBuf::from).collect(),
        },
        ("set-heading", [panorama, heading]) => Command::SetHeading {
            panorama_id: parse_id(panorama)?,
            heading: heading
                .parse()
                .with_context(|| format!("Invalid heading: {}", heading))?,
        },
        ("delete", [panorama]) => Command::Delete {
            panorama_id: parse_id(panorama)?,
        },
        ("resync", [sequence]) => Command::Resync {
            sequence_id: parse_id(sequence)?,
        },
        ("show", [sequence]) => Command::Show {
            sequence_id: parse_id(sequence)?,
        },
        _ => {
            eprintln!("Unknown or incomplete command: {}", positional.join(" "));
            print_help();
            std::process::exit(1);
        }
    };

    Ok(Args {
        config_path,
        command,
    })
}

fn parse_id(value: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("Invalid id: {}", value))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date (expected YYYY-MM-DD): {}", value))
}

fn print_help() {
    println!(
        r#"widesight - geotagged panorama ingestion

USAGE:
    widesight [OPTIONS] <COMMAND>

COMMANDS:
    create-sequence <YYYY-MM-DD> [NOTE]   Create an empty sequence
    ingest <SEQUENCE> <PATH>...           Ingest images or directories into a sequence
    set-heading <PANORAMA> <DEGREES>      Edit a panorama's heading
    delete <PANORAMA>                     Delete a panorama
    resync <SEQUENCE>                     Rebuild a sequence's geometry
    show <SEQUENCE>                       Print a sequence and its panoramas

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    WIDESIGHT_CONFIG    Path to config file (overrides default location)
    WIDESIGHT_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/widesight/config.toml"#
    );
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    if let Err(e) = logging::init(config.log_dir.clone()) {
        eprintln!("widesight: logging disabled: {:#}", e);
    }

    let store = SqliteStore::open(&config.db_path)?;
    store.initialize()?;
    let decoder = ExifDecoder::with_gps_aliases(config.ingest.gps_tag_aliases.clone());
    let engine = Engine::new(store, decoder, config.ingest.clone());

    match args.command {
        Command::CreateSequence { date, note } => {
            let id = engine.create_sequence(date, note.as_deref())?;
            println!("{}", id);
        }
        Command::Ingest {
            sequence_id,
            inputs,
        } => {
            if engine.load_sequence(sequence_id)?.is_none() {
                bail!("Sequence {} not found", sequence_id);
            }
            let images = discover_images(&inputs, &config.ingest.image_extensions)?;
            for path in &images {
                let data = std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let saved = engine.save_panorama_changes(Panorama::new(sequence_id), Some(&data))?;
                println!(
                    "{}\t{}\t{}",
                    saved.id.unwrap_or_default(),
                    path.display(),
                    saved
                        .utm_zone_code
                        .as_deref()
                        .unwrap_or("no position")
                );
            }
        }
        Command::SetHeading {
            panorama_id,
            heading,
        } => {
            let mut pano = engine
                .load_panorama(panorama_id)?
                .with_context(|| format!("Panorama {} not found", panorama_id))?;
            pano.heading = Some(heading);
            engine.save_panorama_changes(pano, None)?;
        }
        Command::Delete { panorama_id } => {
            if !engine.delete_panorama(panorama_id)? {
                bail!("Panorama {} not found", panorama_id);
            }
        }
        Command::Resync { sequence_id } => {
            let geometry = engine.resync_sequence(sequence_id)?;
            println!("{}", geometry_to_wkt(&geometry));
        }
        Command::Show { sequence_id } => {
            let sequence = engine
                .load_sequence(sequence_id)?
                .with_context(|| format!("Sequence {} not found", sequence_id))?;
            println!(
                "sequence {} ({}) {}",
                sequence.id,
                sequence.shooting_date,
                sequence.note.as_deref().unwrap_or("")
            );
            println!("{}", geometry_to_wkt(&sequence.geometry));
            println!(
                "{} points, {:.1} m",
                sequence.geometry.0.len(),
                track_length_m(&sequence.geometry)
            );
            for pano in engine.list_panoramas(sequence_id)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    pano.id.unwrap_or_default(),
                    pano.capture_time
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    pano.utm_zone_code.as_deref().unwrap_or("-"),
                    pano.utm_srid
                        .map(|s| format!("EPSG:{}", s))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
    }

    Ok(())
}
