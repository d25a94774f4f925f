use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use clap_num::maybe_hex;
use log::{info, warn};

use exhume_journal::csv_export::CsvExporter;
use exhume_journal::image::{ImageFormat, ImageReader};
use exhume_journal::{analyze, AnalyzeOptions};

const MAX_SECTOR_SIZE: u64 = 8192;
/// Offsets beyond 1 TiB are almost always operator mistakes.
const MAX_REASONABLE_OFFSET: u64 = 1024 * 1024 * 1024 * 1024;

fn cli() -> Command {
    Command::new("exhume_journal")
        .version(env!("CARGO_PKG_VERSION"))
        .author("ForensicXlab")
        .about("Exhume the JBD/JBD2 journal transactions from an extfs partition into a timeline CSV.")
        .arg(
            Arg::new("image")
                .short('i')
                .long("image")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the image to exhume."),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("Output CSV file path."),
        )
        .arg(
            Arg::new("type")
                .short('t')
                .long("type")
                .value_parser(clap::value_parser!(String))
                .default_value("auto")
                .help("The format of the image, either 'auto', 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-header")
                .long("no-header")
                .action(ArgAction::SetTrue)
                .help("Omit the CSV header row."),
        )
        .arg(
            Arg::new("journal-offset")
                .long("journal-offset")
                .value_parser(maybe_hex::<u64>)
                .help("Manual journal offset in bytes, relative to the partition start."),
        )
        .arg(
            Arg::new("journal-size")
                .long("journal-size")
                .value_parser(maybe_hex::<u64>)
                .help("Manual journal size in bytes."),
        )
        .arg(
            Arg::new("partition-offset")
                .long("partition-offset")
                .value_parser(maybe_hex::<u64>)
                .conflicts_with("partition-offset-bytes")
                .help("Partition offset in sectors (see --sector-size)."),
        )
        .arg(
            Arg::new("partition-offset-bytes")
                .long("partition-offset-bytes")
                .value_parser(maybe_hex::<u64>)
                .help("Partition offset in bytes."),
        )
        .arg(
            Arg::new("sector-size")
                .long("sector-size")
                .value_parser(maybe_hex::<u64>)
                .default_value("512")
                .help("Sector size in bytes [default: 512]."),
        )
        .arg(
            Arg::new("start-seq")
                .long("start-seq")
                .value_parser(maybe_hex::<u32>)
                .help("Skip transactions below this sequence number."),
        )
        .arg(
            Arg::new("end-seq")
                .long("end-seq")
                .value_parser(maybe_hex::<u32>)
                .help("Stop at transactions above this sequence number."),
        )
}

/// Resolve `--partition-offset`/`--partition-offset-bytes` to bytes.
fn partition_offset_bytes(matches: &ArgMatches) -> Result<u64> {
    let sector_size = *matches.get_one::<u64>("sector-size").unwrap();
    if sector_size == 0 || sector_size > MAX_SECTOR_SIZE {
        bail!(
            "invalid sector size {} (must be between 1 and {} bytes)",
            sector_size,
            MAX_SECTOR_SIZE
        );
    }

    let offset = if let Some(sectors) = matches.get_one::<u64>("partition-offset") {
        sectors
            .checked_mul(sector_size)
            .context("partition offset in sectors overflows")?
    } else {
        matches
            .get_one::<u64>("partition-offset-bytes")
            .copied()
            .unwrap_or(0)
    };

    if offset > MAX_REASONABLE_OFFSET {
        warn!(
            "Partition offset ({} bytes) is unusually large, this may cause issues",
            offset
        );
    }
    Ok(offset)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let image_path = matches.get_one::<String>("image").unwrap();
    let output_path = matches.get_one::<String>("output").unwrap();
    let type_str = matches.get_one::<String>("type").unwrap();
    let verbose = matches.get_flag("verbose");
    let no_header = matches.get_flag("no-header");

    let format = ImageFormat::parse(type_str)
        .with_context(|| format!("invalid image type '{}' (must be auto, raw or ewf)", type_str))?;
    let partition_offset = partition_offset_bytes(matches)?;

    let mut reader = ImageReader::open(image_path, format)
        .with_context(|| format!("failed to open image '{}'", image_path))?;
    if partition_offset > 0 {
        reader.set_partition_offset(partition_offset as i64);
        info!("Applied partition offset: {} bytes", partition_offset);
    }

    let options = AnalyzeOptions {
        journal_offset: matches.get_one::<u64>("journal-offset").copied(),
        journal_size: matches.get_one::<u64>("journal-size").copied(),
        start_seq: matches.get_one::<u32>("start-seq").copied(),
        end_seq: matches.get_one::<u32>("end-seq").copied(),
    };

    let report = analyze(&mut reader, &options)?;
    CsvExporter::export(&report.records, output_path, !no_header)?;

    if verbose {
        report.summary.to_table().printstd();
    }
    info!(
        "Analysis complete ({} records, mode {}), output written to {}",
        report.records.len(),
        report.summary.journal_mode.as_str(),
        output_path
    );
    Ok(())
}

fn main() {
    let matches = cli().get_matches();
    let default_level = if matches.get_flag("verbose") {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(&matches) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_for(args: Vec<&'static str>) -> ArgMatches {
        cli().try_get_matches_from(args).unwrap()
    }

    const BASE: [&str; 5] = ["exhume_journal", "-i", "disk.dd", "-o", "out.csv"];

    fn with_args(extra: &[&'static str]) -> Vec<&'static str> {
        BASE.iter().chain(extra.iter()).copied().collect()
    }

    #[test]
    fn required_arguments_are_enforced() {
        assert!(cli()
            .try_get_matches_from(["exhume_journal", "-i", "disk.dd"])
            .is_err());
        assert!(cli()
            .try_get_matches_from(["exhume_journal", "-o", "out.csv"])
            .is_err());
    }

    #[test]
    fn partition_offset_flags_are_mutually_exclusive() {
        let result = cli().try_get_matches_from(with_args(&[
            "--partition-offset",
            "2048",
            "--partition-offset-bytes",
            "1048576",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn sectors_and_bytes_forms_agree() {
        let sectors = matches_for(with_args(&[
            "--partition-offset",
            "227328",
            "--sector-size",
            "512",
        ]));
        let bytes = matches_for(with_args(&["--partition-offset-bytes", "116391936"]));
        assert_eq!(
            partition_offset_bytes(&sectors).unwrap(),
            partition_offset_bytes(&bytes).unwrap()
        );
        assert_eq!(partition_offset_bytes(&bytes).unwrap(), 116_391_936);
    }

    #[test]
    fn zero_partition_offset_is_default() {
        let matches = matches_for(with_args(&[]));
        assert_eq!(partition_offset_bytes(&matches).unwrap(), 0);
        let explicit = matches_for(with_args(&["--partition-offset", "0"]));
        assert_eq!(partition_offset_bytes(&explicit).unwrap(), 0);
    }

    #[test]
    fn sector_size_bounds() {
        let too_big = matches_for(with_args(&[
            "--partition-offset",
            "1",
            "--sector-size",
            "16384",
        ]));
        assert!(partition_offset_bytes(&too_big).is_err());

        let zero = matches_for(with_args(&["--sector-size", "0"]));
        assert!(partition_offset_bytes(&zero).is_err());
    }

    #[test]
    fn hex_offsets_are_accepted() {
        let matches = matches_for(with_args(&["--journal-offset", "0x100000"]));
        assert_eq!(
            matches.get_one::<u64>("journal-offset").copied(),
            Some(0x100000)
        );
    }

    #[test]
    fn image_type_values() {
        assert!(ImageFormat::parse("auto").is_some());
        assert!(ImageFormat::parse("raw").is_some());
        assert!(ImageFormat::parse("ewf").is_some());
        assert!(ImageFormat::parse("vmdk").is_none());
    }
}
