use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use recipe_source::{read_records, CsvRecordSource, RecordSource, Records, SourceReadError};

#[derive(Parser, Debug)]
#[command(
    name = "recipe-source",
    version,
    about = "Dump a delimited recipe export as JSON lines, one record per row"
)]
struct SourceCli {
    /// Path to the delimited file, or '-' to read stdin
    #[arg(default_value = "-")]
    input: String,

    /// Field delimiter (single ASCII character)
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Only print the number of rows
    #[arg(long, default_value_t = false)]
    count: bool,
}

fn main() {
    let cli = SourceCli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{}: {err}", env!("CARGO_PKG_NAME"));
        process::exit(1);
    }
}

fn run(cli: SourceCli) -> Result<(), String> {
    if !cli.delimiter.is_ascii() {
        return Err(format!("delimiter '{}' must be ASCII", cli.delimiter));
    }
    let delimiter = cli.delimiter as u8;

    if cli.input == "-" {
        let records = read_records(io::stdin(), delimiter).map_err(describe)?;
        return emit(records, cli.count);
    }

    let source = CsvRecordSource::new(PathBuf::from(&cli.input)).with_delimiter(delimiter);
    let records = source.open().map_err(describe)?;
    emit(records, cli.count)
}

fn emit(records: Records<'_>, count_only: bool) -> Result<(), String> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut rows = 0u64;
    let mut malformed = 0u64;
    for item in records {
        rows += 1;
        match item {
            Ok(record) => {
                if count_only {
                    continue;
                }
                serde_json::to_writer(&mut out, &record)
                    .map_err(|err| format!("failed to serialize JSON: {err}"))?;
                out.write_all(b"\n")
                    .map_err(|err| format!("failed to write stdout: {err}"))?;
            }
            Err(err) => {
                malformed += 1;
                eprintln!("skipping {err}");
            }
        }
    }
    if count_only {
        writeln!(out, "{rows}").map_err(|err| format!("failed to write stdout: {err}"))?;
    }
    out.flush()
        .map_err(|err| format!("failed to flush stdout: {err}"))?;
    if malformed > 0 {
        eprintln!("{malformed} of {rows} row(s) were malformed");
    }
    Ok(())
}

fn describe(err: SourceReadError) -> String {
    err.to_string()
}
