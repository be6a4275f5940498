/*!
ipf-snapcopy - copy network snapshots between IP Fabric servers.

Copies one snapshot (`$last` by default) from a source server to a
destination server, or lets the operator pick several from a table with
`--interactive`.
*/

use clap::Parser;
use snapcopy_core::observability::DEFAULT_LOG_FILE;
use snapcopy_core::snapshot::newest_first;
use snapcopy_core::{
    init_logging, parse_selection, ConfigOverrides, DotenvEnv, IpfClient, LoggingConfig,
    ServerRole, SnapCopyError, SnapshotInfo, SnapshotSource, SnapshotTransfer, TransferConfig,
    TransferReport,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tabled::{Table, Tabled};
use tracing::{error, info, warn};

/// Legacy single-dash spellings and the long options they stand for
const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("-src", "--source"),
    ("-dst", "--destination"),
    ("-auth-src", "--auth-source"),
    ("-auth-dst", "--auth-destination"),
    ("-api-src", "--auth-source"),
    ("-api-dst", "--auth-destination"),
];

#[derive(Parser, Debug)]
#[command(name = "ipf-snapcopy")]
#[command(about = "Copy snapshots between IP Fabric servers")]
#[command(version)]
struct Cli {
    /// Snapshot to copy: an id, `$last`, `$prev` or `$lastLocked`
    #[arg(short, long, value_name = "SNAPSHOT")]
    snapshot: Option<String>,

    /// Source server URL [env: IPF_URL_DOWNLOAD]
    #[arg(long, alias = "src", value_name = "URL")]
    source: Option<String>,

    /// Source credential: an API token or `('user', 'password')` [env: IPF_AUTH_DOWNLOAD]
    #[arg(long, aliases = ["auth-src", "api-source", "api-src"], value_name = "AUTH")]
    auth_source: Option<String>,

    /// Destination server URL [env: IPF_URL_UPLOAD]
    #[arg(long, alias = "dst", value_name = "URL")]
    destination: Option<String>,

    /// Destination credential: an API token or `('user', 'password')` [env: IPF_AUTH_UPLOAD]
    #[arg(long, aliases = ["auth-dst", "api-destination", "api-dst"], value_name = "AUTH")]
    auth_destination: Option<String>,

    /// Keep the downloaded archive after the upload
    #[arg(short, long)]
    keep: bool,

    /// Seconds to wait for the export to become ready [default: 150]
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Seconds between export status checks [default: 5]
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Directory the archive is downloaded to [default: .]
    #[arg(short = 'o', long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Skip TLS certificate verification (also IPF_VERIFY=false)
    #[arg(long)]
    insecure: bool,

    /// Pick snapshots to copy from a table
    #[arg(short, long)]
    interactive: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Console log level or filter directive
    #[arg(long, env = "IPF_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// File the run is logged to
    #[arg(long, value_name = "PATH", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Do not write a log file
    #[arg(long, conflicts_with = "log_file")]
    no_log_file: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            snapshot: self.snapshot.clone(),
            source_url: self.source.clone(),
            source_auth: self.auth_source.clone(),
            destination_url: self.destination.clone(),
            destination_auth: self.auth_destination.clone(),
            keep_archive: self.keep,
            timeout_secs: self.timeout,
            interval_secs: self.interval,
            download_dir: self.download_dir.clone(),
            insecure: self.insecure,
        }
    }

    fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            console_level: if self.verbose {
                "debug".to_string()
            } else {
                self.log_level.clone()
            },
            log_file: (!self.no_log_file).then(|| self.log_file.clone()),
        }
    }
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Snapshot ID")]
    id: String,
    #[tabled(rename = "State")]
    state: String,
}

impl SnapshotRow {
    fn new(index: usize, snapshot: &SnapshotInfo) -> Self {
        let mut state = if snapshot.is_loaded() {
            "loaded".to_string()
        } else {
            snapshot
                .state
                .clone()
                .unwrap_or_else(|| snapshot.status.clone())
        };
        if snapshot.locked {
            state.push_str(", locked");
        }

        Self {
            index,
            name: snapshot.display_name().to_string(),
            date: snapshot
                .taken_at()
                .map(format_timestamp)
                .unwrap_or_else(|| "N/A".to_string()),
            id: snapshot.id.clone(),
            state,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_legacy_flags(std::env::args()));

    if let Err(e) = init_logging(&cli.logging()) {
        eprintln!("Error: {e}");
        return ExitCode::from(e.exit_code() as u8);
    }

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: &Cli) -> Result<(), anyhow::Error> {
    let env = DotenvEnv::discover()?;
    if let Some(path) = env.path() {
        info!(path = %path.display(), "Loaded environment file");
    }
    let config = TransferConfig::resolve(cli.overrides(), &env)?;

    let source = IpfClient::connect(ServerRole::Source, &config.source, config.verify_tls).await?;
    let destination =
        IpfClient::connect(ServerRole::Destination, &config.destination, config.verify_tls)
            .await?;
    let transfer = SnapshotTransfer::new(source, destination, (&config).into());

    if cli.interactive {
        if cli.snapshot.is_some() {
            warn!("--snapshot is ignored in interactive mode");
        }
        copy_interactive(&transfer).await
    } else {
        let report = transfer.copy_reference(&config.snapshot).await?;
        print_report(&report);
        Ok(())
    }
}

async fn copy_interactive(
    transfer: &SnapshotTransfer<IpfClient, IpfClient>,
) -> Result<(), anyhow::Error> {
    let snapshots = transfer.source().list_snapshots().await?;
    let listed = listing_for_selection(&snapshots, transfer.source().server())?;

    let rows: Vec<SnapshotRow> = listed
        .iter()
        .enumerate()
        .map(|(i, snapshot)| SnapshotRow::new(i + 1, snapshot))
        .collect();
    println!("{}", Table::new(rows));

    let stdin = io::stdin();
    let mut input = stdin.lock();

    let selection = prompt(
        &mut input,
        "Enter snapshot numbers to copy (e.g. 1,3,5-7): ",
    )?;
    let selected = select_snapshots(&listed, &selection)?;

    println!("Selected snapshots:");
    for snapshot in &selected {
        println!("  {} ({})", snapshot.display_name(), snapshot.id);
    }
    let answer = prompt(
        &mut input,
        &format!("Copy {} snapshot(s)? (y/N): ", selected.len()),
    )?;
    drop(input);
    if !is_confirmed(&answer) {
        println!("Copy cancelled");
        return Ok(());
    }

    let summary = transfer.copy_many(&selected).await;

    println!();
    println!(
        "Copied {} of {} snapshot(s)",
        summary.succeeded.len(),
        selected.len()
    );
    for report in &summary.succeeded {
        print_report(report);
    }
    for (snapshot, e) in &summary.failed {
        println!("✗ {} ({}): {}", snapshot.display_name(), snapshot.id, e);
    }

    if summary.is_success() {
        info!(count = summary.succeeded.len(), "All selected snapshots copied");
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} of {} snapshot copies failed",
            summary.failed.len(),
            selected.len()
        ))
    }
}

/// Snapshots offered for selection, newest first; an empty listing is an error
fn listing_for_selection(
    snapshots: &[SnapshotInfo],
    server: &str,
) -> Result<Vec<SnapshotInfo>, anyhow::Error> {
    if snapshots.is_empty() {
        return Err(anyhow::anyhow!("No snapshots found on {server}"));
    }
    Ok(newest_first(snapshots).into_iter().cloned().collect())
}

/// Snapshots picked by `selection`; an empty or invalid selection is an error
fn select_snapshots(
    listed: &[SnapshotInfo],
    selection: &str,
) -> Result<Vec<SnapshotInfo>, anyhow::Error> {
    let selected: Vec<SnapshotInfo> = parse_selection(selection, listed.len())
        .into_iter()
        .map(|i| listed[i].clone())
        .collect();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "No valid snapshots selected from '{selection}'"
        ));
    }
    Ok(selected)
}

fn print_report(report: &TransferReport) {
    println!(
        "✓ {} ({}) -> {} [{}]",
        report.name.as_deref().unwrap_or("N/A"),
        report.source_id,
        report.destination_id,
        format_size(report.archive_size)
    );
    if report.archive_kept {
        println!("  Archive kept at {}", report.archive_path.display());
    }
}

fn prompt(input: &mut impl BufRead, message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn is_confirmed(answer: &str) -> bool {
    answer.trim().to_lowercase().starts_with('y')
}

/// Exit code for an error surfaced by `run`
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<SnapCopyError>()
        .map(|e| e.exit_code() as u8)
        .unwrap_or(1)
}

/// Rewrite legacy single-dash options such as `-src` to their long form,
/// including the `-src=value` spelling. Arguments after `--` are untouched.
fn normalize_legacy_flags<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(|arg| {
            if passthrough {
                return arg;
            }
            if arg == "--" {
                passthrough = true;
                return arg;
            }
            let (flag, value) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value)),
                None => (arg.as_str(), None),
            };
            match LEGACY_FLAGS.iter().find(|(legacy, _)| *legacy == flag) {
                Some((_, long)) => match value {
                    Some(value) => format!("{long}={value}"),
                    None => long.to_string(),
                },
                None => arg,
            }
        })
        .collect()
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    timestamp
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn parse(list: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_legacy_flags(args(list))).unwrap()
    }

    #[test]
    fn test_normalize_legacy_flags() {
        let normalized = normalize_legacy_flags(args(&[
            "ipf-snapcopy",
            "-src",
            "https://a",
            "-auth-src=tok",
            "-dst",
            "https://b",
            "-auth-dst",
            "('u', 'p')",
            "-s",
            "$prev",
            "--",
            "-src",
        ]));
        assert_eq!(
            normalized,
            args(&[
                "ipf-snapcopy",
                "--source",
                "https://a",
                "--auth-source=tok",
                "--destination",
                "https://b",
                "--auth-destination",
                "('u', 'p')",
                "-s",
                "$prev",
                "--",
                "-src",
            ])
        );
    }

    #[test]
    fn test_parse_legacy_spellings() {
        let cli = parse(&[
            "ipf-snapcopy",
            "-src",
            "https://source.example",
            "-auth-src",
            "token-a",
            "--dst",
            "https://destination.example",
            "--api-destination",
            "token-b",
        ]);
        assert_eq!(cli.source.as_deref(), Some("https://source.example"));
        assert_eq!(cli.auth_source.as_deref(), Some("token-a"));
        assert_eq!(cli.destination.as_deref(), Some("https://destination.example"));
        assert_eq!(cli.auth_destination.as_deref(), Some("token-b"));
        assert_eq!(cli.snapshot, None);
    }

    #[test]
    fn test_overrides_from_flags() {
        let cli = parse(&[
            "ipf-snapcopy",
            "-s",
            "$lastLocked",
            "-k",
            "-t",
            "600",
            "--interval",
            "10",
            "-o",
            "/tmp/archives",
            "--insecure",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.snapshot.as_deref(), Some("$lastLocked"));
        assert!(overrides.keep_archive);
        assert_eq!(overrides.timeout_secs, Some(600));
        assert_eq!(overrides.interval_secs, Some(10));
        assert_eq!(overrides.download_dir, Some(PathBuf::from("/tmp/archives")));
        assert!(overrides.insecure);
        assert_eq!(overrides.source_url, None);
    }

    #[test]
    fn test_logging_config_from_flags() {
        let cli = parse(&["ipf-snapcopy", "-v", "--log-file", "run.log"]);
        let logging = cli.logging();
        assert_eq!(logging.console_level, "debug");
        assert_eq!(logging.log_file, Some(PathBuf::from("run.log")));

        let cli = parse(&["ipf-snapcopy", "--no-log-file"]);
        assert_eq!(cli.logging().log_file, None);
    }

    #[test]
    fn test_prompt_reads_trimmed_line() {
        let mut input = Cursor::new("  1,3,5-7 \nyes\n");
        assert_eq!(prompt(&mut input, "").unwrap(), "1,3,5-7");
        assert!(is_confirmed(&prompt(&mut input, "").unwrap()));
        assert!(!is_confirmed(&prompt(&mut input, "").unwrap()));
        assert!(!is_confirmed("no"));
        assert!(is_confirmed("Y"));
    }

    #[test]
    fn test_exit_code_from_error() {
        let err: anyhow::Error = SnapCopyError::not_found("ghost", "https://ipf").into();
        assert_eq!(exit_code(&err), 4);
        assert_eq!(exit_code(&anyhow::anyhow!("2 of 3 snapshot copies failed")), 1);
    }

    #[test]
    fn test_snapshot_row() {
        let snapshot = SnapshotInfo::new("abc-123")
            .with_name("weekly")
            .with_end(1_700_000_000_000)
            .locked();
        let row = SnapshotRow::new(2, &snapshot);
        assert_eq!(row.index, 2);
        assert_eq!(row.name, "weekly");
        assert_eq!(row.id, "abc-123");
        assert_eq!(row.state, "loaded, locked");
        assert_ne!(row.date, "N/A");

        let unloaded = SnapshotRow::new(1, &SnapshotInfo::new("x").unloaded());
        assert_eq!(unloaded.state, "unloaded");
        assert_eq!(unloaded.name, "N/A");
        assert_eq!(unloaded.date, "N/A");
    }

    #[test]
    fn test_empty_listing_fails_the_run() {
        let err = listing_for_selection(&[], "https://ipf.example").unwrap_err();
        assert!(err.to_string().contains("No snapshots found on https://ipf.example"));
        assert_eq!(exit_code(&err), 1);

        let snapshots = vec![
            SnapshotInfo::new("older").with_end(1_000),
            SnapshotInfo::new("newer").with_end(2_000),
        ];
        let listed = listing_for_selection(&snapshots, "https://ipf.example").unwrap();
        assert_eq!(listed[0].id, "newer");
    }

    #[test]
    fn test_empty_or_invalid_selection_fails_the_run() {
        let listed = vec![SnapshotInfo::new("a"), SnapshotInfo::new("b")];

        for selection in ["", "abc", "7", "3-9"] {
            let err = select_snapshots(&listed, selection).unwrap_err();
            assert!(err.to_string().starts_with("No valid snapshots selected"));
            assert_eq!(exit_code(&err), 1);
        }

        let selected = select_snapshots(&listed, "2,1").unwrap();
        let ids: Vec<&str> = selected.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
