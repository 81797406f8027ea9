//! DocVault — encrypted document file store with background OCR.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod state;

use commands::ImportOptions;
use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("DOCVAULT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

fn print_usage() {
    println!("DocVault — encrypted document file store");
    println!();
    println!("Usage: docvault <command> [args]");
    println!();
    println!("Commands:");
    println!("  add-user <username> [quota-bytes]              Create a user");
    println!("  import <username> <file> [options]             Store a file");
    println!("  import-zip <username> <zip> [options]          Store one child archive per group");
    println!("  list <username> [--document <id>]              List files (orphans without --document)");
    println!("  delete <username> <file-id>                    Delete a file");
    println!("  cat <username> <file-id>                       Write decrypted content to stdout");
    println!("  ocr <image> <language>                         Print recognized text");
    println!("  help                                           Show this help message");
    println!();
    println!("Import options:");
    println!("  --document <id>     Attach to a document");
    println!("  --language <lang>   OCR language for images");
    println!();
    println!("Zip files passed to 'import' whose name matches");
    println!("DOCVAULT_AUTO_SEPARATE_ZIP_REGEX are imported as with 'import-zip'.");
}

/// Value following `flag`, if present.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Positional argument `index` (0-based, after the command), or exit with usage.
fn positional(args: &[String], index: usize, what: &str) -> String {
    let mut values = Vec::new();
    let mut i = 2;
    while i < args.len() {
        if args[i].starts_with("--") {
            i += 2;
            continue;
        }
        values.push(args[i].clone());
        i += 1;
    }
    match values.into_iter().nth(index) {
        Some(v) => v,
        None => {
            eprintln!("Missing {}. Use 'docvault help' for usage.", what);
            std::process::exit(1);
        }
    }
}

fn import_options(args: &[String]) -> ImportOptions {
    ImportOptions {
        document_id: flag_value(args, "--document"),
        language: flag_value(args, "--language"),
    }
}

fn import_zip(state: &AppState, username: &str, path: &Path, args: &[String]) -> anyhow::Result<()> {
    let import = commands::import_zip(state, username, path, &import_options(args))?;
    println!("{}", serde_json::to_string_pretty(&import.files)?);
    match import.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn run(state: &AppState, args: &[String]) -> anyhow::Result<()> {
    match args[1].as_str() {
        "add-user" => {
            let username = positional(args, 0, "username");
            let quota = match args.get(3).filter(|a| !a.starts_with("--")) {
                Some(q) => Some(q.parse::<u64>().map_err(|e| anyhow::anyhow!("Invalid quota {}: {}", q, e))?),
                None => None,
            };
            let user = commands::add_user(state, &username, quota)?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        "import" => {
            let username = positional(args, 0, "username");
            let path = PathBuf::from(positional(args, 1, "file"));
            if commands::auto_separates(state, &path)? {
                info!("{} matches the auto-separate pattern", path.display());
                return import_zip(state, &username, &path, args);
            }
            let id = commands::import_file(state, &username, &path, &import_options(args))?;
            println!("{}", id);
        }
        "import-zip" => {
            let username = positional(args, 0, "username");
            let path = PathBuf::from(positional(args, 1, "zip file"));
            import_zip(state, &username, &path, args)?;
        }
        "list" => {
            let username = positional(args, 0, "username");
            let document = flag_value(args, "--document");
            let files = commands::list(state, &username, document.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&files)?);
        }
        "delete" => {
            let username = positional(args, 0, "username");
            let file_id = positional(args, 1, "file id");
            commands::delete(state, &username, &file_id)?;
        }
        "cat" => {
            let username = positional(args, 0, "username");
            let file_id = positional(args, 1, "file id");
            let stdout = std::io::stdout();
            commands::cat(state, &username, &file_id, &mut stdout.lock())?;
        }
        "ocr" => {
            let image = PathBuf::from(positional(args, 0, "image"));
            let language = positional(args, 1, "language");
            let text = commands::ocr(state, &image, &language).await?;
            print!("{}", text);
        }
        other => {
            eprintln!("Unknown command: {}. Use 'docvault help' for usage.", other);
            std::process::exit(1);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `cat` and `ocr` output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || matches!(args[1].as_str(), "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = docvault_core::VaultConfig::from_env(&data_dir)?;
    let state = AppState::open(config)?;

    let worker = state
        .take_events_rx()
        .map(|rx| docvault_ingest::start_processing_worker(Arc::new(state.processing_worker()), rx));

    let result = run(&state, &args).await;

    // Closing the queue lets the worker finish what was published, then stop.
    let registry = state.files.registry().clone();
    drop(state);
    if let Some(worker) = worker {
        if !registry.is_empty() {
            info!("Waiting for {} files to finish processing", registry.len());
        }
        worker.await?;
    }

    if let Err(e) = result {
        if let Some(err) = e.downcast_ref::<docvault_core::Error>() {
            if err.is_precondition() {
                eprintln!("Rejected: {}", err);
                std::process::exit(2);
            }
        }
        return Err(e);
    }
    Ok(())
}
