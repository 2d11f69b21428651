use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Duration, Local};
use symstore_pdb::IdentityError;
use symstore_store::{build_files_list, FileDetail, OpStatus, Store, StoreError, Summary};
use symstore_types::{TransactionId, TransactionType};
use tracing::{debug, error, info, warn};

use crate::cli::*;
use crate::config::{Settings, SymstoreConfig};
use crate::output;

/// How a command's summary is printed and which outcomes count as failures.
#[derive(Clone, Copy, Debug)]
enum Report {
    Add,
    Delete,
    Promote,
    Query { full_path: bool },
    Fetch { full_path: bool },
    Unused,
}

/// Run the parsed command line and print its summary.
///
/// Returns the number of failures the summary reports; the caller turns a
/// non-zero count into the exit status.
pub fn run_command(cli: Cli) -> anyhow::Result<usize> {
    let config = SymstoreConfig::load(&cli.config)?;
    let settings = config.resolve(cli.config_id.as_deref())?;
    let (summary, report) = match cli.command {
        Command::Add(args) => (cmd_add(&settings, args)?, Report::Add),
        Command::Del(args) => (cmd_del(&settings, args)?, Report::Delete),
        Command::Query(args) => {
            let full_path = args.full_path;
            (cmd_query(&settings, args)?, Report::Query { full_path })
        }
        Command::Fetch(args) => {
            let full_path = args.full_path;
            (cmd_fetch(&settings, args)?, Report::Fetch { full_path })
        }
        Command::Clean(args) => (cmd_clean(&settings, args)?, Report::Delete),
        Command::Promote(args) => (cmd_promote(&settings, args)?, Report::Promote),
        Command::Unused(args) => (cmd_unused(&settings, args)?, Report::Unused),
    };
    print_summary(cli.format, &summary, report)
}

fn print_summary(format: OutputFormat, summary: &Summary, report: Report) -> anyhow::Result<usize> {
    let text = match format {
        OutputFormat::Json => output::render_json(summary)?,
        OutputFormat::Text => match report {
            Report::Add => output::add_text(summary),
            Report::Delete => output::delete_text(summary),
            Report::Promote => output::promote_text(summary),
            Report::Query { full_path } | Report::Fetch { full_path } => {
                output::lookup_text(summary, full_path)
            }
            Report::Unused => output::unused_text(summary),
        },
    };
    if !text.is_empty() {
        println!("{text}");
    }
    Ok(match report {
        Report::Query { .. } => summary.failed(true) + summary.skipped(true),
        _ => summary.failed(true),
    })
}

fn store_dir(settings: &Settings, explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    settings
        .store_dir(explicit)
        .context("no symbol store directory given")
}

/// An empty `--comment` means no comment was given.
fn given_comment(comment: &Option<String>) -> Option<&str> {
    comment.as_deref().filter(|c| !c.is_empty())
}

fn product_and_version(settings: &Settings, args: ProductArgs) -> anyhow::Result<(String, String)> {
    let product = args
        .product
        .or_else(|| settings.product.clone())
        .context("no product name given")?;
    let version = args
        .version
        .or_else(|| settings.version.clone())
        .context("no product version given")?;
    Ok((product, version))
}

/// Errors that describe one batch item rather than the store itself.
fn is_item_error(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Identity(_)
            | StoreError::TransactionNotFound(_)
            | StoreError::ImproperTransactionType { .. }
    )
}

pub(crate) fn cmd_add(settings: &Settings, args: AddArgs) -> anyhow::Result<Summary> {
    let root = store_dir(settings, args.store.store_dir)?;
    let (product, version) = product_and_version(settings, args.product)?;
    let compress = args.compress || settings.compress.unwrap_or(false);
    let keep = args.keep.or(settings.keep).unwrap_or(0);

    let mut store = Store::open(&root);
    if compress && !store.supports_compression() {
        return Err(StoreError::CompressionNotSupported.into());
    }
    let files = build_files_list(&args.files, args.recursive, false)?;
    let mut transaction = store.new_transaction(&product, &version, args.comment.unwrap_or_default());

    let mut registered = 0;
    let mut rejected = Vec::new();
    for file in &files {
        match transaction.register_entry(file, compress) {
            Ok(true) => registered += 1,
            Ok(false) => debug!(path = %file.display(), "no identity key, ignored"),
            Err(StoreError::Identity(e @ IdentityError::UnknownFileType(_))) => {
                warn!(path = %file.display(), "not a known file type");
                rejected.push((file, e.to_string()));
            }
            Err(e) if is_item_error(&e) => {
                error!(path = %file.display(), error = %e, "cannot register file");
                rejected.push((file, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut summary = if registered > 0 {
        store.commit(&mut transaction, args.force, None)?
    } else {
        Summary::new(None, OpStatus::Skipped, Some(TransactionType::Add))
    };
    for (file, message) in rejected {
        summary.add_file(file.display().to_string(), OpStatus::Failed, Some(message));
    }
    if keep > 0 && summary.status() == OpStatus::Success {
        let cleaned = store.remove_old_versions(&product, &version, keep, None, false)?;
        summary.append(cleaned);
    }
    Ok(summary)
}

pub(crate) fn cmd_del(settings: &Settings, args: DelArgs) -> anyhow::Result<Summary> {
    let mut store = Store::open(store_dir(settings, args.store.store_dir)?);
    let mut chain: Option<Summary> = None;
    for id in args.ids {
        let summary = match store.delete_transaction(id, false) {
            Ok(summary) => summary,
            Err(e) if is_item_error(&e) => {
                error!(id = %id, error = %e, "cannot delete transaction");
                Summary::with_message(Some(id), OpStatus::Failed, Some(TransactionType::Del), e.to_string())
            }
            Err(e) => return Err(e.into()),
        };
        push(&mut chain, summary);
    }
    Ok(chain.unwrap_or_else(|| Summary::new(None, OpStatus::Skipped, Some(TransactionType::Del))))
}

fn push(chain: &mut Option<Summary>, summary: Summary) {
    match chain {
        Some(head) => head.append(summary),
        None => *chain = Some(summary),
    }
}

pub(crate) fn cmd_query(settings: &Settings, args: QueryArgs) -> anyhow::Result<Summary> {
    let mut store = Store::open(store_dir(settings, args.store.store_dir)?);
    let files = build_files_list(&args.files, args.recursive, false)?;
    let mut summary = Summary::new(None, OpStatus::Success, Some(TransactionType::Query));

    for file in &files {
        let label = file.display().to_string();
        if !file.exists() {
            summary.add_file(label, OpStatus::Failed, Some("File not found".into()));
            continue;
        }
        match store.find_entries(file, false) {
            Ok(found) => match found.first() {
                Some((_, entry)) => {
                    let record = summary.add_entry(entry, OpStatus::Success, Some(TransactionType::Query), None);
                    record.detail = Some(FileDetail::Queried {
                        input: label,
                        compressed: entry.is_compressed(),
                    });
                }
                None => {
                    summary.add_file(label, OpStatus::Skipped, None);
                }
            },
            Err(StoreError::Identity(IdentityError::UnknownFileType(_))) => {
                summary.add_file(label, OpStatus::Skipped, Some("Not a known file type".into()));
            }
            Err(StoreError::Identity(IdentityError::FileNotExists(_))) => {
                summary.add_file(label, OpStatus::Failed, Some("File not found".into()));
            }
            Err(e) if is_item_error(&e) => {
                summary.add_file(label, OpStatus::Failed, Some(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(summary)
}

pub(crate) fn cmd_fetch(settings: &Settings, args: FetchArgs) -> anyhow::Result<Summary> {
    let mut store = Store::open(store_dir(settings, args.store.store_dir)?);
    let files = build_files_list(&args.files, args.recursive, false)?;
    let mut summary = Summary::new(None, OpStatus::Success, Some(TransactionType::Fetch));

    for file in &files {
        let label = file.display().to_string();
        if !file.exists() {
            summary.add_file(label, OpStatus::Failed, Some("File not found".into()));
            continue;
        }
        match store.fetch_symbol(file) {
            Ok(Some((transaction, entry))) => {
                let dest_dir = match &args.output {
                    Some(dir) => dir.clone(),
                    None => file.parent().map(Path::to_path_buf).unwrap_or_default(),
                };
                match entry.extract(&dest_dir) {
                    Ok(path) => {
                        info!(input = %label, symbol = %path.display(), "symbol extracted");
                        let record = summary.add_file(path.display().to_string(), OpStatus::Success, None);
                        record.detail = Some(FileDetail::Fetched {
                            input: label,
                            compressed: entry.is_compressed(),
                        });
                    }
                    Err(e) => {
                        let id = transaction.id().map(|id| id.to_string()).unwrap_or_default();
                        error!(input = %label, id = %id, error = %e, "extraction failed");
                        summary.add_file(
                            label,
                            OpStatus::Failed,
                            Some(format!("Failed to extract from transaction {id}: {e}")),
                        );
                    }
                }
            }
            Ok(None) => {
                summary.add_file(label, OpStatus::Skipped, Some("Not found".into()));
            }
            Err(StoreError::Identity(IdentityError::InvalidPeFile { .. })) => {
                summary.add_file(label, OpStatus::Skipped, Some("Not a valid pe file".into()));
            }
            Err(StoreError::Identity(IdentityError::FileNotExists(_))) => {
                summary.add_file(label, OpStatus::Failed, Some("File not found".into()));
            }
            Err(e) if is_item_error(&e) => {
                summary.add_file(label, OpStatus::Failed, Some(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(summary)
}

pub(crate) fn cmd_clean(settings: &Settings, args: CleanArgs) -> anyhow::Result<Summary> {
    let root = store_dir(settings, args.store.store_dir)?;
    let (product, version) = product_and_version(settings, args.product)?;
    let keep = match args.keep {
        Some(keep) => keep,
        None => settings
            .keep
            .and_then(|k| i64::try_from(k).ok())
            .context("no keep count given")?,
    };
    if keep < 0 {
        return Ok(Summary::with_message(
            None,
            OpStatus::Success,
            Some(TransactionType::Del),
            "keep all transactions since keep count is negative",
        ));
    }
    let keep = usize::try_from(keep).context("keep count out of range")?;
    let mut store = Store::open(root);
    Ok(store.remove_old_versions(&product, &version, keep, given_comment(&args.comment), args.dry_run)?)
}

pub(crate) fn cmd_promote(settings: &Settings, args: PromoteArgs) -> anyhow::Result<Summary> {
    let mut store_in = Store::open(&args.input);
    let mut store_out = Store::open(store_dir(settings, args.store.store_dir)?);
    let mut chain: Option<Summary> = None;
    for id in args.ids {
        let summary = match store_in.find_transaction(id, Some(TransactionType::Add)) {
            Ok(source) => store_out.promote_transaction(source, given_comment(&args.comment))?,
            Err(e) if is_item_error(&e) => {
                error!(id = %id, error = %e, "cannot promote transaction");
                Summary::with_message(Some(id), OpStatus::Failed, Some(TransactionType::Add), e.to_string())
            }
            Err(e) => return Err(e.into()),
        };
        push(&mut chain, summary);
    }
    Ok(chain.unwrap_or_else(|| Summary::new(None, OpStatus::Skipped, Some(TransactionType::Add))))
}

/// A stored file older than the cut-off.
struct UnusedFile {
    transaction_id: TransactionId,
    entries_in_transaction: usize,
    rel_path: String,
    stored_dir: PathBuf,
    accessed: DateTime<Local>,
    size: u64,
}

fn cutoff(args: &UnusedArgs) -> anyhow::Result<DateTime<Local>> {
    match (args.date, args.days) {
        (Some(date), _) => date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| dt.and_local_timezone(Local).earliest())
            .with_context(|| format!("invalid date {date}")),
        (None, Some(days)) => Ok(Local::now() - Duration::days(i64::from(days))),
        (None, None) => anyhow::bail!("no date or days given"),
    }
}

pub(crate) fn cmd_unused(settings: &Settings, args: UnusedArgs) -> anyhow::Result<Summary> {
    let cutoff = cutoff(&args)?;
    let mut store = Store::open(store_dir(settings, args.store.store_dir)?);
    info!(since = %cutoff.format("%Y-%m-%d"), "searching files not used");

    let mut summary = Summary::new(None, OpStatus::Success, Some(TransactionType::Unused));
    let mut unused = Vec::new();
    for item in store.iter_entries(|t| !t.is_deleted())? {
        let (transaction, entry) = item?;
        let Some(transaction_id) = transaction.id() else {
            continue;
        };
        let rel_path = entry.rel_path().display().to_string();
        let meta = match fs::metadata(entry.stored_path()) {
            Ok(meta) => meta,
            Err(e) => {
                summary.add_file(rel_path, OpStatus::Failed, Some(e.to_string()));
                continue;
            }
        };
        let accessed: DateTime<Local> = match meta.accessed() {
            Ok(time) => time.into(),
            Err(e) => {
                summary.add_file(rel_path, OpStatus::Failed, Some(e.to_string()));
                continue;
            }
        };
        if accessed < cutoff {
            unused.push(UnusedFile {
                transaction_id,
                entries_in_transaction: transaction.count()?,
                rel_path,
                stored_dir: entry.stored_dir(),
                accessed,
                size: meta.len(),
            });
        }
    }

    let mut removed: HashMap<TransactionId, usize> = HashMap::new();
    let mut removed_dirs: HashSet<PathBuf> = HashSet::new();
    let mut obsolete = Vec::new();
    for file in unused {
        let mut deleted = false;
        if args.delete {
            // Transactions sharing a stored file share its directory.
            if removed_dirs.contains(&file.stored_dir) {
                deleted = true;
            } else {
                match fs::remove_dir_all(&file.stored_dir) {
                    Ok(()) => deleted = true,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => deleted = true,
                    Err(e) => warn!(path = %file.stored_dir.display(), error = %e, "cannot remove unused file"),
                }
                if deleted {
                    removed_dirs.insert(file.stored_dir.clone());
                }
            }
            if deleted {
                let count = removed.entry(file.transaction_id).or_default();
                *count += 1;
                if *count == file.entries_in_transaction {
                    obsolete.push(file.transaction_id);
                }
            }
        }
        let record = summary.add_file(file.rel_path, OpStatus::Success, None);
        record.detail = Some(FileDetail::Unused {
            date: file.accessed.format("%Y-%m-%d").to_string(),
            transaction_id: file.transaction_id,
            file_size: (!deleted).then_some(file.size),
            del_size: deleted.then_some(file.size),
        });
    }

    for id in obsolete {
        let result = store.delete_transaction(id, false)?;
        info!(id = %id, skipped = result.skipped(false), "transaction without files deleted");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use symstore_pdb::fixtures::{self, CodeViewSpec};
    use symstore_pdb::Guid;

    const GUID: Guid = Guid::new(
        0xDBF7CE25,
        0xC6DC,
        0x4E0E,
        [0xA9, 0xAD, 0x88, 0x91, 0x87, 0xE2, 0x96, 0xA2],
    );

    fn parse(args: &[&str]) -> Command {
        let mut argv = vec!["symstore"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    fn settings(root: &Path) -> Settings {
        Settings {
            store: Some(root.to_path_buf()),
            ..Settings::default()
        }
    }

    fn add(settings: &Settings, product: &str, version: &str, files: &[&Path]) -> Summary {
        let mut argv = vec!["add", "-p", product, "-v", version];
        let files: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
        argv.extend(files.iter().map(String::as_str));
        match parse(&argv) {
            Command::Add(args) => cmd_add(settings, args).unwrap(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn add_reports_unknown_files_and_commits_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(2, 0x1000, None)).unwrap();
        let txt = fixtures::write(dir.path(), "notes.txt", b"hello").unwrap();

        let summary = add(&settings, "app", "1.0", &[&exe, &txt]);
        assert_eq!(summary.status(), OpStatus::Success);
        assert_eq!(summary.transaction_id(), Some(TransactionId::new(1)));
        assert_eq!(summary.success(false), 1);
        assert_eq!(summary.failed(false), 1);
        assert!(dir.path().join("store/app.exe/21000/app.exe").is_file());
    }

    #[test]
    fn add_without_known_files_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let txt = fixtures::write(dir.path(), "notes.txt", b"hello").unwrap();

        let summary = add(&settings, "app", "1.0", &[&txt]);
        assert_eq!(summary.status(), OpStatus::Skipped);
        assert_eq!(summary.transaction_id(), None);
        assert!(!dir.path().join("store/000Admin/server.txt").exists());
    }

    #[test]
    fn add_takes_product_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(&dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(3, 0x1000, None)).unwrap();
        let args = match parse(&["add", exe.to_str().unwrap()]) {
            Command::Add(args) => args,
            _ => unreachable!(),
        };
        assert!(cmd_add(&settings, args).is_err());

        settings.product = Some("app".into());
        settings.version = Some("2.0".into());
        let args = match parse(&["add", exe.to_str().unwrap()]) {
            Command::Add(args) => args,
            _ => unreachable!(),
        };
        let summary = cmd_add(&settings, args).unwrap();
        assert_eq!(summary.status(), OpStatus::Success);
    }

    #[test]
    fn add_with_keep_count_chains_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(4, 0x1000, None)).unwrap();
        for _ in 0..2 {
            add(&settings, "app", "1.0", &[&exe]);
        }

        let args = match parse(&["add", "-p", "app", "-v", "1.0", "-k", "1", exe.to_str().unwrap()]) {
            Command::Add(args) => args,
            _ => unreachable!(),
        };
        let summary = cmd_add(&settings, args).unwrap();
        assert_eq!(summary.transaction_id(), Some(TransactionId::new(3)));
        let deleted: Vec<_> = summary.iter().skip(1).filter_map(Summary::transaction_id).collect();
        assert_eq!(deleted, vec![TransactionId::new(1), TransactionId::new(2)]);
        assert!(output::add_text(&summary).ends_with("Number of transactions deleted = 2"));
    }

    #[test]
    fn del_folds_unknown_ids_into_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(5, 0x1000, None)).unwrap();
        add(&settings, "app", "1.0", &[&exe]);

        let summary = match parse(&["del", "1", "42"]) {
            Command::Del(args) => cmd_del(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(summary.count(true), 1);
        assert_eq!(summary.failed(true), 1);
        let failed = summary.linked().unwrap();
        assert_eq!(failed.error_msg(), Some("ID 0000000042 doesn't exist"));
        assert!(!dir.path().join("store/app.exe").exists());
    }

    #[test]
    fn query_classifies_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let stored = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(6, 0x1000, None)).unwrap();
        add(&settings, "app", "1.0", &[&stored]);
        let other = fixtures::write(dir.path(), "other.exe", &fixtures::pe_image(7, 0x1000, None)).unwrap();
        let txt = fixtures::write(dir.path(), "notes.txt", b"hello").unwrap();
        let missing = dir.path().join("missing.exe");

        let args = match parse(&[
            "query",
            stored.to_str().unwrap(),
            other.to_str().unwrap(),
            txt.to_str().unwrap(),
            missing.to_str().unwrap(),
        ]) {
            Command::Query(args) => args,
            _ => unreachable!(),
        };
        let summary = cmd_query(&settings, args).unwrap();
        let statuses: Vec<OpStatus> = summary.files().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![OpStatus::Success, OpStatus::Skipped, OpStatus::Skipped, OpStatus::Failed]
        );
        assert_eq!(summary.files()[0].path, Path::new("app.exe").join("61000").join("app.exe").display().to_string());
        assert_eq!(summary.files()[2].error.as_deref(), Some("Not a known file type"));
        assert_eq!(summary.files()[3].error.as_deref(), Some("File not found"));
    }

    #[test]
    fn fetch_extracts_next_to_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let pdb = fixtures::write(dir.path(), "app.pdb", &fixtures::native_pdb(GUID, Some(1))).unwrap();
        add(&settings, "app", "1.0", &[&pdb]);

        let cv = CodeViewSpec {
            guid: GUID,
            age: 1,
            pdb_path: r"C:\build\app.pdb".to_string(),
        };
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(8, 0x1000, Some(&cv))).unwrap();
        let txt = fixtures::write(dir.path(), "notes.txt", b"hello").unwrap();
        let out = dir.path().join("out");

        let args = match parse(&[
            "fetch",
            "-O",
            out.to_str().unwrap(),
            exe.to_str().unwrap(),
            txt.to_str().unwrap(),
        ]) {
            Command::Fetch(args) => args,
            _ => unreachable!(),
        };
        let summary = cmd_fetch(&settings, args).unwrap();
        assert_eq!(summary.files()[0].status, OpStatus::Success);
        assert_eq!(summary.files()[0].path, out.join("app.pdb").display().to_string());
        assert_eq!(fs::read(out.join("app.pdb")).unwrap(), fs::read(&pdb).unwrap());
        assert_eq!(summary.files()[1].status, OpStatus::Skipped);
        assert_eq!(summary.files()[1].error.as_deref(), Some("Not a valid pe file"));
    }

    #[test]
    fn clean_negative_keep_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let summary = match parse(&["clean", "-p", "app", "-v", "1.0", "-k", "-1"]) {
            Command::Clean(args) => cmd_clean(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(summary.status(), OpStatus::Success);
        assert!(summary.error_msg().is_some());
    }

    #[test]
    fn clean_dry_run_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        for ts in [9, 10, 11] {
            let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(ts, 0x1000, None)).unwrap();
            add(&settings, "app", "1.0", &[&exe]);
        }

        let summary = match parse(&["clean", "-p", "app", "-v", "1.0", "-k", "1", "--dry-run"]) {
            Command::Clean(args) => cmd_clean(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(summary.count(true), 2);
        assert!(dir.path().join("store/app.exe/91000").is_dir());

        let summary = match parse(&["clean", "-p", "app", "-v", "1.0", "-k", "1"]) {
            Command::Clean(args) => cmd_clean(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(summary.success(true), 2);
        assert!(!dir.path().join("store/app.exe/91000").exists());
        assert!(dir.path().join("store/app.exe/B1000").is_dir());
    }

    #[test]
    fn promote_copies_between_stores() {
        let dir = tempfile::tempdir().unwrap();
        let staging = settings(&dir.path().join("staging"));
        let release = dir.path().join("release");
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(12, 0x1000, None)).unwrap();
        add(&staging, "app", "1.0", &[&exe]);

        let args = match parse(&[
            "promote",
            "-s",
            release.to_str().unwrap(),
            "-I",
            dir.path().join("staging").to_str().unwrap(),
            "1",
            "7",
        ]) {
            Command::Promote(args) => args,
            _ => unreachable!(),
        };
        let summary = cmd_promote(&Settings::default(), args).unwrap();
        assert_eq!(summary.status(), OpStatus::Success);
        assert_eq!(summary.success(false), 1);
        assert_eq!(summary.failed(true), 1);
        assert!(release.join("app.exe/C1000/app.exe").is_file());
        assert!(dir.path().join("staging/000Admin/0000000001.promoted").is_file());
    }

    #[test]
    fn unused_lists_and_deletes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(13, 0x1000, None)).unwrap();
        add(&settings, "app", "1.0", &[&exe]);

        let listed = match parse(&["unused", "--date", "2000-01-01"]) {
            Command::Unused(args) => cmd_unused(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert!(listed.files().is_empty());

        let tomorrow = (Local::now() + Duration::days(1)).format("%Y-%m-%d").to_string();
        let listed = match parse(&["unused", "--date", &tomorrow]) {
            Command::Unused(args) => cmd_unused(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(listed.files().len(), 1);
        assert!(matches!(
            listed.files()[0].detail,
            Some(FileDetail::Unused { file_size: Some(_), del_size: None, .. })
        ));

        let deleted = match parse(&["unused", "--date", &tomorrow, "-d"]) {
            Command::Unused(args) => cmd_unused(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert!(matches!(
            deleted.files()[0].detail,
            Some(FileDetail::Unused { del_size: Some(_), file_size: None, .. })
        ));
        assert!(!dir.path().join("store/app.exe/D1000").exists());
        assert!(dir.path().join("store/000Admin/0000000001.deleted").is_file());
    }

    #[test]
    fn unused_delete_reclaims_files_shared_between_versions() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir.path().join("store"));
        let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(14, 0x1000, None)).unwrap();
        add(&settings, "app", "1.0", &[&exe]);
        add(&settings, "app", "2.0", &[&exe]);

        let tomorrow = (Local::now() + Duration::days(1)).format("%Y-%m-%d").to_string();
        let deleted = match parse(&["unused", "--date", &tomorrow, "-d"]) {
            Command::Unused(args) => cmd_unused(&settings, args).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(deleted.files().len(), 2);
        for record in deleted.files() {
            assert!(matches!(
                record.detail,
                Some(FileDetail::Unused { del_size: Some(_), file_size: None, .. })
            ));
        }
        assert!(!dir.path().join("store/app.exe/E1000").exists());
        assert!(dir.path().join("store/000Admin/0000000001.deleted").is_file());
        assert!(dir.path().join("store/000Admin/0000000002.deleted").is_file());
    }

    #[test]
    fn empty_comment_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let staging = settings(&dir.path().join("staging"));
        let release = dir.path().join("release");
        for ts in [15, 16] {
            let exe = fixtures::write(dir.path(), "app.exe", &fixtures::pe_image(ts, 0x1000, None)).unwrap();
            let args = match parse(&["add", "-p", "app", "-v", "1.0", "-c", "nightly", exe.to_str().unwrap()]) {
                Command::Add(args) => args,
                _ => unreachable!(),
            };
            cmd_add(&staging, args).unwrap();
        }

        let args = match parse(&[
            "promote",
            "-s",
            release.to_str().unwrap(),
            "-I",
            dir.path().join("staging").to_str().unwrap(),
            "-c",
            "",
            "1",
        ]) {
            Command::Promote(args) => args,
            _ => unreachable!(),
        };
        cmd_promote(&Settings::default(), args).unwrap();
        let mut promoted = Store::open(&release);
        let comment = promoted.find_transaction(TransactionId::new(1), None).unwrap().comment();
        assert!(comment.starts_with("nightly : Promote 0000000001 from "), "{comment}");

        let summary = match parse(&["clean", "-p", "app", "-v", "1.0", "-k", "1", "-c", ""]) {
            Command::Clean(args) => cmd_clean(&staging, args).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(summary.success(true), 1);
        assert!(!dir.path().join("staging/app.exe/F1000").exists());
        assert!(dir.path().join("staging/app.exe/101000").is_dir());
    }
}
