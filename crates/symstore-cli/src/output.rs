//! Text and JSON renderings of a summary chain.

use serde::Serialize;
use symstore_store::{FileDetail, FileRecord, OpStatus, Summary};
use symstore_types::{TransactionId, TransactionType};

/// Width of the first column of the tables.
const COLUMN_WIDTH: usize = 80;

#[derive(Serialize)]
struct SummaryNode<'a> {
    id: Option<TransactionId>,
    #[serde(rename = "type")]
    kind: &'static str,
    status: OpStatus,
    success: usize,
    failure: usize,
    skip: usize,
    files: &'a [FileRecord],
    message: Option<&'a str>,
}

/// One JSON object per summary node, pretty-printed.
pub fn render_json(summary: &Summary) -> serde_json::Result<String> {
    let nodes: Vec<SummaryNode<'_>> = summary
        .iter()
        .map(|node| SummaryNode {
            id: node.transaction_id(),
            kind: node.transaction_type().map_or("undefined", |t| t.as_str()),
            status: node.status(),
            success: node.success(false),
            failure: node.failed(false),
            skip: node.skipped(false),
            files: node.files(),
            message: node.error_msg(),
        })
        .collect();
    serde_json::to_string_pretty(&nodes)
}

/// Successful DEL nodes chained behind the head.
fn deleted_transactions(summary: &Summary) -> usize {
    summary
        .iter()
        .skip(1)
        .filter(|s| s.status() == OpStatus::Success && s.transaction_type() == Some(TransactionType::Del))
        .count()
}

pub fn add_text(summary: &Summary) -> String {
    format!(
        "Number of files stored = {}\nNumber of errors = {}\nNumber of files ignored = {}\nNumber of transactions deleted = {}",
        summary.success(false),
        summary.failed(false),
        summary.skipped(false),
        deleted_transactions(summary),
    )
}

/// Shared by `del` and `clean`.
pub fn delete_text(summary: &Summary) -> String {
    let mut out = format!(
        "Number of references deleted = {}\nNumber of files deleted = {}\nNumber of errors = {}\nNumber of transactions deleted = {}",
        summary.referenced(true),
        summary.success(true),
        summary.failed(true),
        summary.count(true),
    );
    for message in summary.iter().filter_map(Summary::error_msg) {
        out.push('\n');
        out.push_str(message);
    }
    out
}

pub fn promote_text(summary: &Summary) -> String {
    let mut out = format!(
        "Number of files promoted = {}\nNumber of errors = {}",
        summary.success(true),
        summary.failed(true),
    );
    for node in summary.iter() {
        let Some(message) = node.error_msg() else {
            continue;
        };
        match node.transaction_id() {
            Some(id) => out.push_str(&format!("\n{id}: {message}")),
            None => out.push_str(&format!("\n{message}")),
        }
    }
    out
}

/// Input path and compression flag of a query or fetch hit.
fn hit(record: &FileRecord) -> Option<(&str, bool)> {
    match &record.detail {
        Some(FileDetail::Queried { input, compressed } | FileDetail::Fetched { input, compressed }) => {
            Some((input.as_str(), *compressed))
        }
        _ => None,
    }
}

/// Table of `query` and `fetch` results: input file, compression, and the
/// stored or extracted path. Misses print the input and the reason.
pub fn lookup_text(summary: &Summary, full_path: bool) -> String {
    let records: Vec<&FileRecord> = summary.iter().flat_map(|s| s.files()).collect();
    let width = if full_path {
        records
            .iter()
            .map(|r| hit(r).map_or(r.path.as_str(), |(input, _)| input).chars().count() + 2)
            .fold(COLUMN_WIDTH, usize::max)
    } else {
        COLUMN_WIDTH
    };
    let shorten = |path: &str| {
        if full_path {
            path.to_string()
        } else {
            abbreviate(path, COLUMN_WIDTH)
        }
    };

    let mut lines = vec![format!("{:<width$}{:^10} Symbol File", "Input File", "Compressed")];
    for record in records {
        let line = match (record.status, hit(record)) {
            (OpStatus::Success, Some((input, compressed))) => format!(
                "{:<width$}{:^10} {}",
                shorten(input),
                if compressed { "Yes" } else { "No" },
                shorten(&record.path),
            ),
            (status, _) => {
                let fallback = if status == OpStatus::Skipped { "Not found" } else { "File not found" };
                format!(
                    "{:<width$}{:^10} {}",
                    shorten(&record.path),
                    "",
                    record.error.as_deref().unwrap_or(fallback),
                )
            }
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Table of unused files sorted by access date, then the byte total.
pub fn unused_text(summary: &Summary) -> String {
    let mut rows: Vec<(&str, &FileRecord)> = summary
        .iter()
        .flat_map(|s| s.files())
        .map(|r| match &r.detail {
            Some(FileDetail::Unused { date, .. }) => (date.as_str(), r),
            _ => ("N/A", r),
        })
        .collect();
    if rows.is_empty() {
        return String::new();
    }
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let width = COLUMN_WIDTH;
    let mut total: u64 = 0;
    let mut deleted: u64 = 0;
    let mut lines = vec![format!("{:<width$}{:^10}  Transaction ID", "Input File", "Date")];
    for (date, record) in rows {
        let path = abbreviate(&record.path, COLUMN_WIDTH);
        match &record.detail {
            Some(FileDetail::Unused {
                transaction_id,
                file_size,
                del_size,
                ..
            }) if record.status == OpStatus::Success => {
                total += file_size.unwrap_or(0);
                deleted += del_size.unwrap_or(0);
                lines.push(format!("{path:<width$}{date:^10}  {transaction_id}"));
            }
            _ => lines.push(format!(
                "{path:<width$}{:^10}  {}",
                "N/A",
                record.error.as_deref().unwrap_or("File not found"),
            )),
        }
    }
    lines.push(String::new());
    if deleted > 0 {
        lines.push(format!("{deleted} bytes deleted"));
    } else {
        lines.push(format!("{total} bytes can be deleted"));
    }
    lines.join("\n")
}

/// Shorten `path` to `max` characters by replacing middle components with
/// `...`. The first and last components are always kept.
pub fn abbreviate(path: &str, max: usize) -> String {
    if path.chars().count() <= max {
        return path.to_string();
    }
    let sep = if path.contains('\\') && !path.contains('/') { "\\" } else { "/" };
    let parts: Vec<&str> = path.split(sep).collect();
    if parts.len() < 3 {
        return path.to_string();
    }
    let last = parts.len() - 1;
    let mid = parts.len() / 2;
    let (mut lo, mut hi) = (mid, mid + 1);
    loop {
        let mut kept: Vec<&str> = parts[..lo].to_vec();
        kept.push("...");
        kept.extend_from_slice(&parts[hi..]);
        let candidate = kept.join(sep);
        let can_lo = lo > 1;
        let can_hi = hi < last;
        if candidate.chars().count() <= max || !(can_lo || can_hi) {
            return candidate;
        }
        if can_hi && (!can_lo || hi - mid <= mid - lo) {
            hi += 1;
        } else {
            lo -= 1;
        }
    }
}
