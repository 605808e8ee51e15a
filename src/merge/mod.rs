//! Merge engine for combining worker stores
//!
//! This module unions any number of stores into one:
//! - Articles are unioned by title (processed flag OR-ed, highest state wins)
//! - Links are unioned by exact (from, to) pair
//! - Progress is checkpointed every N applied rows
//!
//! Every rule is a max/min/OR over the inputs, so the result does not depend
//! on input order or grouping. The output is built in a hidden `*.partial`
//! temp file next to it and persisted into place only after the final commit.

use crate::storage::{
    progress_keys, ArticleRecord, LinkRecord, SqliteStore, StorageError, StorageResult, Store,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempPath;
use thiserror::Error;

/// Suffix of the staging file a merge is built in
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Errors that abort a merge, each naming the offending path
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("No input stores given")]
    NoInputs,

    #[error("Cannot read input store {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("Cannot write output store {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: StorageError,
    },
}

impl MergeError {
    /// The input or output path the error is about, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NoInputs => None,
            Self::Input { path, .. } | Self::Output { path, .. } => Some(path),
        }
    }
}

/// Merge tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Rows applied between progress checkpoints
    pub checkpoint_every: u64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: 1000,
        }
    }
}

/// Rows read from one input store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub path: PathBuf,
    pub articles: u64,
    pub links: u64,
}

/// Outcome of a successful merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Per-source row counts, in merge order (an existing output comes first)
    pub sources: Vec<SourceReport>,
    /// Distinct articles in the output
    pub total_articles: u64,
    /// Output articles with the processed flag set
    pub processed_articles: u64,
    /// Distinct links in the output
    pub total_links: u64,
    /// Total rows read across all sources
    pub rows_applied: u64,
}

/// Merges `inputs` into `output`
///
/// If `output` already exists it is folded in as the first input; if it
/// cannot be read the error is reported against the output. The merged store
/// is written to a `.<output name>.<random>.partial` file in the same
/// directory and persisted over `output` once fully committed. On any failure,
/// including the final rename, the partial file is removed and `output` is
/// left untouched.
///
/// # Arguments
///
/// * `inputs` - Store files to merge, in order
/// * `output` - Destination store file
/// * `options` - Checkpoint interval
///
/// # Returns
///
/// * `Ok(MergeReport)` - Per-source and aggregate totals
/// * `Err(MergeError)` - An input was unreadable or the output unwritable
pub fn merge_stores(
    inputs: &[PathBuf],
    output: &Path,
    options: &MergeOptions,
) -> Result<MergeReport, MergeError> {
    if inputs.is_empty() {
        return Err(MergeError::NoInputs);
    }

    let existing_output = output.exists();
    let mut source_paths = Vec::with_capacity(inputs.len() + 1);
    if existing_output {
        tracing::info!(
            "Output {} exists, folding it in as the first input",
            output.display()
        );
        source_paths.push(output.to_path_buf());
    }
    source_paths.extend(inputs.iter().cloned());

    // Open everything up front so an unreadable input fails before any writing
    let mut sources = Vec::with_capacity(source_paths.len());
    for (index, path) in source_paths.into_iter().enumerate() {
        let is_output = existing_output && index == 0;
        let store = match SqliteStore::open_source(&path) {
            Ok(store) => store,
            Err(source) if is_output => return Err(output_error(&path, source)),
            Err(source) => return Err(MergeError::Input { path, source }),
        };
        sources.push(Source {
            path,
            store,
            is_output,
        });
    }

    let partial = create_partial(output)?;
    tracing::debug!("Building merged store in {}", partial.display());

    let result = merge_into(&sources, &partial, options);
    drop(sources);

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            remove_sidecars(&partial);
            return Err(e);
        }
    };

    finalize(partial, output)?;
    tracing::info!(
        "Merged {} store(s) into {}: {} articles ({} processed), {} links",
        report.sources.len(),
        output.display(),
        report.total_articles,
        report.processed_articles,
        report.total_links
    );
    Ok(report)
}

/// One store being read by a merge
struct Source {
    path: PathBuf,
    store: SqliteStore,
    /// The pre-existing output, folded in as the first input
    is_output: bool,
}

fn output_error(path: &Path, source: impl Into<StorageError>) -> MergeError {
    MergeError::Output {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

/// Creates the empty staging file next to `output`
///
/// The file is named `.<output name>.<random>.partial` and is deleted when
/// the returned path is dropped, unless it has been persisted.
fn create_partial(output: &Path) -> Result<TempPath, MergeError> {
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "merged".to_string());
    let prefix = format!(".{}.", name);

    let file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| output_error(output, e))?;
    Ok(file.into_temp_path())
}

/// Removes SQLite sidecar files of `path`, logging failures
fn remove_sidecars(path: &Path) {
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        match std::fs::remove_file(PathBuf::from(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove {}{}: {}",
                path.display(),
                suffix,
                e
            ),
        }
    }
}

/// Moves the committed staging store over the final output
///
/// On failure the staging file is deleted along with `partial`.
fn finalize(partial: TempPath, output: &Path) -> Result<(), MergeError> {
    // Sidecars of the old output must not be paired with the new file
    remove_sidecars(output);
    remove_sidecars(&partial);

    partial
        .persist(output)
        .map_err(|e| output_error(output, e.error))
}

fn merge_into(
    sources: &[Source],
    partial: &Path,
    options: &MergeOptions,
) -> Result<MergeReport, MergeError> {
    let store = SqliteStore::open(partial).map_err(|source| output_error(partial, source))?;
    let mut writer = MergeWriter::new(store, partial, options.checkpoint_every);
    let start_time = Instant::now();

    writer.begin().map_err(|e| output_error(partial, e))?;

    let mut reports = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        let path = &source.path;
        tracing::info!(
            "Merging source {}/{}: {}",
            index + 1,
            sources.len(),
            path.display()
        );
        writer
            .start_source(path)
            .map_err(|e| output_error(partial, e))?;

        let articles = writer.copy_articles(source)?;
        let links = writer.copy_links(source)?;

        writer.sources_done += 1;
        writer.checkpoint().map_err(|e| output_error(partial, e))?;

        tracing::info!(
            "Source {} done: {} articles, {} links",
            path.display(),
            articles,
            links
        );
        reports.push(SourceReport {
            path: path.clone(),
            articles,
            links,
        });
    }

    writer
        .store
        .commit_batch()
        .map_err(|e| output_error(partial, e))?;
    writer
        .store
        .refresh_progress()
        .map_err(|e| output_error(partial, e))?;

    let summarize = |store: &SqliteStore| -> StorageResult<(u64, u64, u64)> {
        Ok((
            store.count_articles()?,
            store.count_processed()?,
            store.count_links()?,
        ))
    };
    let (total_articles, processed_articles, total_links) =
        summarize(&writer.store).map_err(|e| output_error(partial, e))?;

    tracing::debug!(
        "Merge wrote {} rows in {:?}",
        writer.rows_applied,
        start_time.elapsed()
    );

    Ok(MergeReport {
        sources: reports,
        total_articles,
        processed_articles,
        total_links,
        rows_applied: writer.rows_applied,
    })
}

/// The output side of a merge, with checkpoint bookkeeping
struct MergeWriter {
    store: SqliteStore,
    path: PathBuf,
    checkpoint_every: u64,
    rows_applied: u64,
    since_checkpoint: u64,
    sources_done: u64,
}

impl MergeWriter {
    fn new(store: SqliteStore, path: &Path, checkpoint_every: u64) -> Self {
        Self {
            store,
            path: path.to_path_buf(),
            checkpoint_every: checkpoint_every.max(1),
            rows_applied: 0,
            since_checkpoint: 0,
            sources_done: 0,
        }
    }

    fn begin(&mut self) -> StorageResult<()> {
        self.store.begin_batch()
    }

    fn start_source(&mut self, path: &Path) -> StorageResult<()> {
        self.store.set_progress(
            progress_keys::MERGE_CURRENT_SOURCE,
            &path.display().to_string(),
        )
    }

    /// Commits the open batch with up-to-date merge progress and opens the next
    fn checkpoint(&mut self) -> StorageResult<()> {
        self.store.set_progress(
            progress_keys::MERGE_ROWS_APPLIED,
            &self.rows_applied.to_string(),
        )?;
        self.store.set_progress(
            progress_keys::MERGE_SOURCES_DONE,
            &self.sources_done.to_string(),
        )?;
        self.store.commit_batch()?;
        self.store.begin_batch()?;
        self.since_checkpoint = 0;
        Ok(())
    }

    fn tick(&mut self) -> StorageResult<()> {
        self.rows_applied += 1;
        self.since_checkpoint += 1;
        if self.since_checkpoint >= self.checkpoint_every {
            self.checkpoint()?;
            tracing::info!(
                "Merge checkpoint: {} rows applied to {}",
                self.rows_applied,
                self.path.display()
            );
        }
        Ok(())
    }

    fn apply_article(&mut self, article: &ArticleRecord) -> StorageResult<()> {
        self.store.merge_article(article)?;
        self.tick()
    }

    fn apply_link(&mut self, link: &LinkRecord) -> StorageResult<()> {
        self.store.merge_link(link)?;
        self.tick()
    }

    fn copy_articles(&mut self, source: &Source) -> Result<u64, MergeError> {
        let mut write_error = None;
        let result = source.store.for_each_article(&mut |article| {
            self.apply_article(&article).map_err(|e| {
                write_error = Some(e);
                StorageError::Batch("merge aborted by output failure".to_string())
            })
        });
        self.classify(result, write_error, source)
    }

    fn copy_links(&mut self, source: &Source) -> Result<u64, MergeError> {
        let mut write_error = None;
        let result = source.store.for_each_link(&mut |link| {
            self.apply_link(&link).map_err(|e| {
                write_error = Some(e);
                StorageError::Batch("merge aborted by output failure".to_string())
            })
        });
        self.classify(result, write_error, source)
    }

    /// Attributes a streaming failure to the output or to the input
    ///
    /// A read failure on the pre-existing output counts against the output.
    fn classify(
        &self,
        result: StorageResult<u64>,
        write_error: Option<StorageError>,
        source: &Source,
    ) -> Result<u64, MergeError> {
        if let Some(err) = write_error {
            return Err(output_error(&self.path, err));
        }
        result.map_err(|err| {
            if source.is_output {
                output_error(&source.path, err)
            } else {
                MergeError::Input {
                    path: source.path.clone(),
                    source: err,
                }
            }
        })
    }
}
