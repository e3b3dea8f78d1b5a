//! Operation dispatcher: one archive operation over an ordered list of
//! items (input files, entry names or attribute files).
//!
//! Failures on individual items are collected in the [`Report`] and the
//! remaining items are still processed.  Failing to open the target
//! container is fatal and returned as `Err`.

mod extract;
mod ingest;
mod manage;

use std::fmt;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;

use crate::compression::Compression;
use crate::container::ContainerOptions;
use crate::data::Attributes;
use crate::error::{ArfxError, Result};
use crate::formats::FormatRegistry;
use crate::metadata::IngestMetadata;

pub use ingest::PCM_CHANNEL;
pub use manage::{user_attr_name, USER_ATTR_PREFIX};

/// The archive operations.  Exactly one runs per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Append,
    Extract,
    List,
    Delete,
    Copy,
    Update,
    WriteAttr,
    ReadAttr,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Create    => "create",
            Operation::Append    => "append",
            Operation::Extract   => "extract",
            Operation::List      => "list",
            Operation::Delete    => "delete",
            Operation::Copy      => "copy",
            Operation::Update    => "update",
            Operation::WriteAttr => "write-attr",
            Operation::ReadAttr  => "read-attr",
        }
    }

    /// Operations that make no sense without at least one item.
    pub fn needs_items(self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Append | Operation::Copy | Operation::WriteAttr | Operation::ReadAttr
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Settings shared by all operations.
#[derive(Debug, Clone)]
pub struct Options {
    /// Echo every processed item on stdout.
    pub verbose:      bool,
    /// `-n`: entry base name on ingest/copy/update, output template on extract.
    pub name:         Option<String>,
    pub metadata:     IngestMetadata,
    pub compression:  Compression,
    /// Repack after deleting entries.
    pub repack:       bool,
    /// Directory extracted files are written to.
    pub output_dir:   PathBuf,
    /// Extra attributes passed to format plugins opened for reading.
    pub plugin_attrs: Attributes,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose:      false,
            name:         None,
            metadata:     IngestMetadata::default(),
            compression:  Compression::default(),
            repack:       true,
            output_dir:   PathBuf::from("."),
            plugin_attrs: Attributes::new(),
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Failure {
    pub item:  String,
    pub error: ArfxError,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.item, self.error.kind(), self.error)
    }
}

/// Outcome of one invocation.
#[derive(Debug, Default)]
pub struct Report {
    pub succeeded: usize,
    pub failures:  Vec<Failure>,
    /// Lines produced by list and read-attr.
    pub output:    Vec<String>,
}

impl Report {
    pub fn is_success(&self) -> bool { self.failures.is_empty() }

    pub fn summary(&self) -> String {
        format!("{} succeeded, {} failed", self.succeeded, self.failures.len())
    }

    fn fail(&mut self, item: impl Into<String>, error: ArfxError) {
        let failure = Failure { item: item.into(), error };
        eprintln!("arfx: {failure}");
        self.failures.push(failure);
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

pub struct Dispatcher {
    registry: FormatRegistry,
    options:  Options,
    progress: ProgressBar,
}

impl Dispatcher {
    pub fn new(registry: FormatRegistry, options: Options) -> Self {
        Self { registry, options, progress: ProgressBar::hidden() }
    }

    /// Report progress on `bar`; its length is set per operation.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn options(&self) -> &Options { &self.options }

    pub fn registry(&self) -> &FormatRegistry { &self.registry }

    /// Run `op` against the container at `container` with `items`.
    pub fn run(&mut self, op: Operation, container: &Path, items: &[String]) -> Result<Report> {
        if op.needs_items() && items.is_empty() {
            return Err(ArfxError::InvalidArgument(format!("{op} needs one or more input files")));
        }
        tracing::debug!(operation = op.name(), container = %container.display(), items = items.len(), "dispatch");
        let report = match op {
            Operation::Create    => self.ingest(container, items, false),
            Operation::Append    => self.ingest(container, items, true),
            Operation::Extract   => self.extract(container, items),
            Operation::List      => self.list(container, items),
            Operation::Delete    => self.delete(container, items),
            Operation::Copy      => self.copy(container, items),
            Operation::Update    => self.update(container, items),
            Operation::WriteAttr => self.write_attr(container, items),
            Operation::ReadAttr  => self.read_attr(container, items),
        }?;
        self.progress.finish_and_clear();
        Ok(report)
    }

    fn container_options(&self) -> ContainerOptions {
        ContainerOptions { compression: self.options.compression }
    }

    /// Print a per-item line in verbose mode without tearing the progress bar.
    fn echo(&self, line: impl AsRef<str>) {
        if self.options.verbose {
            self.progress.suspend(|| println!("{}", line.as_ref()));
        }
    }

    fn start_progress(&self, len: usize) {
        self.progress.set_length(len as u64);
        self.progress.set_position(0);
    }
}

/// Keep only entries named in `wanted` (all when it is empty), recording a
/// `NoSuchEntry` failure for every name that does not exist.
fn select_entries(all: &[String], wanted: &[String], report: &mut Report) -> Vec<String> {
    if wanted.is_empty() {
        return all.to_vec();
    }
    let mut out = Vec::with_capacity(wanted.len());
    for name in wanted {
        let name = name.trim_start_matches('/');
        if all.iter().any(|n| n == name) {
            out.push(name.to_owned());
        } else {
            report.fail(format!("/{name}"), ArfxError::NoSuchEntry(name.to_owned()));
        }
    }
    out
}
