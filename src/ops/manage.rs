//! Operations that work on whole entries or container attributes: delete,
//! copy, update, write-attr and read-attr.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{select_entries, Dispatcher, Report};
use crate::container::{Container, OpenMode};
use crate::data::AttrValue;
use crate::error::{ArfxError, Result};
use crate::naming::EntryNamer;
use crate::repack::repack;

/// Prefix of top-level attributes that hold the text of an external file.
pub const USER_ATTR_PREFIX: &str = "user_";

/// Attribute name for the file at `file`: `user_<basename>`.
pub fn user_attr_name(file: &str) -> String {
    let base = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_owned());
    format!("{USER_ATTR_PREFIX}{base}")
}

/// Where a copy item points: a whole container or one entry inside it.
#[derive(Debug, PartialEq, Eq)]
enum CopySource {
    Container(PathBuf),
    Entry(PathBuf, String),
}

/// `file.arf` names a container, `file.arf/entry` an entry inside it.
fn parse_copy_item(item: &str) -> Result<CopySource> {
    let path = Path::new(item);
    if path.is_file() {
        return Ok(CopySource::Container(path.to_owned()));
    }
    if let Some((file, entry)) = item.rsplit_once('/') {
        if !entry.is_empty() && Path::new(file).is_file() {
            return Ok(CopySource::Entry(PathBuf::from(file), entry.to_owned()));
        }
    }
    Err(ArfxError::NotFound { path: path.to_owned() })
}

impl Dispatcher {
    pub(super) fn delete(&mut self, path: &Path, wanted: &[String]) -> Result<Report> {
        let mut report = Report::default();
        if wanted.is_empty() {
            return Ok(report);
        }
        let mut arf = Container::open_with(path, OpenMode::ReadWrite, self.container_options())?;
        self.start_progress(wanted.len());

        let mut count = 0;
        for name in wanted {
            let name = name.trim_start_matches('/');
            match arf.delete_entry(name) {
                Ok(_) => {
                    count += 1;
                    report.succeeded += 1;
                    self.echo(format!("/{name}"));
                }
                Err(e) => report.fail(format!("/{name}"), e),
            }
            self.progress.inc(1);
        }
        arf.close()?;

        if count > 0 && self.options.repack {
            match repack(path, self.options.compression) {
                Ok(stats) => self.echo(format!(
                    "repacked {}: {} -> {} bytes", path.display(), stats.size_before, stats.size_after
                )),
                Err(e) => report.fail(path.display().to_string(), e),
            }
        }
        Ok(report)
    }

    pub(super) fn copy(&mut self, path: &Path, items: &[String]) -> Result<Report> {
        let mut dst = Container::open_with(path, OpenMode::Append, self.container_options())?;
        let mut report = Report::default();
        let mut sources: HashMap<PathBuf, Container> = HashMap::new();

        // Resolve every item to (container, entry) pairs before naming.
        let mut plan: Vec<(PathBuf, String)> = Vec::new();
        for item in items {
            let resolved = parse_copy_item(item).and_then(|source| {
                let file = match &source {
                    CopySource::Container(f) | CopySource::Entry(f, _) => f.clone(),
                };
                if !sources.contains_key(&file) {
                    sources.insert(file.clone(), Container::open(&file, OpenMode::Read)?);
                }
                let src = &sources[&file];
                match source {
                    CopySource::Container(_) => Ok(src.entry_names().into_iter().map(|n| (file.clone(), n)).collect::<Vec<_>>()),
                    CopySource::Entry(_, name) if src.contains(&name) => Ok(vec![(file, name)]),
                    CopySource::Entry(_, name) => Err(ArfxError::NoSuchEntry(format!("{item} ({name})"))),
                }
            });
            match resolved {
                Ok(pairs) => plan.extend(pairs),
                Err(e)    => report.fail(item.as_str(), e),
            }
        }

        let mut namer = EntryNamer::new();
        if let Some(base) = &self.options.name {
            let existing = dst.entry_names();
            namer.seed_existing(existing.iter().map(String::as_str));
            namer.plan(base, plan.len());
        }
        self.start_progress(plan.len());

        for (file, name) in plan {
            let new_name = match &self.options.name {
                Some(base) => namer.next_name(base),
                None       => name.clone(),
            };
            let item = format!("{}/{name}", file.display());
            let Some(src) = sources.get_mut(&file) else { continue };
            match dst.copy_entry_from(src, &name, &new_name, None) {
                Ok(()) => {
                    report.succeeded += 1;
                    self.echo(format!("{item} -> {}/{new_name}", path.display()));
                }
                Err(e) => report.fail(item, e),
            }
            self.progress.inc(1);
        }

        dst.close()?;
        Ok(report)
    }

    pub(super) fn update(&mut self, path: &Path, wanted: &[String]) -> Result<Report> {
        let mut arf = Container::open_with(path, OpenMode::ReadWrite, self.container_options())?;
        let mut report = Report::default();
        let mut targets = select_entries(&arf.entry_names(), wanted, &mut report);

        match &self.options.name {
            Some(base) if wanted.is_empty() => {
                let mut namer = EntryNamer::new();
                namer.plan(base, targets.len());
                let renames: Vec<(String, String)> = targets
                    .iter()
                    .map(|old| (old.clone(), namer.next_name(base)))
                    .collect();
                match arf.rename_entries(&renames) {
                    Ok(()) => {
                        for (old, new) in &renames {
                            self.echo(format!("/{old} -> /{new}"));
                        }
                        targets = renames.into_iter().map(|(_, new)| new).collect();
                    }
                    // Nothing was renamed; attributes still go on the old names.
                    Err(e) => report.fail(format!("-n {base}"), e),
                }
            }
            Some(_) => warn!("-n only renames when no entries are named; ignoring it"),
            None => {}
        }

        self.start_progress(targets.len());
        let attrs = &self.options.metadata.entry_attrs;
        for name in &targets {
            match arf.set_entry_attrs(name, attrs) {
                Ok(()) => {
                    report.succeeded += 1;
                    self.echo(format!("/{name}"));
                }
                Err(e) => report.fail(format!("/{name}"), e),
            }
            self.progress.inc(1);
        }
        arf.close()?;
        Ok(report)
    }

    pub(super) fn write_attr(&mut self, path: &Path, files: &[String]) -> Result<Report> {
        let mut arf = Container::open_with(path, OpenMode::Append, self.container_options())?;
        let mut report = Report::default();
        for file in files {
            let key = user_attr_name(file);
            let stored = fs::read_to_string(file)
                .map_err(|e| ArfxError::open_failed(Path::new(file), e))
                .and_then(|text| arf.set_attr(&key, AttrValue::Text(text)));
            match stored {
                Ok(()) => {
                    report.succeeded += 1;
                    self.echo(format!("{file} -> {key}"));
                }
                Err(e) => report.fail(file.as_str(), e),
            }
        }
        arf.close()?;
        Ok(report)
    }

    pub(super) fn read_attr(&mut self, path: &Path, files: &[String]) -> Result<Report> {
        let arf = Container::open(path, OpenMode::Read)?;
        let mut report = Report::default();
        for file in files {
            let key = user_attr_name(file);
            match arf.attr(&key) {
                Some(value) => {
                    debug!(attribute = %key, "read attribute");
                    report.output.push(value.to_string());
                    report.succeeded += 1;
                }
                None => report.fail(file.as_str(), ArfxError::NoSuchEntry(key)),
            }
        }
        Ok(report)
    }
}
