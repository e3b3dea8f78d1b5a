//! Extract and list: the read-only operations.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{select_entries, Dispatcher, Report};
use crate::container::{Container, OpenMode};
use crate::data::Payload;
use crate::error::{ArfxError, Result};
use crate::formats::IoMode;
use crate::index::{EntryRecord, Layout};
use crate::metadata::extract_attrs;
use crate::naming::{NameContext, Template, DEFAULT_TEMPLATE};

/// Entries to visit, ordered by timestamp.  The sort is stable so entries
/// sharing a timestamp stay in creation order.
fn ordered(arf: &Container, names: &[String]) -> Vec<EntryRecord> {
    let mut entries: Vec<EntryRecord> = arf
        .entries()
        .iter()
        .filter(|e| names.contains(&e.name))
        .cloned()
        .collect();
    entries.sort_by_key(|e| e.timestamp);
    entries
}

impl Dispatcher {
    /// Write every sampled channel to the file its template resolves to.
    /// A path already written earlier in the run is a `NameConflict` for the
    /// later channel and is left as it is.
    pub(super) fn extract(&mut self, path: &Path, wanted: &[String]) -> Result<Report> {
        let mut arf = Container::open(path, OpenMode::Read)?;
        let template = Template::parse(self.options.name.as_deref().unwrap_or(DEFAULT_TEMPLATE))?;
        let mut report = Report::default();

        let names = select_entries(&arf.entry_names(), wanted, &mut report);
        let entries = ordered(&arf, &names);
        self.start_progress(entries.iter().map(|e| e.channels.len()).sum());

        let mut index = 0;
        let mut written = HashSet::new();
        for entry in &entries {
            for (ci, channel) in entry.channels.iter().enumerate() {
                self.progress.inc(1);
                if !channel.is_sampled() {
                    debug!(entry = %entry.name, channel = %channel.name, "skipping event channel");
                    continue;
                }
                let item = format!("/{}/{}", entry.name, channel.name);
                match self.extract_channel(&mut arf, &template, entry, ci, index, &mut written) {
                    Ok(out) => {
                        report.succeeded += 1;
                        self.echo(format!("{item} -> {}", out.display()));
                    }
                    Err(e) => report.fail(item, e),
                }
                index += 1;
            }
        }
        Ok(report)
    }

    fn extract_channel(
        &self,
        arf:      &mut Container,
        template: &Template,
        entry:    &EntryRecord,
        ci:       usize,
        index:    usize,
        written:  &mut HashSet<PathBuf>,
    ) -> Result<PathBuf> {
        let channel = &entry.channels[ci];
        let ctx = NameContext {
            entry:         &entry.name,
            channel:       ci,
            channel_name:  &channel.name,
            index,
            channel_attrs: &channel.attrs,
            entry_attrs:   &entry.attrs,
        };
        let out = self.options.output_dir.join(template.resolve(&ctx)?);
        // An earlier channel of this run already owns the path.
        if !written.insert(out.clone()) {
            return Err(ArfxError::NameConflict { name: out.display().to_string() });
        }
        let attrs = extract_attrs(entry, channel);

        let data = match arf.read_channel(&entry.name, &channel.name)? {
            Payload::Sampled(data) => data,
            Payload::Events(_) => {
                return Err(ArfxError::TypeMismatch(format!("/{}/{} holds events", entry.name, channel.name)));
            }
        };

        let mut opened = self.registry.open(&out, IoMode::Write, &attrs)?;
        let mut written = opened.plugin.write(&data);
        if written.is_ok() && opened.capabilities.settable_timestamp {
            written = opened.plugin.set_timestamp(entry.timestamp);
        }
        match written {
            Ok(()) => opened.close()?,
            Err(e) => {
                drop(opened);
                // Leave no half-written file behind.
                let _ = fs::remove_file(&out);
                return Err(e);
            }
        }
        Ok(out)
    }

    pub(super) fn list(&mut self, path: &Path, wanted: &[String]) -> Result<Report> {
        let arf = Container::open(path, OpenMode::Read)?;
        let mut report = Report::default();
        let names = select_entries(&arf.entry_names(), wanted, &mut report);

        for entry in ordered(&arf, &names) {
            if self.options.verbose {
                report.output.extend(describe(&entry));
            } else if entry.channels.is_empty() {
                report.output.push(format!("/{}", entry.name));
            } else {
                for channel in &entry.channels {
                    report.output.push(format!("/{}/{}", entry.name, channel.name));
                }
            }
            report.succeeded += 1;
        }
        Ok(report)
    }
}

/// Verbose listing of one entry.
fn describe(entry: &EntryRecord) -> Vec<String> {
    let mut lines = vec![
        format!("/{}", entry.name),
        format!("  timestamp: {}", entry.timestamp),
        format!("  uuid: {}", entry.uuid),
    ];
    lines.extend(entry.attrs.iter().map(|(k, v)| format!("  {k}: {v}")));
    for channel in &entry.channels {
        let shape = match channel.layout {
            Layout::Sampled { sample_type, columns } => {
                let rate = channel.sampling_rate.map_or_else(|| "?".to_owned(), |r| r.to_string());
                format!("{} frames of {columns}x{sample_type} at {rate} Hz", channel.len())
            }
            Layout::Events => format!("{} events", channel.len()),
        };
        lines.push(format!("/{}/{}: {}, {shape}", entry.name, channel.name, channel.datatype));
        if !channel.units.is_empty() {
            lines.push(format!("    units: {}", channel.units));
        }
        lines.push(format!("    stored: {} of {} bytes", channel.stored_size(), channel.data_size()));
        lines.extend(channel.attrs.iter().map(|(k, v)| format!("    {k}: {v}")));
    }
    lines
}
