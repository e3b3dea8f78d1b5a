//! Create and append: read external files into new entries.

use std::path::Path;

use tracing::debug;

use super::{Dispatcher, Report};
use crate::container::{Container, NewChannel, OpenMode};
use crate::data::Payload;
use crate::error::{ArfxError, Result};
use crate::formats::{IoMode, OpenedFormat};
use crate::naming::EntryNamer;

/// Every ingested entry holds a single sampled channel with this name.
pub const PCM_CHANNEL: &str = "pcm";

/// An input that opened successfully during planning.
struct Source {
    file:     String,
    base:     String,
    nentries: usize,
}

fn file_stem(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_owned())
}

impl Dispatcher {
    pub(super) fn ingest(&mut self, path: &Path, files: &[String], append: bool) -> Result<Report> {
        let mut arf = if append {
            Container::open_with(path, OpenMode::ReadWrite, self.container_options())?
        } else {
            Container::create(path, self.container_options())?
        };
        let mut report = Report::default();

        // Count entries per base first so single-entry bases keep their bare
        // name and padding covers the whole invocation.
        let mut sources = Vec::with_capacity(files.len());
        for file in files {
            match self.probe(file) {
                Ok(nentries) => sources.push(Source {
                    file:     file.clone(),
                    base:     self.options.name.clone().unwrap_or_else(|| file_stem(file)),
                    nentries,
                }),
                Err(e) => report.fail(file.as_str(), e),
            }
        }

        let mut namer = EntryNamer::new();
        if append {
            let existing = arf.entry_names();
            namer.seed_existing(existing.iter().map(String::as_str));
        }
        for source in &sources {
            namer.plan(&source.base, source.nentries);
        }
        self.start_progress(sources.iter().map(|s| s.nentries).sum());

        for source in &sources {
            self.ingest_source(&mut arf, source, &mut namer, append, &mut report);
        }

        arf.close()?;
        Ok(report)
    }

    /// Open `file` once to learn how many entries it holds.
    fn probe(&self, file: &str) -> Result<usize> {
        let opened = self.registry.open(Path::new(file), IoMode::Read, &self.options.plugin_attrs)?;
        let n = opened.nentries();
        opened.close()?;
        Ok(n)
    }

    fn ingest_source(
        &self,
        arf:    &mut Container,
        source: &Source,
        namer:  &mut EntryNamer,
        append: bool,
        report: &mut Report,
    ) {
        let mut opened = match self.registry.open(Path::new(&source.file), IoMode::Read, &self.options.plugin_attrs) {
            Ok(o)  => o,
            Err(e) => {
                report.fail(source.file.as_str(), e);
                return;
            }
        };

        for index in 0..source.nentries {
            let item = format!("{}/{index}", source.file);
            let name = namer.next_name(&source.base);
            match self.ingest_entry(arf, &mut opened, source, index, &name, append) {
                Ok(()) => {
                    report.succeeded += 1;
                    self.echo(format!("{item} -> /{name}/{PCM_CHANNEL}"));
                }
                Err(e) => report.fail(item, e),
            }
            self.progress.inc(1);
        }

        if let Err(e) = opened.close() {
            report.fail(source.file.as_str(), e);
        }
    }

    fn ingest_entry(
        &self,
        arf:    &mut Container,
        opened: &mut OpenedFormat,
        source: &Source,
        index:  usize,
        name:   &str,
        append: bool,
    ) -> Result<()> {
        opened.select_entry(index)?;
        let data = opened.plugin.read()?.ok_or_else(|| {
            ArfxError::malformed(Path::new(&source.file), format!("entry {index} holds no data"))
        })?;
        let rate = opened.plugin.sampling_rate();
        let meta = &self.options.metadata;

        if append && arf.contains(name) {
            debug!(entry = name, frames = data.frames(), "appending to existing entry");
            return arf.append_samples(name, PCM_CHANNEL, rate, meta.datatype, &data);
        }

        let channel = NewChannel {
            name:          PCM_CHANNEL.to_owned(),
            datatype:      meta.datatype,
            sampling_rate: Some(rate),
            units:         meta.units.clone(),
            attrs:         meta.channel_attrs(&source.file, index),
            payload:       Payload::Sampled(data),
        };
        let timestamp = meta.entry_timestamp(opened.plugin.timestamp());
        arf.create_entry(name, timestamp, meta.entry_attrs.clone(), vec![channel])
    }
}
