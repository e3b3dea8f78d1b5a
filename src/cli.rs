//! Command-line arguments.
//!
//! Follows tar conventions: one operation flag, the container given with
//! `-f`, and short flags that combine (`arfx -cvf song.arf *.wav`).

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::compression::{Compression, DEFAULT_COMPRESSION_LEVEL};
use crate::data::{AttrValue, Attributes, DataType, Timestamp};
use crate::error::{ArfxError, Result};
use crate::metadata::{parse_key_value, IngestMetadata};
use crate::ops::{Operation, Options};

/// Move sampled and event data in and out of ARF containers
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "arfx", author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("operation")
        .args(["copy", "create", "append", "list", "extract", "delete", "update", "write_attr", "read_attr"])
        .multiple(false)
))]
#[command(after_help = "Examples:
  arfx -cvf song.arf a.wav b.wav      Create song.arf from two WAVE files
  arfx -rf song.arf -n trial c.pcm    Append c.pcm as entry 'trial'
  arfx -tf song.arf                   List entries and channels
  arfx -xf song.arf -C out/           Extract every sampled channel to out/
  arfx -df song.arf a                 Delete entry 'a' and repack
  arfx -Af all.arf one.arf two.arf/b  Copy all of one.arf and entry b of two.arf")]
pub struct Args {
    /// Copy entries from other containers (FILE or FILE/ENTRY)
    #[arg(short = 'A', long = "copy")]
    pub copy: bool,

    /// Create a new container from external files
    #[arg(short = 'c', long = "create")]
    pub create: bool,

    /// Append external files to an existing container
    #[arg(short = 'r', long = "append")]
    pub append: bool,

    /// List the contents of the container
    #[arg(short = 't', long = "list")]
    pub list: bool,

    /// Extract entries to external files
    #[arg(short = 'x', long = "extract")]
    pub extract: bool,

    /// Delete entries
    #[arg(short = 'd', long = "delete")]
    pub delete: bool,

    /// Update entry attributes (with -n and no entries: rename all)
    #[arg(short = 'U', long = "update")]
    pub update: bool,

    /// Store the text of each file as a top-level attribute user_<name>
    #[arg(long = "write-attr")]
    pub write_attr: bool,

    /// Print the user_<name> attribute for each file name
    #[arg(long = "read-attr")]
    pub read_attr: bool,

    /// Container to operate on
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Echo every processed item
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Entry base name, or output file template when extracting
    #[arg(short = 'n', long = "name", value_name = "NAME")]
    pub name: Option<String>,

    /// Extra entry attribute (repeatable)
    #[arg(short = 'k', value_name = "KEY=VALUE")]
    pub attrs: Vec<String>,

    /// Channel datatype, numeric or symbolic (see --help-datatypes)
    #[arg(short = 'T', long = "datatype", value_name = "DATATYPE")]
    pub datatype: Option<DataType>,

    /// Store blocks uncompressed
    #[arg(short = 'u', long = "uncompressed")]
    pub uncompressed: bool,

    /// Do not repack after deleting entries
    #[arg(short = 'P', long = "no-repack")]
    pub no_repack: bool,

    /// zstd compression level
    #[arg(short = 'z', long = "level", value_name = "LEVEL",
          value_parser = clap::value_parser!(i32).range(1..=22))]
    pub level: Option<i32>,

    /// Sampling rate of the input data, for formats that do not store one
    #[arg(short = 's', long = "sampling-rate", value_name = "HZ")]
    pub sampling_rate: Option<f64>,

    /// Animal attribute for new entries
    #[arg(short = 'a', long = "animal", value_name = "ANIMAL")]
    pub animal: Option<String>,

    /// Experimenter attribute for new entries
    #[arg(short = 'e', long = "experimenter", value_name = "EXPERIMENTER")]
    pub experimenter: Option<String>,

    /// Protocol attribute for new entries
    #[arg(short = 'p', long = "protocol", value_name = "PROTOCOL")]
    pub protocol: Option<String>,

    /// Units of the ingested channels
    #[arg(long = "units", value_name = "UNITS")]
    pub units: Option<String>,

    /// Override the entry timestamp (seconds since the epoch)
    #[arg(long = "timestamp", value_name = "SECONDS")]
    pub timestamp: Option<f64>,

    /// Directory extracted files are written to
    #[arg(short = 'C', long = "directory", value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// List the channel datatypes and exit
    #[arg(long = "help-datatypes")]
    pub help_datatypes: bool,

    /// Input files, entry names or attribute files, depending on the operation
    #[arg(value_name = "FILES/ENTRIES")]
    pub items: Vec<String>,
}

impl Args {
    /// The selected operation, if any.
    pub fn operation(&self) -> Option<Operation> {
        [
            (self.copy,       Operation::Copy),
            (self.create,     Operation::Create),
            (self.append,     Operation::Append),
            (self.list,       Operation::List),
            (self.extract,    Operation::Extract),
            (self.delete,     Operation::Delete),
            (self.update,     Operation::Update),
            (self.write_attr, Operation::WriteAttr),
            (self.read_attr,  Operation::ReadAttr),
        ]
        .into_iter()
        .find_map(|(set, op)| set.then_some(op))
    }

    /// Translate the flags into dispatcher options.
    pub fn to_options(&self) -> Result<Options> {
        let mut entry_attrs = Attributes::new();
        for (key, value) in [("animal", &self.animal), ("experimenter", &self.experimenter), ("protocol", &self.protocol)] {
            if let Some(v) = value {
                entry_attrs.insert(key.to_owned(), AttrValue::Text(v.clone()));
            }
        }
        for kv in &self.attrs {
            let (key, value) = parse_key_value(kv)?;
            entry_attrs.insert(key, value);
        }

        let timestamp = match self.timestamp {
            Some(t) if !t.is_finite() => {
                return Err(ArfxError::InvalidArgument(format!("{t} is not a valid timestamp")));
            }
            other => other.map(Timestamp::from_secs_f64),
        };

        let mut plugin_attrs = Attributes::new();
        if let Some(rate) = self.sampling_rate {
            if rate.is_nan() || rate <= 0.0 {
                return Err(ArfxError::InvalidArgument(format!("sampling rate must be positive, got {rate}")));
            }
            plugin_attrs.insert("sampling_rate".into(), AttrValue::Float(rate));
        }

        let compression = if self.uncompressed {
            Compression::NONE
        } else {
            Compression::zstd(self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL))
        };

        Ok(Options {
            verbose: self.verbose,
            name: self.name.clone(),
            metadata: IngestMetadata {
                datatype: self.datatype.unwrap_or_default(),
                units: self.units.clone().unwrap_or_default(),
                timestamp,
                entry_attrs,
            },
            compression,
            repack: !self.no_repack,
            output_dir: self.directory.clone().unwrap_or_else(|| PathBuf::from(".")),
            plugin_attrs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("arfx").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn combined_short_flags() {
        let args = parse(&["-cvf", "out.arf", "a.wav", "b.wav"]);
        assert_eq!(args.operation(), Some(Operation::Create));
        assert!(args.verbose);
        assert_eq!(args.file, Some(PathBuf::from("out.arf")));
        assert_eq!(args.items, vec!["a.wav", "b.wav"]);
    }

    #[test]
    fn operations_are_exclusive() {
        let err = Args::try_parse_from(["arfx", "-c", "-x", "-f", "a.arf"]);
        assert!(err.is_err());
    }

    #[test]
    fn metadata_flags_become_entry_attrs() {
        let args = parse(&["-c", "-f", "a.arf", "-k", "experimenter=smm3rc", "-k", "pen=1",
                           "-a", "C194", "-T", "EXTRAC_HP", "--units", "mV", "x.pcm"]);
        let opts = args.to_options().unwrap();
        let attrs = &opts.metadata.entry_attrs;
        assert_eq!(attrs["experimenter"], AttrValue::Text("smm3rc".into()));
        assert_eq!(attrs["pen"], AttrValue::Text("1".into()));
        assert_eq!(attrs["animal"], AttrValue::Text("C194".into()));
        assert_eq!(opts.metadata.datatype, DataType::EXTRAC_HP);
        assert_eq!(opts.metadata.units, "mV");
        assert!(opts.repack);
    }

    #[test]
    fn compression_flags() {
        assert_eq!(parse(&["-c", "-u", "-f", "a.arf"]).to_options().unwrap().compression, Compression::NONE);
        assert_eq!(parse(&["-c", "-z", "9", "-f", "a.arf"]).to_options().unwrap().compression, Compression::zstd(9));
        assert!(Args::try_parse_from(["arfx", "-c", "-z", "99", "-f", "a.arf"]).is_err());
    }

    #[test]
    fn bad_key_value_is_rejected() {
        let err = parse(&["-c", "-f", "a.arf", "-k", "oops"]).to_options().unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }
}
