//! Attribute propagation between the command line, external files and the
//! container.
//!
//! On ingest, attributes given on the command line land on every entry
//! created by the invocation; the datatype and units land on the channel.
//! On extract, the destination plugin receives the entry attributes,
//! overlaid by the channel attributes, overlaid by the structural keys it
//! needs to lay the data out.

use crate::data::{AttrValue, Attributes, DataType, Timestamp};
use crate::error::{ArfxError, Result};
use crate::index::{ChannelRecord, EntryRecord, Layout};

/// Channel attribute naming the external file an entry was read from.
pub const SOURCE_FILE: &str = "source_file";
/// Channel attribute holding the entry index within that file.
pub const SOURCE_ENTRY: &str = "source_entry";

/// Metadata applied uniformly to everything created by one ingest run.
#[derive(Debug, Clone, Default)]
pub struct IngestMetadata {
    pub datatype:    DataType,
    pub units:       String,
    /// Replaces the timestamp reported by the source file.
    pub timestamp:   Option<Timestamp>,
    pub entry_attrs: Attributes,
}

impl IngestMetadata {
    /// Timestamp for a new entry: the override, then the source's own
    /// timestamp, then the current time.
    pub fn entry_timestamp(&self, source: Option<Timestamp>) -> Timestamp {
        self.timestamp.or(source).unwrap_or_else(Timestamp::now)
    }

    /// Channel attributes recording where the data came from.
    pub fn channel_attrs(&self, source_file: &str, source_entry: usize) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(SOURCE_FILE.into(), AttrValue::Text(source_file.to_owned()));
        attrs.insert(SOURCE_ENTRY.into(), AttrValue::Int(source_entry as i64));
        attrs
    }
}

/// Split `key=value`.  The value is kept verbatim as text.
pub fn parse_key_value(arg: &str) -> Result<(String, AttrValue)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), AttrValue::Text(value.to_owned())))
        }
        _ => Err(ArfxError::InvalidArgument(format!("'{arg}' is not of the form key=value"))),
    }
}

/// Attributes handed to a destination plugin's `open` for one channel.
pub fn extract_attrs(entry: &EntryRecord, channel: &ChannelRecord) -> Attributes {
    let mut attrs = entry.attrs.clone();
    attrs.extend(channel.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));

    if let Some(rate) = channel.sampling_rate {
        attrs.insert("sampling_rate".into(), AttrValue::Float(rate));
    }
    if let Layout::Sampled { sample_type, columns } = channel.layout {
        attrs.insert("dtype".into(), AttrValue::Text(sample_type.name().to_owned()));
        attrs.insert("nchannels".into(), AttrValue::Int(columns as i64));
    }
    if !channel.units.is_empty() {
        attrs.insert("units".into(), AttrValue::Text(channel.units.clone()));
    }
    attrs.insert("datatype".into(), AttrValue::Int(channel.datatype.0 as i64));
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleType;
    use uuid::Uuid;

    #[test]
    fn key_value_is_verbatim_text() {
        assert_eq!(parse_key_value("pen=1").unwrap(), ("pen".into(), AttrValue::Text("1".into())));
        assert_eq!(parse_key_value("note=a=b").unwrap().1, AttrValue::Text("a=b".into()));
        assert_eq!(parse_key_value("empty=").unwrap().1, AttrValue::Text(String::new()));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn structural_keys_win_over_attributes() {
        let mut entry_attrs = Attributes::new();
        entry_attrs.insert("bird".into(), "C194".into());
        entry_attrs.insert("sampling_rate".into(), "bogus".into());
        let mut channel_attrs = Attributes::new();
        channel_attrs.insert("bird".into(), "C200".into());

        let channel = ChannelRecord {
            name:          "pcm".into(),
            datatype:      DataType::EXTRAC_HP,
            sampling_rate: Some(30000.0),
            units:         "mV".into(),
            layout:        Layout::Sampled { sample_type: SampleType::I16, columns: 4 },
            blocks:        Vec::new(),
            attrs:         channel_attrs,
        };
        let entry = EntryRecord {
            name:      "e".into(),
            uuid:      Uuid::new_v4(),
            timestamp: Timestamp::new(0, 0),
            attrs:     entry_attrs,
            channels:  vec![channel.clone()],
        };

        let attrs = extract_attrs(&entry, &channel);
        assert_eq!(attrs["bird"].to_string(), "C200");
        assert_eq!(attrs["sampling_rate"], AttrValue::Float(30000.0));
        assert_eq!(attrs["dtype"].to_string(), "i16");
        assert_eq!(attrs["nchannels"], AttrValue::Int(4));
        assert_eq!(attrs["units"].to_string(), "mV");
        assert_eq!(attrs["datatype"], AttrValue::Int(2));
    }

    #[test]
    fn timestamp_override_takes_precedence() {
        let meta = IngestMetadata { timestamp: Some(Timestamp::new(5, 0)), ..Default::default() };
        assert_eq!(meta.entry_timestamp(Some(Timestamp::new(9, 0))), Timestamp::new(5, 0));
        let meta = IngestMetadata::default();
        assert_eq!(meta.entry_timestamp(Some(Timestamp::new(9, 0))), Timestamp::new(9, 0));
    }
}
