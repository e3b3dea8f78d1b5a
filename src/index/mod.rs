use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::{Attributes, DataType, SampleType, Timestamp};

/// Location of one stored block in the container file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BlockRef {
    pub offset: u64,
    pub stored_size: u64,
    pub orig_size: u64,
}

/// Shape of a channel's payload.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Sampled { sample_type: SampleType, columns: u16 },
    Events,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelRecord {
    pub name: String,
    pub datatype: DataType,
    #[serde(default)]
    pub sampling_rate: Option<f64>,
    #[serde(default)]
    pub units: String,
    pub layout: Layout,
    pub blocks: Vec<BlockRef>,
    #[serde(default)]
    pub attrs: Attributes,
}

impl ChannelRecord {
    pub fn data_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.orig_size).sum()
    }

    pub fn stored_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.stored_size).sum()
    }

    /// Frames for sampled channels, event count for event channels.
    pub fn len(&self) -> u64 {
        match self.layout {
            Layout::Sampled { sample_type, columns } => {
                self.data_size() / (sample_type.size() as u64 * columns as u64)
            }
            Layout::Events => self.data_size() / 8,
        }
    }

    pub fn is_empty(&self) -> bool { self.data_size() == 0 }

    pub fn is_sampled(&self) -> bool {
        matches!(self.layout, Layout::Sampled { .. }) && !self.datatype.is_event()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EntryRecord {
    pub name: String,
    pub uuid: Uuid,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub attrs: Attributes,
    pub channels: Vec<ChannelRecord>,
}

impl EntryRecord {
    pub fn channel(&self, name: &str) -> Option<&ChannelRecord> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// The container's table of contents.  Entries are kept in creation order.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ContainerIndex {
    #[serde(default)]
    pub attrs: Attributes,
    pub entries: Vec<EntryRecord>,
}

impl ContainerIndex {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&EntryRecord> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut EntryRecord> {
        self.entries.iter_mut().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_survives_json() {
        let mut index = ContainerIndex::default();
        index.attrs.insert("user_notes.txt".into(), "hello".into());
        index.entries.push(EntryRecord {
            name: "song".into(),
            uuid: Uuid::new_v4(),
            timestamp: Timestamp::new(1_300_000_000, 5),
            attrs: Attributes::new(),
            channels: vec![ChannelRecord {
                name: "pcm".into(),
                datatype: DataType::ACOUSTIC,
                sampling_rate: Some(20000.0),
                units: String::new(),
                layout: Layout::Sampled { sample_type: SampleType::I16, columns: 2 },
                blocks: vec![BlockRef { offset: 64, stored_size: 10, orig_size: 40 }],
                attrs: Attributes::new(),
            }],
        });
        let back = ContainerIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        let ch = &back.get("song").unwrap().channels[0];
        assert_eq!(ch.len(), 10);
        assert!(ch.is_sampled());
        assert_eq!(back.attrs["user_notes.txt"].to_string(), "hello");
    }
}
