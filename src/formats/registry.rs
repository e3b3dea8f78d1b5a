//! Extension → plugin registry.
//!
//! Built at start-up from [`BUILTIN_FORMATS`] plus any externally supplied
//! descriptors.  Conflicts are detected when a descriptor is registered, not
//! when a path is resolved.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use super::{Capabilities, FormatDescriptor, FormatPlugin, IoMode, BUILTIN_FORMATS, FORMAT_API_VERSION};
use crate::data::Attributes;
use crate::error::{ArfxError, Result};

#[derive(Debug, Default, Clone)]
pub struct FormatRegistry {
    by_ext: BTreeMap<String, FormatDescriptor>,
}

/// A plugin instance together with the capabilities its descriptor declared.
pub struct OpenedFormat {
    pub format:       &'static str,
    pub capabilities: Capabilities,
    pub plugin:       Box<dyn FormatPlugin>,
}

impl OpenedFormat {
    /// Number of entries, honouring the `multi_entry` capability.
    pub fn nentries(&self) -> usize {
        if self.capabilities.multi_entry { self.plugin.nentries() } else { 1 }
    }

    pub fn select_entry(&mut self, index: usize) -> Result<()> {
        if self.capabilities.multi_entry {
            self.plugin.set_entry(index)
        } else if index == 0 {
            Ok(())
        } else {
            Err(ArfxError::InvalidArgument(format!("{} files hold a single entry", self.format)))
        }
    }

    pub fn close(self) -> Result<()> {
        self.plugin.close()
    }
}

impl FormatRegistry {
    /// An empty registry.
    pub fn new() -> Self { Self::default() }

    /// Registry holding the built-in formats.
    pub fn builtin() -> Result<Self> {
        Self::with_formats(BUILTIN_FORMATS.iter().copied())
    }

    /// Built-ins followed by externally supplied descriptors.
    pub fn builtin_with<I: IntoIterator<Item = FormatDescriptor>>(extra: I) -> Result<Self> {
        Self::with_formats(BUILTIN_FORMATS.iter().copied().chain(extra))
    }

    /// Registry holding exactly `formats`, validated in order.
    pub fn with_formats<I: IntoIterator<Item = FormatDescriptor>>(formats: I) -> Result<Self> {
        let mut registry = Self::new();
        for desc in formats {
            registry.register(desc)?;
        }
        Ok(registry)
    }

    /// Register a descriptor for all of its extensions.
    ///
    /// # Errors
    /// `Registry` if the descriptor targets a newer API, lists a malformed
    /// extension, or claims an extension owned by a different plugin.  No
    /// extension is registered when an error is returned.
    pub fn register(&mut self, desc: FormatDescriptor) -> Result<()> {
        if desc.api_version > FORMAT_API_VERSION {
            return Err(ArfxError::Registry(format!(
                "plugin '{}' targets API version {}, host supports {}",
                desc.name, desc.api_version, FORMAT_API_VERSION
            )));
        }
        if desc.extensions.is_empty() {
            return Err(ArfxError::Registry(format!("plugin '{}' declares no extensions", desc.name)));
        }

        let mut keys = Vec::with_capacity(desc.extensions.len());
        for ext in desc.extensions {
            if ext.len() < 2 || !ext.starts_with('.') {
                return Err(ArfxError::Registry(format!(
                    "plugin '{}': extension '{ext}' must start with '.'", desc.name
                )));
            }
            let key = ext.to_lowercase();
            if let Some(existing) = self.by_ext.get(&key) {
                if existing.name != desc.name {
                    return Err(ArfxError::Registry(format!(
                        "extension '{key}' is claimed by both '{}' and '{}'", existing.name, desc.name
                    )));
                }
            }
            keys.push(key);
        }
        for key in keys {
            debug!(extension = %key, plugin = desc.name, "registered format");
            self.by_ext.insert(key, desc);
        }
        Ok(())
    }

    /// Find the plugin for `path` by case-insensitive suffix match; the
    /// longest matching extension wins.
    pub fn resolve(&self, path: &Path) -> Result<&FormatDescriptor> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.by_ext
            .iter()
            .filter(|(ext, _)| file_name.len() > ext.len() && file_name.ends_with(ext.as_str()))
            .max_by_key(|(ext, _)| ext.len())
            .map(|(_, desc)| desc)
            .ok_or_else(|| ArfxError::UnsupportedFormat { path: path.to_owned() })
    }

    pub fn open(&self, path: &Path, mode: IoMode, attrs: &Attributes) -> Result<OpenedFormat> {
        let desc = self.resolve(path)?;
        let plugin = (desc.open)(path, mode, attrs)?;
        debug!(path = %path.display(), format = desc.name, mode = mode.name(), "opened external file");
        Ok(OpenedFormat { format: desc.name, capabilities: desc.capabilities, plugin })
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<&str> {
        self.by_ext.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampledData, Timestamp};

    struct Null;
    impl FormatPlugin for Null {
        fn read(&mut self) -> Result<Option<SampledData>> { Ok(None) }
        fn write(&mut self, _: &SampledData) -> Result<()> { Ok(()) }
        fn timestamp(&self) -> Option<Timestamp> { None }
        fn sampling_rate(&self) -> f64 { 1.0 }
        fn close(self: Box<Self>) -> Result<()> { Ok(()) }
    }

    fn open_null(_: &Path, _: IoMode, _: &Attributes) -> Result<Box<dyn FormatPlugin>> {
        Ok(Box::new(Null))
    }

    const NULL_WAV: FormatDescriptor = FormatDescriptor {
        name: "null",
        api_version: FORMAT_API_VERSION,
        extensions: &[".WAV"],
        capabilities: Capabilities { multi_entry: false, settable_timestamp: false },
        open: open_null,
    };

    #[test]
    fn builtin_extensions() {
        let reg = FormatRegistry::builtin().unwrap();
        assert_eq!(reg.extensions(), vec![".mda", ".pcm", ".wav"]);
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let reg = FormatRegistry::builtin().unwrap();
        assert_eq!(reg.resolve(Path::new("/data/Song.WAV")).unwrap().name, "wav");
        assert_eq!(reg.resolve(Path::new("x.pcm")).unwrap().name, "pcm");
        let err = reg.resolve(Path::new("notes.txt")).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");
        assert!(reg.resolve(Path::new(".wav")).is_err());
    }

    #[test]
    fn conflicting_registration_fails_at_load() {
        let mut reg = FormatRegistry::builtin().unwrap();
        let err = reg.register(NULL_WAV).unwrap_err();
        assert_eq!(err.kind(), "RegistryError");
        assert_eq!(reg.resolve(Path::new("a.wav")).unwrap().name, "wav");
    }

    #[test]
    fn same_identity_may_reregister() {
        let mut reg = FormatRegistry::new();
        reg.register(NULL_WAV).unwrap();
        reg.register(NULL_WAV).unwrap();
        assert_eq!(reg.extensions(), vec![".wav"]);
    }

    #[test]
    fn newer_api_is_rejected() {
        let mut reg = FormatRegistry::new();
        let desc = FormatDescriptor { api_version: FORMAT_API_VERSION + 1, ..NULL_WAV };
        assert!(reg.register(desc).is_err());
    }

    #[test]
    fn longest_suffix_wins() {
        let mut reg = FormatRegistry::builtin().unwrap();
        let seq = FormatDescriptor { name: "pcmseq", extensions: &[".seq.pcm"], ..NULL_WAV };
        reg.register(seq).unwrap();
        assert_eq!(reg.resolve(Path::new("song.seq.pcm")).unwrap().name, "pcmseq");
        assert_eq!(reg.resolve(Path::new("song.pcm")).unwrap().name, "pcm");
    }
}
