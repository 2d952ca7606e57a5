//! Capability Library
//!
//! Persistent registry of generated capabilities.
//!
//! # Layout
//!
//! ```text
//! <root>/registry.json          {"tools": [CapabilityEntry, ...]}
//! <root>/generated/<name>.rhai  one artifact per capability
//! ```
//!
//! # Consistency
//!
//! Every write goes through a temp file + rename. Mutations order their steps so the
//! index never names an artifact that is missing; artifacts the index does not name
//! are swept by the next `open`.

use rhai::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::script::{sandboxed_engine, ScriptCapability, ScriptLimits};
use super::types::{
    validate_name, CapabilityDescriptor, CapabilityEntry, CapabilitySummary, NameError,
    NewCapability,
};

const REGISTRY_FILE: &str = "registry.json";
const GENERATED_DIR: &str = "generated";
const ARTIFACT_EXT: &str = "rhai";
const TMP_EXT: &str = "tmp";

/// Library errors
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt registry {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("Capability '{0}' not found")]
    NotFound(String),

    #[error("Capability '{name}' failed to load: {reason}")]
    Unloadable { name: String, reason: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LibraryError + '_ {
    move |source| LibraryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    #[serde(default)]
    tools: Vec<CapabilityEntry>,
}

/// An entry `load` could not materialize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Live capabilities produced by `CapabilityLibrary::load`
#[derive(Debug, Clone, Default)]
pub struct LoadedCapabilities {
    capabilities: Vec<Arc<ScriptCapability>>,
    /// Entries skipped fail-open, with the reason
    pub skipped: Vec<SkippedEntry>,
}

impl LoadedCapabilities {
    /// Add a capability, replacing any with the same name
    pub fn insert(&mut self, cap: Arc<ScriptCapability>) {
        self.capabilities.retain(|c| c.name() != cap.name());
        self.capabilities.push(cap);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ScriptCapability>> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ScriptCapability>> {
        self.capabilities.iter()
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities.iter().map(|c| c.descriptor().clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    /// `(name, example)` for every capability that ships a usage example
    pub fn usage_examples(&self) -> Vec<(&str, &str)> {
        self.capabilities
            .iter()
            .filter_map(|c| c.usage_example().map(|ex| (c.name(), ex)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// Persistent capability registry
pub struct CapabilityLibrary {
    root: PathBuf,
    engine: Arc<Engine>,
}

impl CapabilityLibrary {
    /// Open (or create) a library rooted at `root`, sweeping crash leftovers
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        Self::open_with_limits(root, ScriptLimits::default())
    }

    /// Open with custom script limits
    pub fn open_with_limits(
        root: impl Into<PathBuf>,
        limits: ScriptLimits,
    ) -> Result<Self, LibraryError> {
        let root = root.into();
        let generated = root.join(GENERATED_DIR);
        fs::create_dir_all(&generated).map_err(io_err(&generated))?;

        let library = Self {
            root,
            engine: Arc::new(sandboxed_engine(&limits)),
        };
        library.sweep()?;

        info!("Opened capability library at {}", library.root.display());
        Ok(library)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    fn artifact_rel(name: &str) -> String {
        format!("{}/{}.{}", GENERATED_DIR, name, ARTIFACT_EXT)
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(Self::artifact_rel(name))
    }

    fn read_index(&self) -> Result<RegistryIndex, LibraryError> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(RegistryIndex::default());
        }
        let content = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_json::from_str(&content).map_err(|source| LibraryError::Corrupt { path, source })
    }

    fn write_index(&self, index: &RegistryIndex) -> Result<(), LibraryError> {
        let path = self.registry_path();
        let mut content = serde_json::to_string_pretty(index)
            .map_err(|source| LibraryError::Corrupt {
                path: path.clone(),
                source,
            })?;
        content.push('\n');
        write_atomic(&path, content.as_bytes())
    }

    /// Remove temp files and artifacts the index does not reference
    fn sweep(&self) -> Result<(), LibraryError> {
        let stale_index = self.registry_path().with_extension(format!("json.{}", TMP_EXT));
        if stale_index.exists() {
            fs::remove_file(&stale_index).map_err(io_err(&stale_index))?;
        }

        let index = match self.read_index() {
            Ok(index) => index,
            Err(e) => {
                error!("Skipping artifact sweep: {}", e);
                return Ok(());
            }
        };
        let referenced: HashSet<PathBuf> = index
            .tools
            .iter()
            .map(|e| self.root.join(&e.file))
            .collect();

        let generated = self.root.join(GENERATED_DIR);
        let entries = fs::read_dir(&generated).map_err(io_err(&generated))?;
        for dir_entry in entries {
            let path = dir_entry.map_err(io_err(&generated))?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

            let orphan = ext == TMP_EXT || (ext == ARTIFACT_EXT && !referenced.contains(&path));
            if orphan {
                warn!("Removing orphaned library file {}", path.display());
                fs::remove_file(&path).map_err(io_err(&path))?;
            }
        }

        Ok(())
    }

    /// All registry entries, verified or not
    pub fn list(&self) -> Result<Vec<CapabilityEntry>, LibraryError> {
        Ok(self.read_index()?.tools)
    }

    /// Entry for `name`, if registered
    pub fn get(&self, name: &str) -> Result<Option<CapabilityEntry>, LibraryError> {
        Ok(self.read_index()?.tools.into_iter().find(|e| e.name == name))
    }

    /// Materialize every verified entry.
    ///
    /// Entries that fail to load are skipped and logged; a corrupt index yields an
    /// empty set.
    pub fn load(&self) -> LoadedCapabilities {
        let mut loaded = LoadedCapabilities::default();

        let index = match self.read_index() {
            Ok(index) => index,
            Err(e) => {
                error!("Capability registry unreadable, loading no capabilities: {}", e);
                return loaded;
            }
        };

        for entry in index.tools.iter().filter(|e| e.verified) {
            match self.materialize(entry) {
                Ok(cap) => loaded.insert(Arc::new(cap)),
                Err(reason) => {
                    warn!("Skipping capability '{}': {}", entry.name, reason);
                    loaded.skipped.push(SkippedEntry {
                        name: entry.name.clone(),
                        reason,
                    });
                }
            }
        }

        debug!(
            "Loaded {} capabilities ({} skipped)",
            loaded.len(),
            loaded.skipped.len()
        );
        loaded
    }

    /// Materialize one entry regardless of its verified flag
    pub fn load_entry(&self, name: &str) -> Result<Arc<ScriptCapability>, LibraryError> {
        let entry = self
            .get(name)?
            .ok_or_else(|| LibraryError::NotFound(name.to_string()))?;

        self.materialize(&entry)
            .map(Arc::new)
            .map_err(|reason| LibraryError::Unloadable {
                name: name.to_string(),
                reason,
            })
    }

    fn materialize(&self, entry: &CapabilityEntry) -> Result<ScriptCapability, String> {
        validate_name(&entry.name).map_err(|e| e.to_string())?;

        let expected = Self::artifact_rel(&entry.name);
        if entry.file != expected {
            return Err(format!("unexpected artifact path '{}'", entry.file));
        }

        let path = self.root.join(&entry.file);
        let source = fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

        if let Some(ref recorded) = entry.sha256 {
            if *recorded != digest(&source) {
                return Err("artifact digest mismatch".to_string());
            }
        }

        let cap = ScriptCapability::compile(Arc::clone(&self.engine), &source)
            .map_err(|e| e.to_string())?;
        if cap.name() != entry.name {
            return Err(format!("artifact defines '{}'", cap.name()));
        }

        Ok(cap)
    }

    /// Register a capability, replacing any prior entry of the same name.
    ///
    /// The new entry starts unverified; see `mark_verified`.
    pub fn register(&self, new: NewCapability) -> Result<CapabilityEntry, LibraryError> {
        validate_name(&new.name)?;

        let mut index = self.read_index()?;
        if let Some(pos) = index.tools.iter().position(|e| e.name == new.name) {
            let prior = index.tools.remove(pos);
            self.write_index(&index)?;
            self.delete_artifact(&prior.name)?;
            info!("Replacing capability '{}'", prior.name);
        }

        let path = self.artifact_path(&new.name);
        write_atomic(&path, new.source.as_bytes())?;

        let entry = CapabilityEntry {
            name: new.name.clone(),
            file: Self::artifact_rel(&new.name),
            generated_from_task: new.task_id,
            generated_by_model: new.generator_model,
            verified: false,
            verified_with_model: String::new(),
            created_at: chrono::Utc::now(),
            sha256: Some(digest(&new.source)),
        };
        index.tools.push(entry.clone());
        self.write_index(&index)?;

        info!("Registered capability '{}' from task '{}'", entry.name, entry.generated_from_task);
        Ok(entry)
    }

    /// Mark an entry verified. Returns false if the name is not registered.
    pub fn mark_verified(&self, name: &str, verified_with_model: &str) -> Result<bool, LibraryError> {
        let mut index = self.read_index()?;
        let Some(entry) = index.tools.iter_mut().find(|e| e.name == name) else {
            return Ok(false);
        };
        entry.verified = true;
        entry.verified_with_model = verified_with_model.to_string();
        self.write_index(&index)?;

        info!("Capability '{}' verified with {}", name, verified_with_model);
        Ok(true)
    }

    /// Remove an entry and its artifact. Removing an absent name is a no-op.
    pub fn remove(&self, name: &str) -> Result<bool, LibraryError> {
        let mut index = self.read_index()?;
        let before = index.tools.len();
        index.tools.retain(|e| e.name != name);
        let existed = index.tools.len() != before;

        if existed {
            self.write_index(&index)?;
        }
        if validate_name(name).is_ok() {
            self.delete_artifact(name)?;
        }

        if existed {
            info!("Removed capability '{}'", name);
        }
        Ok(existed)
    }

    fn delete_artifact(&self, name: &str) -> Result<(), LibraryError> {
        let path = self.artifact_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Name and description of every loadable verified capability
    pub fn summaries(&self) -> Vec<CapabilitySummary> {
        self.load()
            .iter()
            .map(|c| CapabilitySummary {
                name: c.name().to_string(),
                description: c.descriptor().description.clone(),
            })
            .collect()
    }
}

/// SHA-256 hex digest of artifact source
pub fn digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Write via a sibling temp file and rename over the target
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LibraryError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{}.{}", file_name, TMP_EXT));

    let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SHOUT: &str = r#"
const SCHEMA = #{ "type": "function", "function": #{ "name": "shout", "description": "Upper-case" } };
fn shout(args) { let t = args.text; t.to_upper() }
"#;

    fn new_shout() -> NewCapability {
        NewCapability {
            name: "shout".to_string(),
            source: SHOUT.to_string(),
            task_id: "task_a".to_string(),
            generator_model: "gpt-4o".to_string(),
        }
    }

    #[test]
    fn test_open_sweeps_orphans() {
        let temp = TempDir::new().unwrap();
        let generated = temp.path().join(GENERATED_DIR);
        fs::create_dir_all(&generated).unwrap();
        fs::write(generated.join("stray.rhai"), "fn stray(a) { a }").unwrap();
        fs::write(generated.join("half.rhai.tmp"), "partial").unwrap();
        fs::write(temp.path().join("registry.json.tmp"), "{").unwrap();

        let _library = CapabilityLibrary::open(temp.path()).unwrap();

        assert!(!generated.join("stray.rhai").exists());
        assert!(!generated.join("half.rhai.tmp").exists());
        assert!(!temp.path().join("registry.json.tmp").exists());
    }

    #[test]
    fn test_open_keeps_registered_artifacts() {
        let temp = TempDir::new().unwrap();
        {
            let library = CapabilityLibrary::open(temp.path()).unwrap();
            library.register(new_shout()).unwrap();
        }
        let _reopened = CapabilityLibrary::open(temp.path()).unwrap();
        assert!(temp.path().join("generated/shout.rhai").exists());
    }

    #[test]
    fn test_digest_mismatch_is_skipped() {
        let temp = TempDir::new().unwrap();
        let library = CapabilityLibrary::open(temp.path()).unwrap();
        library.register(new_shout()).unwrap();
        library.mark_verified("shout", "gpt-4o-mini").unwrap();

        fs::write(
            temp.path().join("generated/shout.rhai"),
            SHOUT.replace("to_upper", "to_lower"),
        )
        .unwrap();

        let loaded = library.load();
        assert!(loaded.is_empty());
        assert_eq!(loaded.skipped[0].reason, "artifact digest mismatch");
    }

    #[test]
    fn test_corrupt_index_loads_nothing_but_refuses_writes() {
        let temp = TempDir::new().unwrap();
        let library = CapabilityLibrary::open(temp.path()).unwrap();
        fs::write(temp.path().join(REGISTRY_FILE), "{ not json").unwrap();

        assert!(library.load().is_empty());
        assert!(matches!(library.register(new_shout()), Err(LibraryError::Corrupt { .. })));
    }

    #[test]
    fn test_register_rejects_bad_name() {
        let temp = TempDir::new().unwrap();
        let library = CapabilityLibrary::open(temp.path()).unwrap();
        let mut bad = new_shout();
        bad.name = "../../etc/passwd".to_string();
        assert!(matches!(library.register(bad), Err(LibraryError::Name(_))));
    }

    #[test]
    fn test_load_entry_ignores_verified_flag() {
        let temp = TempDir::new().unwrap();
        let library = CapabilityLibrary::open(temp.path()).unwrap();
        library.register(new_shout()).unwrap();

        assert!(library.load().is_empty());
        let cap = library.load_entry("shout").unwrap();
        assert_eq!(cap.invoke(&serde_json::json!({"text": "hi"})).unwrap(), "HI");
        assert!(matches!(library.load_entry("ghost"), Err(LibraryError::NotFound(_))));
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(digest("abc"), digest("abc"));
        assert_ne!(digest("abc"), digest("abd"));
        assert_eq!(digest("").len(), 64);
    }
}
