use crate::models::tones::ToneConfig;
use anyhow::Context as _;
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// A tone config together with the version it was published under.
#[derive(Debug)]
pub struct ToneSnapshot {
    pub version: u64,
    pub config: ToneConfig,
}

/// Holder for the active tone vocabulary.
///
/// Readers take a snapshot once per operation, so a reload never changes the
/// tone set underneath an in-flight fan-out.
pub struct ToneCatalog {
    current: ArcSwap<ToneSnapshot>,
    latest_version: AtomicU64,
    source: Option<PathBuf>,
}

impl ToneCatalog {
    pub fn new(config: ToneConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(ToneSnapshot { version: 1, config }),
            latest_version: AtomicU64::new(1),
            source: None,
        }
    }

    /// Reads the catalog from `path`, or falls back to the built-in tones.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            info!("No tone config path set, using built-in tones");
            return Ok(Self::new(ToneConfig::builtin()));
        };
        let config = read_config(path)?;
        info!(path = %path.display(), tones = config.tones.len(), "Loaded tone config");
        Ok(Self {
            source: Some(path.to_owned()),
            ..Self::new(config)
        })
    }

    pub fn current(&self) -> Arc<ToneSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Publishes `config` as the new active catalog and returns its version.
    pub fn replace(&self, config: ToneConfig) -> u64 {
        let version = self.latest_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.current.store(Arc::new(ToneSnapshot { version, config }));
        version
    }

    /// Re-reads the source file. On failure the active catalog is kept.
    pub fn reload(&self) -> anyhow::Result<u64> {
        let Some(path) = self.source.as_deref() else {
            anyhow::bail!("tone catalog has no source file to reload from");
        };
        match read_config(path) {
            Ok(config) => {
                let version = self.replace(config);
                info!(path = %path.display(), version, "Reloaded tone config");
                Ok(version)
            }
            Err(e) => {
                warn!(path = %path.display(), "Tone config reload failed, keeping previous: {e:?}");
                Err(e)
            }
        }
    }
}

fn read_config(path: &Path) -> anyhow::Result<ToneConfig> {
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tone config {}", path.display()))?;
    ToneConfig::from_yaml(&document)
}
