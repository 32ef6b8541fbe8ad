//src/cache.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info};

/// Why an artifact has to be (re)computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Missing,
    Empty,
    /// An input was modified after the artifact was written
    OlderThan(PathBuf),
    /// The artifact was written with different placement settings
    ParamsChanged,
    Forced,
}

impl Staleness {
    pub fn needs_rebuild(&self) -> bool {
        *self != Staleness::Fresh
    }
}

/// Decides whether an output artifact can be reused.
///
/// Rule: an artifact is recomputed when it is missing, empty, older than
/// any of its inputs, written under other settings, or when `force` is set.
/// Inputs that cannot be stat'ed are treated as newer than the artifact.
///
/// Settings are compared through a `.params` file next to the artifact,
/// written by [`ArtifactCache::record`] once the artifact is complete.
#[derive(Debug, Clone, Default)]
pub struct ArtifactCache {
    force: bool,
    params: Option<String>,
}

/// `<artifact>.params`
pub fn params_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".params");
    PathBuf::from(name)
}

impl ArtifactCache {
    pub fn new(force: bool) -> Self {
        Self { force, params: None }
    }

    /// Also require the artifact to have been written with `params`.
    pub fn with_params<S: Into<String>>(mut self, params: S) -> Self {
        self.params = Some(params.into());
        self
    }

    /// Store the settings the artifact was just written with.
    pub fn record<P: AsRef<Path>>(&self, artifact: P) -> io::Result<()> {
        match &self.params {
            Some(params) => fs::write(params_path(artifact.as_ref()), params),
            None => Ok(()),
        }
    }

    pub fn check<P: AsRef<Path>, Q: AsRef<Path>>(&self, artifact: P, inputs: &[Q]) -> Staleness {
        let artifact = artifact.as_ref();
        if self.force {
            return Staleness::Forced;
        }

        let meta = match fs::metadata(artifact) {
            Ok(m) => m,
            Err(_) => return Staleness::Missing,
        };
        if meta.len() == 0 {
            return Staleness::Empty;
        }
        if let Some(params) = &self.params {
            match fs::read_to_string(params_path(artifact)) {
                Ok(recorded) if recorded == *params => {}
                _ => return Staleness::ParamsChanged,
            }
        }
        let written = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        for input in inputs {
            let input = input.as_ref();
            let changed = fs::metadata(input)
                .and_then(|m| m.modified())
                .map(|t| t > written)
                .unwrap_or(true);
            if changed {
                return Staleness::OlderThan(input.to_path_buf());
            }
        }
        Staleness::Fresh
    }

    /// `true` if the artifact must be recomputed; logs the reason.
    pub fn needs_rebuild<P: AsRef<Path>, Q: AsRef<Path>>(&self, artifact: P, inputs: &[Q]) -> bool {
        let artifact = artifact.as_ref();
        match self.check(artifact, inputs) {
            Staleness::Fresh => {
                info!("{} is up to date; skipping", artifact.display());
                false
            }
            Staleness::OlderThan(input) => {
                info!(
                    "{} is older than {}; recomputing",
                    artifact.display(),
                    input.display()
                );
                true
            }
            Staleness::ParamsChanged => {
                info!(
                    "{} was written with other settings; recomputing",
                    artifact.display()
                );
                true
            }
            other => {
                debug!("{}: {:?}", artifact.display(), other);
                true
            }
        }
    }
}
