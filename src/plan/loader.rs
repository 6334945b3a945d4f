use std::fs;
use std::path::Path;

use tracing::debug;

use crate::plan::PlanError;
use crate::plan::types::RunSpec;

/// Parse a run specification from YAML text.
///
/// # Errors
///
/// Returns [`PlanError::Parse`] if the text is not a valid run specification.
pub fn parse(input: &str) -> Result<RunSpec, PlanError> {
    serde_yaml::from_str(input).map_err(|source| PlanError::Parse {
        origin: "<input>".into(),
        source,
    })
}

/// Load a run specification from a YAML file. An unnamed specification
/// takes the file stem as its name.
///
/// # Errors
///
/// Returns [`PlanError::Io`] if the file cannot be read and
/// [`PlanError::Parse`] if its contents are invalid.
pub fn load(path: &Path) -> Result<RunSpec, PlanError> {
    let origin = path.display().to_string();
    let input = fs::read_to_string(path).map_err(|source| PlanError::Io {
        path: origin.clone(),
        source,
    })?;
    let mut spec: RunSpec =
        serde_yaml::from_str(&input).map_err(|source| PlanError::Parse { origin, source })?;
    if spec.name.is_empty()
        && let Some(stem) = path.file_stem()
    {
        spec.name = stem.to_string_lossy().into_owned();
    }
    debug!(path = %path.display(), nodes = spec.nodes.len(), "loaded run spec");
    Ok(spec)
}
