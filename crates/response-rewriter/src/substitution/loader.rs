use std::collections::HashSet;
use std::path::Path;

use super::SubstitutionError;
use super::schema::SubstitutionConfig;

/// Load a [`SubstitutionConfig`] from a YAML file on disk.
pub fn load_substitutions(path: impl AsRef<Path>) -> Result<SubstitutionConfig, SubstitutionError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| SubstitutionError::Read {
        path: path.display().to_string(),
        source,
    })?;
    load_substitutions_from_str(&contents)
}

/// Parse and validate a [`SubstitutionConfig`] from a YAML string.
pub fn load_substitutions_from_str(yaml: &str) -> Result<SubstitutionConfig, SubstitutionError> {
    let config: SubstitutionConfig = serde_yml::from_str(yaml)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &SubstitutionConfig) -> Result<(), SubstitutionError> {
    if config.version != "1.0" {
        return Err(SubstitutionError::UnsupportedVersion(config.version.clone()));
    }

    let mut seen = HashSet::new();
    for rule in &config.rules {
        if rule.name.is_empty() {
            return Err(SubstitutionError::EmptyName);
        }
        if !seen.insert(&rule.name) {
            return Err(SubstitutionError::DuplicateName(rule.name.clone()));
        }
        if rule.patterns.is_empty() {
            return Err(SubstitutionError::NoPatterns(rule.name.clone()));
        }
    }

    Ok(())
}
