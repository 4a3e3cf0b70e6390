// kiln-core/src/options.rs
use std::collections::BTreeMap;

use kiln_common::error::{KilnError, Result};
use kiln_common::model::formula::Formula;
use kiln_common::model::options::ResolvedConfig;
use tracing::debug;

/// Resolves `--with-x` / `--without-x` requests into a canonical
/// configuration holding one value per declared option.
///
/// Deprecated spellings map to their replacement first. `--without-x` turns a
/// declared `with-x` off and `--with-x` turns a declared `without-x` off.
/// Asking for the same canonical option twice is accepted only when the
/// spelling and value agree.
pub fn resolve_options<S: AsRef<str>>(formula: &Formula, requested: &[S]) -> Result<ResolvedConfig> {
    let mut config =
        ResolvedConfig::with_declared(formula.options.iter().map(|o| o.name.as_str()));
    // canonical name -> (spelling used, value)
    let mut seen: BTreeMap<String, (String, bool)> = BTreeMap::new();

    for raw in requested {
        let raw = raw.as_ref();
        let flag = raw.strip_prefix("--").unwrap_or(raw);
        let (canonical, value) = canonicalize(formula, flag).ok_or_else(|| KilnError::UnknownOption {
            formula: formula.name.clone(),
            option: raw.to_string(),
        })?;

        if let Some((previous, previous_value)) = seen.get(&canonical) {
            if previous != flag || *previous_value != value {
                return Err(KilnError::OptionConflict {
                    formula: formula.name.clone(),
                    detail: format!("'--{previous}' and '--{flag}' both set '{canonical}'"),
                });
            }
            continue;
        }
        debug!("Option '--{}' resolves to {}={}", flag, canonical, value);
        config.set(&canonical, value);
        seen.insert(canonical, (flag.to_string(), value));
    }
    Ok(config)
}

// Finds the declared option a flag refers to and the value it assigns.
fn canonicalize(formula: &Formula, flag: &str) -> Option<(String, bool)> {
    let (stem, on) = if let Some(stem) = flag.strip_prefix("without-") {
        (stem, false)
    } else if let Some(stem) = flag.strip_prefix("with-") {
        (stem, true)
    } else {
        return None;
    };
    if stem.is_empty() {
        return None;
    }

    let candidates = [(format!("with-{stem}"), on), (format!("without-{stem}"), !on)];
    for (spelling, value) in candidates {
        let canonical = formula.canonical_option_name(&spelling);
        if formula.option(canonical).is_some() {
            return Some((canonical.to_string(), value));
        }
    }
    None
}
