//! Applying registered fixes to workflow source.

use crate::finding::Fix;

/// Applies `fixes` in registration order against `source`.
///
/// Each fix's patches are applied together; a fix that no longer applies
/// (its route vanished, or its fragment was already rewritten by an
/// earlier fix) is skipped rather than failing the whole pass.
pub fn apply_fixes(source: &str, fixes: &[Fix]) -> String {
    let mut current = source.to_string();
    for fix in fixes {
        match yamlcst::patch::apply_all(&current, &fix.patches) {
            Ok(next) => current = next,
            Err(err) => {
                tracing::debug!(rule = fix.rule, "skipping fix ({err})");
            }
        }
    }
    current
}
