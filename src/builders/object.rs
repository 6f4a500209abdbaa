use std::collections::BTreeMap;

use crate::core::config::StoredFilesExcludes;

/// Structural equality of two optional mappings.
///
/// An absent mapping only equals another absent mapping; in particular it is
/// not equal to an empty one.
pub fn are_equal<V: PartialEq>(
    left: Option<&BTreeMap<String, V>>,
    right: Option<&BTreeMap<String, V>>,
) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(left), Some(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, value)| right.get(key).is_some_and(|other| other == value))
        }
        _ => false,
    }
}

/// True when both layers of two `files.exclude` snapshots hold the same
/// mappings. The `key` field is not compared.
pub fn same_layers(left: &StoredFilesExcludes, right: &StoredFilesExcludes) -> bool {
    are_equal(left.global_value.as_ref(), right.global_value.as_ref())
        && are_equal(left.workspace_value.as_ref(), right.workspace_value.as_ref())
}
