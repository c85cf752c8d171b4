//! Ownership labels and annotations
//!
//! Converge marks every resource it applies with ownership labels so the
//! live-state observer can find them and the diff engine can tell which
//! live-only resources are prune candidates. Annotations let individual
//! resources opt out of pruning or health evaluation.

use std::collections::BTreeMap;

/// Label identifying resources managed by Converge
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label
pub const MANAGED_BY_VALUE: &str = "converge";

/// Label carrying the owning environment name
pub const ENVIRONMENT_LABEL: &str = "converge.io/environment";

/// Annotation to opt a resource out of pruning (`"false"` keeps it)
pub const PRUNE_ANNOTATION: &str = "converge.io/prune";

/// Annotation to skip health evaluation for a resource
pub const SKIP_HEALTH_ANNOTATION: &str = "converge.io/skip-health";

/// Check whether a label set marks a resource as owned by the given environment
pub fn is_owned_by(labels: &BTreeMap<String, String>, environment: &str) -> bool {
    labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
        && labels.get(ENVIRONMENT_LABEL).map(String::as_str) == Some(environment)
}

/// Check whether an annotation set opts the resource out of pruning
pub fn keeps_on_prune(annotations: &BTreeMap<String, String>) -> bool {
    annotations.get(PRUNE_ANNOTATION).map(String::as_str) == Some("false")
}

/// Check whether an annotation set opts the resource out of health checks
pub fn skips_health(annotations: &BTreeMap<String, String>) -> bool {
    annotations.get(SKIP_HEALTH_ANNOTATION).map(String::as_str) == Some("true")
}

/// The label pairs Converge stamps on every applied resource
pub fn ownership_labels(environment: &str) -> Vec<(String, String)> {
    vec![
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (ENVIRONMENT_LABEL.to_string(), environment.to_string()),
    ]
}

/// Label selector matching resources owned by the given environment
pub fn ownership_selector(environment: &str) -> String {
    format!(
        "{}={},{}={}",
        MANAGED_BY_LABEL, MANAGED_BY_VALUE, ENVIRONMENT_LABEL, environment
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_is_owned_by() {
        let owned = labels(&[
            (MANAGED_BY_LABEL, MANAGED_BY_VALUE),
            (ENVIRONMENT_LABEL, "staging"),
        ]);
        assert!(is_owned_by(&owned, "staging"));
        assert!(!is_owned_by(&owned, "production"));

        let foreign = labels(&[(MANAGED_BY_LABEL, "helm"), (ENVIRONMENT_LABEL, "staging")]);
        assert!(!is_owned_by(&foreign, "staging"));

        assert!(!is_owned_by(&BTreeMap::new(), "staging"));
    }

    #[test]
    fn test_keeps_on_prune() {
        assert!(keeps_on_prune(&labels(&[(PRUNE_ANNOTATION, "false")])));
        assert!(!keeps_on_prune(&labels(&[(PRUNE_ANNOTATION, "true")])));
        assert!(!keeps_on_prune(&BTreeMap::new()));
    }

    #[test]
    fn test_ownership_selector() {
        let selector = ownership_selector("development");
        assert!(selector.contains("app.kubernetes.io/managed-by=converge"));
        assert!(selector.contains("converge.io/environment=development"));
    }
}
