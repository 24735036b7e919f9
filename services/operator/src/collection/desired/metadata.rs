//! Object metadata for rebuilt objects.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kiln_api::naming::{self, REVISION_ANNOTATION};
use kube::Resource;

use crate::collection::Observed;

/// Fresh metadata for an object owned by the observed environment.
pub(crate) fn owned_meta(observed: &Observed, name: String, component: &str) -> ObjectMeta {
    let mut labels = naming::environment_labels(&observed.key.name);
    labels.insert("kiln.dev/component".to_string(), component.to_string());

    ObjectMeta {
        name: Some(name),
        namespace: Some(observed.key.namespace.clone()),
        labels: Some(labels),
        annotations: Some(revision_annotations(observed)),
        owner_references: observed
            .environment
            .controller_owner_ref(&())
            .map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// Annotations carrying the revision an object is built for.
pub(crate) fn revision_annotations(observed: &Observed) -> BTreeMap<String, String> {
    BTreeMap::from([(
        REVISION_ANNOTATION.to_string(),
        observed.revision().unwrap_or_default().to_string(),
    )])
}

/// Merge labels and annotations already present on the cluster object into
/// `desired`.
///
/// Existing entries are kept, except the revision annotation, which always
/// takes the desired value. The resource version is carried over so updates
/// are rejected on concurrent modification.
pub(crate) fn merge_existing(desired: &mut ObjectMeta, existing: Option<&ObjectMeta>) {
    let Some(existing) = existing else {
        return;
    };

    desired.labels = merge_map(desired.labels.take(), existing.labels.as_ref(), None);
    desired.annotations = merge_map(
        desired.annotations.take(),
        existing.annotations.as_ref(),
        Some(REVISION_ANNOTATION),
    );
    desired.resource_version = existing.resource_version.clone();
}

fn merge_map(
    desired: Option<BTreeMap<String, String>>,
    existing: Option<&BTreeMap<String, String>>,
    desired_wins: Option<&str>,
) -> Option<BTreeMap<String, String>> {
    let Some(existing) = existing else {
        return desired;
    };

    let mut merged = desired.unwrap_or_default();
    for (key, value) in existing {
        if Some(key.as_str()) == desired_wins && merged.contains_key(key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(
        labels: &[(&str, &str)],
        annotations: &[(&str, &str)],
        resource_version: Option<&str>,
    ) -> ObjectMeta {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        ObjectMeta {
            labels: Some(to_map(labels)),
            annotations: Some(to_map(annotations)),
            resource_version: resource_version.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_existing_entries_are_kept() {
        let mut desired = meta(&[("kiln.dev/environment", "web")], &[(REVISION_ANNOTATION, "2")], None);
        let existing = meta(
            &[("team", "payments")],
            &[
                ("deployment.kubernetes.io/revision", "4"),
                (REVISION_ANNOTATION, "1"),
            ],
            Some("817"),
        );

        merge_existing(&mut desired, Some(&existing));

        let labels = desired.labels.unwrap();
        assert_eq!(labels["kiln.dev/environment"], "web");
        assert_eq!(labels["team"], "payments");

        let annotations = desired.annotations.unwrap();
        assert_eq!(annotations[REVISION_ANNOTATION], "2");
        assert_eq!(annotations["deployment.kubernetes.io/revision"], "4");
        assert_eq!(desired.resource_version.as_deref(), Some("817"));
    }

    #[test]
    fn test_existing_value_wins_on_other_collisions() {
        let mut desired = meta(&[("tier", "dev")], &[], None);
        let existing = meta(&[("tier", "pinned")], &[], None);

        merge_existing(&mut desired, Some(&existing));
        assert_eq!(desired.labels.unwrap()["tier"], "pinned");
    }

    #[test]
    fn test_no_existing_object() {
        let mut desired = meta(&[("tier", "dev")], &[(REVISION_ANNOTATION, "2")], None);
        let before = desired.clone();
        merge_existing(&mut desired, None);
        assert_eq!(desired, before);
    }
}
