use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kiln_api::naming;

use super::metadata::{merge_existing, owned_meta, revision_annotations};
use crate::collection::Observed;

/// Image reference of a revision as pulled by the kubelet.
///
/// Nodes reach the in-cluster registry through its node port on localhost.
pub(crate) fn workload_image(observed: &Observed) -> String {
    format!(
        "localhost:{}/{}:{}",
        observed.config.spec.registry.node_port.unwrap_or_default(),
        observed.key.name,
        observed.revision().unwrap_or_default()
    )
}

/// Compute the workload deployment for the observed environment.
pub(crate) fn build_deployment(observed: &Observed) -> Deployment {
    let name = observed.key.name.clone();
    let spec = &observed.environment.spec;

    let mut metadata = owned_meta(observed, name.clone(), "workload");
    merge_existing(
        &mut metadata,
        observed.deployment.as_ref().map(|d| &d.metadata),
    );

    let container = Container {
        name: name.clone(),
        image: Some(workload_image(observed)),
        command: spec.command.clone(),
        args: spec.args.clone(),
        working_dir: spec.working_dir.clone(),
        ports: spec.ports.clone(),
        env: spec.env.clone(),
        resources: spec.resources.clone(),
        liveness_probe: spec.liveness_probe.clone(),
        readiness_probe: spec.readiness_probe.clone(),
        startup_probe: spec.startup_probe.clone(),
        lifecycle: spec.lifecycle.clone(),
        ..Default::default()
    };

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replica_count()),
            selector: LabelSelector {
                match_labels: Some(naming::selector_labels(&name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(naming::environment_labels(&name)),
                    annotations: Some(revision_annotations(observed)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use k8s_openapi::api::core::v1::{ContainerPort, EnvVar};

    #[test]
    fn test_image_from_node_port() {
        let observed = testing::observed("7");
        assert_eq!(workload_image(&observed), "localhost:30500/web:7");
    }

    #[test]
    fn test_spec_fields_pass_through() {
        let mut observed = testing::observed("7");
        observed.environment.spec.replicas = Some(3);
        observed.environment.spec.command = Some(vec!["/bin/server".to_string()]);
        observed.environment.spec.working_dir = Some("/srv".to_string());
        observed.environment.spec.ports = Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: 8080,
            ..Default::default()
        }]);
        observed.environment.spec.env = Some(vec![EnvVar {
            name: "MODE".to_string(),
            value: Some("dev".to_string()),
            ..Default::default()
        }]);

        let deployment = build_deployment(&observed);
        let spec = deployment.spec.as_ref().unwrap();
        let pod = spec.template.spec.as_ref().unwrap();

        assert_eq!(spec.replicas, Some(3));
        assert_eq!(pod.containers.len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.name, "web");
        assert_eq!(container.image.as_deref(), Some("localhost:30500/web:7"));
        assert_eq!(container.command, observed.environment.spec.command);
        assert_eq!(container.working_dir.as_deref(), Some("/srv"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
        assert_eq!(container.env.as_ref().unwrap()[0].name, "MODE");
    }

    #[test]
    fn test_selector_matches_pod_labels() {
        let deployment = build_deployment(&testing::observed("7"));
        let spec = deployment.spec.unwrap();

        let selector = spec.selector.match_labels.unwrap();
        let pod_labels = spec.template.metadata.unwrap().labels.unwrap();
        for (key, value) in &selector {
            assert_eq!(pod_labels.get(key), Some(value));
        }
    }

    #[test]
    fn test_revision_annotation() {
        let deployment = build_deployment(&testing::observed("7"));
        assert_eq!(
            deployment.metadata.annotations.unwrap()[naming::REVISION_ANNOTATION],
            "7"
        );
    }
}
