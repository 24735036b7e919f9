//! Desired service and ingress.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kiln_api::naming;

use super::metadata::{merge_existing, owned_meta};
use crate::collection::Observed;

/// Compute the service, or `None` when the service toggle is off.
pub(crate) fn build_service(observed: &Observed) -> Option<Service> {
    let spec = &observed.environment.spec;
    if !spec.service_enabled() {
        return None;
    }
    let settings = spec.service.as_ref()?;
    let name = observed.key.name.clone();

    let mut metadata = owned_meta(observed, name.clone(), "network");
    let existing = observed.service.as_ref();
    merge_existing(&mut metadata, existing.map(|s| &s.metadata));

    // The API server assigns the cluster IP and rejects updates that drop it.
    let existing_spec = existing.and_then(|s| s.spec.as_ref());

    Some(Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: settings.type_.clone(),
            selector: Some(naming::selector_labels(&name)),
            ports: Some(service_ports(observed)),
            cluster_ip: existing_spec.and_then(|s| s.cluster_ip.clone()),
            cluster_ips: existing_spec.and_then(|s| s.cluster_ips.clone()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Explicit service ports, or one port per container port.
fn service_ports(observed: &Observed) -> Vec<ServicePort> {
    let spec = &observed.environment.spec;
    if let Some(ports) = spec.service.as_ref().and_then(|s| s.ports.clone()) {
        return ports;
    }

    spec.ports
        .iter()
        .flatten()
        .map(|port| ServicePort {
            name: port.name.clone(),
            port: port.container_port,
            target_port: Some(IntOrString::Int(port.container_port)),
            protocol: port.protocol.clone(),
            ..Default::default()
        })
        .collect()
}

/// Compute the ingress, or `None` unless both service and ingress toggles are on.
pub(crate) fn build_ingress(observed: &Observed) -> Option<Ingress> {
    let spec = &observed.environment.spec;
    if !spec.ingress_enabled() {
        return None;
    }
    let settings = spec.ingress.as_ref()?;
    let name = observed.key.name.clone();

    let mut metadata = owned_meta(observed, name.clone(), "network");
    merge_existing(&mut metadata, observed.ingress.as_ref().map(|i| &i.metadata));

    let backend_port = service_ports(observed).first().map(|p| ServiceBackendPort {
        number: Some(p.port),
        ..Default::default()
    });

    let rule = IngressRule {
        host: settings.host.clone(),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: settings.path.clone(),
                path_type: "Prefix".to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: name.clone(),
                        port: backend_port,
                    }),
                    ..Default::default()
                },
            }],
        }),
    };

    let tls = settings.tls_secret_name.as_ref().map(|secret| {
        vec![IngressTLS {
            hosts: settings.host.clone().map(|host| vec![host]),
            secret_name: Some(secret.clone()),
        }]
    });

    Some(Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: settings.class_name.clone(),
            rules: Some(vec![rule]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    })
}
