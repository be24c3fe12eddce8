//! Standard definition catalog
//!
//! A small set of ready-made component and trait types, enough to describe a
//! typical web application without writing definitions first.

use crate::definition::{
    ComponentDefinition, DefinitionSet, ParameterSchema, ResourceTemplate, TraitDefinition,
};
use serde_json::json;

/// Built-ins plus the standard component and trait types:
///
/// - components: `webservice`, `worker`, `namespace`
/// - traits: `scaler`, `expose`, `config`
pub fn standard_definitions() -> DefinitionSet {
    let mut set = DefinitionSet::with_builtins();

    set.register_component(
        ComponentDefinition::new(
            "webservice",
            ResourceTemplate::new(
                "apps/v1",
                "Deployment",
                json!({
                    "replicas": 1,
                    "selector": {"app": "${context.name}"},
                    "template": {
                        "containers": [{
                            "name": "${context.name}",
                            "image": "${parameter.image}",
                            "port": "${parameter.port}"
                        }]
                    }
                }),
            ),
        )
        .with_parameters(
            ParameterSchema::default()
                .required("image")
                .default_value("port", json!(80)),
        ),
    );

    set.register_component(
        ComponentDefinition::new(
            "worker",
            ResourceTemplate::new(
                "apps/v1",
                "Deployment",
                json!({
                    "replicas": 1,
                    "selector": {"app": "${context.name}"},
                    "template": {
                        "containers": [{
                            "name": "${context.name}",
                            "image": "${parameter.image}"
                        }]
                    }
                }),
            ),
        )
        .with_parameters(ParameterSchema::default().required("image")),
    );

    set.register_component(ComponentDefinition::new(
        "namespace",
        ResourceTemplate::new("v1", "Namespace", json!({})),
    ));

    set.register_trait(
        TraitDefinition::new("scaler")
            .applies_to("webservice")
            .applies_to("worker")
            .with_patch(json!({"replicas": "${parameter.replicas}"}))
            .with_parameters(ParameterSchema::default().default_value("replicas", json!(1))),
    );

    set.register_trait(
        TraitDefinition::new("expose")
            .applies_to("webservice")
            .with_output(
                "svc",
                ResourceTemplate::new(
                    "v1",
                    "Service",
                    json!({
                        "selector": {"app": "${context.name}"},
                        "ports": [{"port": "${parameter.port}"}]
                    }),
                ),
            )
            .with_parameters(ParameterSchema::default().required("port")),
    );

    set.register_trait(
        TraitDefinition::new("config")
            .with_output(
                "config",
                ResourceTemplate::new("v1", "ConfigMap", json!({"data": "${parameter.data}"})),
            )
            .with_parameters(ParameterSchema::default().required("data")),
    );

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_contents() {
        let set = standard_definitions();
        assert!(set.component("webservice").is_some());
        assert!(set.component("worker").is_some());
        assert!(set.component("namespace").is_some());
        assert!(set.trait_def("scaler").is_some());
        assert!(set.trait_def("expose").is_some());
        assert!(set.trait_def("config").is_some());
        assert!(set.policy("topology").is_some());
        assert!(set.step("deploy").is_some());
    }
}
