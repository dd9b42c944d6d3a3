use crate::domain::{DeployError, EnvMap, INSTANCE_NODE, Instance, Volume};
use std::collections::BTreeSet;
use tracing::debug;

/// A named node of the evaluation graph with the names it reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub name: String,
    pub requires: BTreeSet<String>,
}

/// Order in which the instance and its providers must be evaluated.
///
/// A `from` naming one of the node's own volumes is not an edge. Any other
/// target, the node itself included, must be ordered before the node.
pub fn evaluation_order(instance: &Instance) -> Result<Vec<String>, DeployError> {
    let mut nodes = vec![node(INSTANCE_NODE, &instance.env, &instance.volume_list)];
    nodes.extend(
        instance
            .providers
            .iter()
            .map(|provider| node(&provider.name, &provider.env, &provider.volume_list)),
    );

    let order = resolve(&nodes)?;
    debug!("evaluation order for {}: {:?}", instance.label, order);
    Ok(order)
}

fn node(name: &str, env: &EnvMap, volumes: &[Volume]) -> DependencyNode {
    let requires = env
        .values()
        .filter_map(|value| value.requirement())
        .filter_map(|requirement| requirement.dependency())
        .filter(|target| !volumes.iter().any(|v| v.source == *target))
        .map(str::to_string)
        .collect();
    DependencyNode {
        name: name.to_string(),
        requires,
    }
}

/// Topological sort by rounds: each round extracts every node whose
/// requirements are already ordered, keeping declaration order.
pub fn resolve(nodes: &[DependencyNode]) -> Result<Vec<String>, DeployError> {
    let mut names = BTreeSet::new();
    for node in nodes {
        if !names.insert(node.name.as_str()) {
            return Err(DeployError::DuplicateProvider(node.name.clone()));
        }
    }
    for node in nodes {
        if let Some(target) = node.requires.iter().find(|t| !names.contains(t.as_str())) {
            return Err(DeployError::UnknownDependency {
                node: node.name.clone(),
                target: target.clone(),
            });
        }
    }

    let mut pending: Vec<DependencyNode> = nodes.to_vec();
    let mut order = Vec::with_capacity(nodes.len());
    while !pending.is_empty() {
        let (ready, waiting): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|node| node.requires.is_empty());
        if ready.is_empty() {
            return Err(DeployError::CircularDependency(
                waiting.into_iter().map(|node| node.name).collect(),
            ));
        }

        let done: BTreeSet<String> = ready.into_iter().map(|node| node.name).collect();
        pending = waiting
            .into_iter()
            .map(|mut node| {
                node.requires.retain(|name| !done.contains(name));
                node
            })
            .collect();
        // keep declaration order inside a round
        order.extend(
            nodes
                .iter()
                .filter(|node| done.contains(&node.name))
                .map(|node| node.name.clone()),
        );
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn n(name: &str, requires: &[&str]) -> DependencyNode {
        DependencyNode {
            name: name.to_string(),
            requires: requires.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_dependencies_come_first() {
        let order = resolve(&[n("", &["db", "cache"]), n("db", &[]), n("cache", &["db"])]).unwrap();
        assert_eq!(order, ["db", "cache", ""]);
    }

    #[test]
    fn test_cycle_names_remaining_nodes() {
        let err = resolve(&[n("p1", &["p2"]), n("p2", &["p1"]), n("", &[])]).unwrap_err();
        assert_eq!(
            err,
            DeployError::CircularDependency(vec!["p1".into(), "p2".into()])
        );
        assert!(err.to_string().contains("p1"));
        assert!(err.to_string().contains("p2"));
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let err = resolve(&[n("db", &[]), n("db", &[])]).unwrap_err();
        assert_eq!(err, DeployError::DuplicateProvider("db".into()));
    }

    #[test]
    fn test_unknown_target_is_fatal() {
        let err = resolve(&[n("", &["ghost"])]).unwrap_err();
        assert_eq!(
            err,
            DeployError::UnknownDependency {
                node: "".into(),
                target: "ghost".into()
            }
        );
    }

    #[test]
    fn test_instance_graph_skips_own_volumes() {
        let instance: Instance = serde_json::from_value(serde_json::json!({
            "label": "blog",
            "label_id": "blog",
            "domain": "a.example.com",
            "image": "wordpress",
            "env": {
                "DB_HOST": { "from": "db", "key": "hostname" },
                "UPLOADS": { "from": "uploads", "key": "target" }
            },
            "volume_list": [{ "source": "uploads", "target": "/data" }],
            "providers": [{
                "name": "db",
                "image": "mariadb",
                "env": { "DATA": { "from": "data", "key": "name" } },
                "volume_list": [{ "source": "data", "target": "/var/lib/mysql" }]
            }]
        }))
        .unwrap();

        assert_eq!(evaluation_order(&instance).unwrap(), ["db", ""]);
    }

    #[test]
    fn test_volume_named_like_its_provider_keeps_edges() {
        let instance: Instance = serde_json::from_value(serde_json::json!({
            "label": "x",
            "label_id": "x",
            "domain": "a.example.com",
            "image": "app",
            "env": { "DB_PASSWORD": { "from": "postgres", "key": "POSTGRES_PASSWORD" } },
            "providers": [{
                "name": "postgres",
                "image": "postgres:16",
                "env": { "POSTGRES_PASSWORD": { "random": true } },
                "volume_list": [{ "source": "postgres", "target": "/var/lib/postgresql/data" }]
            }]
        }))
        .unwrap();

        assert_eq!(evaluation_order(&instance).unwrap(), ["postgres", ""]);
    }

    #[test]
    fn test_self_reference_is_circular() {
        let instance: Instance = serde_json::from_value(serde_json::json!({
            "label": "blog",
            "label_id": "blog",
            "domain": "a.example.com",
            "image": "wordpress",
            "providers": [{
                "name": "db",
                "image": "mariadb",
                "env": { "ME": { "from": "db", "key": "hostname" } }
            }]
        }))
        .unwrap();

        assert_eq!(
            evaluation_order(&instance).unwrap_err(),
            DeployError::CircularDependency(vec!["db".into()])
        );
    }

    #[test]
    fn test_volume_of_another_node_is_unknown() {
        let instance: Instance = serde_json::from_value(serde_json::json!({
            "label": "blog",
            "label_id": "blog",
            "domain": "a.example.com",
            "image": "wordpress",
            "volume_list": [{ "source": "uploads", "target": "/data" }],
            "providers": [{
                "name": "db",
                "image": "mariadb",
                "env": { "PATH": { "from": "uploads", "key": "target" } }
            }]
        }))
        .unwrap();

        assert!(matches!(
            evaluation_order(&instance),
            Err(DeployError::UnknownDependency { .. })
        ));
    }

    // random DAG: node i may only require nodes with a smaller index
    fn dag() -> impl Strategy<Value = Vec<DependencyNode>> {
        (1usize..8).prop_flat_map(|size| {
            proptest::collection::vec(proptest::collection::vec(any::<bool>(), size), size)
                .prop_map(move |matrix| {
                    (0..size)
                        .map(|i| DependencyNode {
                            name: format!("p{i}"),
                            requires: (0..i)
                                .filter(|&j| matrix[i][j])
                                .map(|j| format!("p{j}"))
                                .collect(),
                        })
                        .rev()
                        .collect()
                })
        })
    }

    proptest! {
        #[test]
        fn prop_acyclic_graphs_are_ordered(nodes in dag()) {
            let order = resolve(&nodes).unwrap();
            prop_assert_eq!(order.len(), nodes.len());
            for node in &nodes {
                let at = order.iter().position(|name| *name == node.name).unwrap();
                for required in &node.requires {
                    let before = order.iter().position(|name| name == required).unwrap();
                    prop_assert!(before < at);
                }
            }
        }

        #[test]
        fn prop_cycles_are_rejected(size in 2usize..6) {
            let nodes: Vec<DependencyNode> = (0..size)
                .map(|i| DependencyNode {
                    name: format!("p{i}"),
                    requires: [format!("p{}", (i + 1) % size)].into_iter().collect(),
                })
                .collect();
            let is_cycle = matches!(resolve(&nodes), Err(DeployError::CircularDependency(_)));
            prop_assert!(is_cycle);
        }
    }
}
