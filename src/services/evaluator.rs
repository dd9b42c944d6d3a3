use crate::domain::{
    DeployError, EnvMap, EnvValue, INSTANCE_NODE, Instance, PersistentValues, Requirement,
    RequirementKind, Store,
};
use anyhow::{Context, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use tracing::debug;

const MIN_DIGITS: usize = 3;
const MIN_SECRET_LENGTH: usize = 8;

/// Replaces the requirement values of an instance and its providers by
/// concrete text, following the persistence rule.
#[derive(Debug, Clone)]
pub struct ValueEvaluator {
    store: Arc<dyn Store>,
}

impl ValueEvaluator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Evaluate every node in `order`, as returned by the dependency resolver.
    pub fn evaluate(&self, instance: &mut Instance, order: &[String]) -> Result<()> {
        for node in order {
            let env = node_env(instance, node)?.clone();
            let mut persistent = instance.persistent_for(node);
            let mut evaluated = EnvMap::new();

            for (key, value) in env {
                let Some(requirement) = value.requirement() else {
                    evaluated.insert(key, value);
                    continue;
                };
                let text = self
                    .evaluate_one(instance, node, &key, requirement, &mut persistent)
                    .with_context(|| format!("evaluating {key} of '{}'", instance.label))?;
                if requirement.display {
                    debug!("{}: {key} = {text}", instance.label);
                }
                evaluated.insert(key, EnvValue::Text(text));
            }

            *node_env_mut(instance, node)? = evaluated;
            instance.set_persistent_for(node, persistent);
        }
        Ok(())
    }

    fn evaluate_one(
        &self,
        instance: &Instance,
        node: &str,
        key: &str,
        requirement: &Requirement,
        persistent: &mut PersistentValues,
    ) -> Result<String> {
        let generate = || -> Result<String> {
            match requirement.kind() {
                RequirementKind::Random { length } => Ok(gen_password(length)),
                RequirementKind::UniqueDb => Ok(format!("db_{}", self.store.next_counter("db")?)),
                RequirementKind::UniqueUser => {
                    Ok(format!("user_{}", self.store.next_counter("user")?))
                }
                RequirementKind::Property { .. } | RequirementKind::Unknown => {
                    Err(DeployError::InvalidConfig(format!(
                        "'{key}' of node '{node}' has no usable requirement"
                    ))
                    .into())
                }
            }
        };

        if let RequirementKind::Property { from, key: property } = requirement.kind() {
            return read_property(instance, node, from, property).ok_or_else(|| {
                DeployError::InvalidConfig(format!(
                    "'{}' has no property '{property}' for {key}",
                    if from.is_empty() { instance.label.as_str() } else { from }
                ))
                .into()
            });
        }

        if !requirement.is_persistent() {
            persistent.remove(key);
            return generate();
        }
        if let Some(stored) = persistent.get(key) {
            debug!("{}: reusing persistent value of {key}", instance.label);
            return Ok(stored.clone());
        }
        let value = generate()?;
        persistent.insert(key.to_string(), value.clone());
        Ok(value)
    }
}

fn node_env<'a>(instance: &'a Instance, node: &str) -> Result<&'a EnvMap> {
    if node == INSTANCE_NODE {
        return Ok(&instance.env);
    }
    instance
        .provider(node)
        .map(|p| &p.env)
        .ok_or_else(|| DeployError::UnknownDependency {
            node: instance.label.clone(),
            target: node.to_string(),
        }
        .into())
}

fn node_env_mut<'a>(instance: &'a mut Instance, node: &str) -> Result<&'a mut EnvMap> {
    if node == INSTANCE_NODE {
        return Ok(&mut instance.env);
    }
    let label = instance.label.clone();
    instance
        .provider_mut(node)
        .map(|p| &mut p.env)
        .ok_or_else(|| {
            DeployError::UnknownDependency {
                node: label,
                target: node.to_string(),
            }
            .into()
        })
}

fn read_property(instance: &Instance, node: &str, from: &str, key: &str) -> Option<String> {
    let own_volumes = if node == INSTANCE_NODE {
        Some(&instance.volume_list)
    } else {
        instance.provider(node).map(|p| &p.volume_list)
    };
    if let Some(volume) = own_volumes
        .into_iter()
        .flatten()
        .find(|v| !from.is_empty() && v.source == from)
    {
        return match key {
            "name" => Some(volume.runtime_source().to_string()),
            "source" => Some(volume.source.clone()),
            "target" => Some(volume.target.clone()),
            _ => None,
        };
    }
    if from.is_empty() {
        return instance.property(key);
    }
    instance.provider(from).and_then(|provider| provider.property(key))
}

/// Alphanumeric secret starting with a letter, with both cases and a few digits.
pub fn gen_password(length: usize) -> String {
    let length = length.max(MIN_SECRET_LENGTH);
    let mut rng = rand::thread_rng();
    loop {
        let password: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
        let starts_with_letter = password.starts_with(|c: char| c.is_ascii_alphabetic());
        let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
        let digits = password.chars().filter(char::is_ascii_digit).count();
        if starts_with_letter && has_lower && has_upper && digits >= MIN_DIGITS {
            return password;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dependency_resolver::evaluation_order;
    use crate::test_support::MemoryStore;

    fn instance() -> Instance {
        let mut instance: Instance = serde_json::from_value(serde_json::json!({
            "label": "blog",
            "label_id": "blog",
            "domain": "a.example.com",
            "image": "wordpress",
            "app_id": "wordpress",
            "env": {
                "DB_HOST": { "from": "database", "key": "hostname" },
                "DB_PASSWORD": { "from": "database", "key": "MARIADB_PASSWORD" },
                "DB_NAME": { "from": "database", "key": "MARIADB_DATABASE" },
                "SITE": { "key": "domain" }
            },
            "providers": [{
                "name": "database",
                "image": "mariadb:11",
                "env": {
                    "MARIADB_PASSWORD": { "random": true },
                    "MARIADB_DATABASE": { "unique_db": true },
                    "MARIADB_ROOT_PASSWORD": { "random": true, "persistent": false }
                }
            }]
        }))
        .unwrap();
        instance.assign_names();
        instance
    }

    fn evaluate(evaluator: &ValueEvaluator, instance: &mut Instance) {
        let order = evaluation_order(instance).unwrap();
        evaluator.evaluate(instance, &order).unwrap();
    }

    fn text(env: &EnvMap, key: &str) -> String {
        env[key].as_text().unwrap()
    }

    #[test]
    fn test_properties_follow_providers() {
        let evaluator = ValueEvaluator::new(Arc::new(MemoryStore::new()));
        let mut instance = instance();
        evaluate(&evaluator, &mut instance);

        let db = &instance.providers[0].env;
        assert_eq!(text(&instance.env, "DB_HOST"), "blog-database");
        assert_eq!(text(&instance.env, "DB_PASSWORD"), text(db, "MARIADB_PASSWORD"));
        assert_eq!(text(&instance.env, "DB_NAME"), "db_1");
        assert_eq!(text(&instance.env, "SITE"), "a.example.com");
    }

    #[test]
    fn test_persistent_values_survive_and_others_regenerate() {
        let evaluator = ValueEvaluator::new(Arc::new(MemoryStore::new()));
        let mut first = instance();
        evaluate(&evaluator, &mut first);

        let mut second = instance();
        second.persistent = first.persistent.clone();
        evaluate(&evaluator, &mut second);

        let (a, b) = (&first.providers[0].env, &second.providers[0].env);
        assert_eq!(text(a, "MARIADB_PASSWORD"), text(b, "MARIADB_PASSWORD"));
        assert_eq!(text(a, "MARIADB_DATABASE"), text(b, "MARIADB_DATABASE"));
        assert_ne!(
            text(a, "MARIADB_ROOT_PASSWORD"),
            text(b, "MARIADB_ROOT_PASSWORD")
        );
        assert!(!second.persistent["database"].contains_key("MARIADB_ROOT_PASSWORD"));
    }

    #[test]
    fn test_missing_property_is_a_configuration_error() {
        let evaluator = ValueEvaluator::new(Arc::new(MemoryStore::new()));
        let mut instance = instance();
        instance.env.insert(
            "NOPE".into(),
            EnvValue::Requirement(Requirement {
                from: Some("database".into()),
                key: Some("NOPE".into()),
                ..Default::default()
            }),
        );
        let order = evaluation_order(&instance).unwrap();
        let err = evaluator.evaluate(&mut instance, &order).unwrap_err();
        assert_eq!(
            crate::domain::error_kind(&err),
            crate::domain::ErrorKind::Configuration
        );
    }

    #[test]
    fn test_own_volume_wins_over_a_provider_of_the_same_name() {
        let evaluator = ValueEvaluator::new(Arc::new(MemoryStore::new()));
        let mut instance: Instance = serde_json::from_value(serde_json::json!({
            "label": "x",
            "label_id": "x",
            "domain": "a.example.com",
            "image": "app",
            "env": { "DB_PASSWORD": { "from": "postgres", "key": "POSTGRES_PASSWORD" } },
            "providers": [{
                "name": "postgres",
                "image": "postgres:16",
                "env": {
                    "POSTGRES_PASSWORD": { "random": true },
                    "PGDATA": { "from": "postgres", "key": "target" }
                },
                "volume_list": [{ "source": "postgres", "target": "/var/lib/postgresql/data" }]
            }]
        }))
        .unwrap();
        instance.assign_names();
        evaluate(&evaluator, &mut instance);

        let provider = &instance.providers[0].env;
        assert_eq!(text(provider, "PGDATA"), "/var/lib/postgresql/data");
        assert_eq!(
            text(&instance.env, "DB_PASSWORD"),
            text(provider, "POSTGRES_PASSWORD")
        );
    }

    #[test]
    fn test_gen_password_shape() {
        for _ in 0..50 {
            let password = gen_password(24);
            assert_eq!(password.len(), 24);
            assert!(password.starts_with(|c: char| c.is_ascii_alphabetic()));
            assert!(password.chars().filter(char::is_ascii_digit).count() >= 3);
        }
        assert_eq!(gen_password(2).len(), MIN_SECRET_LENGTH);
    }
}
