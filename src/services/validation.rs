use crate::domain::{DeployError, DeployRequest, Instance};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Instances kept from a request, with the reasons others were dropped.
#[derive(Debug, Clone, Default)]
pub struct Validated {
    pub instances: Vec<Instance>,
    pub warnings: Vec<String>,
}

impl Validated {
    fn drop_with(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Parse every site entry; malformed entries abort, misplaced ones are dropped.
pub fn validate(request: &DeployRequest) -> Result<Validated, DeployError> {
    let mut validated = Validated::default();
    let mut labels = BTreeSet::new();
    let mut parsed = Vec::with_capacity(request.site.len());

    for (index, site) in request.site.iter().enumerate() {
        let instance = Instance::from_request(index, site)?;
        // container names derive from label_id, so it must be unique too
        if !labels.insert(instance.label_id.clone()) {
            validated.drop_with(format!(
                "label '{}' is used more than once, entry #{index} discarded",
                instance.label
            ));
            continue;
        }
        parsed.push(instance);
    }

    // group by hostname, keeping request order
    let mut hosts: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (position, instance) in parsed.iter().enumerate() {
        hosts.entry(instance.hostname()).or_default().push(position);
    }

    let mut kept = BTreeSet::new();
    for (hostname, positions) in &hosts {
        let first = &parsed[positions[0]];
        if first.domain_name().location.is_some() {
            let mut locations = BTreeSet::new();
            for &position in positions {
                let instance = &parsed[position];
                match instance.domain_name().location {
                    None => validated.drop_with(format!(
                        "required location is missing for {hostname}, '{}' discarded",
                        instance.label
                    )),
                    Some(location) if !locations.insert(location.clone()) => {
                        validated.drop_with(format!(
                            "location /{location} of {hostname} is already used, '{}' discarded",
                            instance.label
                        ))
                    }
                    Some(_) => {
                        kept.insert(position);
                    }
                }
            }
        } else {
            kept.insert(positions[0]);
            for &position in &positions[1..] {
                validated.drop_with(format!(
                    "too many instances for {hostname}, '{}' discarded",
                    parsed[position].label
                ));
            }
        }
    }

    validated.instances = parsed
        .into_iter()
        .enumerate()
        .filter(|(position, _)| kept.contains(position))
        .map(|(_, instance)| instance)
        .collect();
    Ok(validated)
}
