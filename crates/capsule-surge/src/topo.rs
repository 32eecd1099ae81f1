//! Dependency-order topological sort over `depends_on` (`spec.md`
//! §4.9 step 3).

use std::collections::{BTreeMap, BTreeSet};

use crate::spec::ProjectSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Service names in an order where every service comes after everything
/// it `depends_on`. A cycle among declared dependencies is reported as
/// the name of one service on the cycle (`spec.md` §4.9: "cycles ->
/// DependencyError").
pub fn order_services(spec: &ProjectSpec) -> Result<Vec<String>, String> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut order = Vec::with_capacity(spec.services.len());

    // BTreeMap iteration is already lexicographic, so ties among
    // services with no relative ordering constraint are deterministic.
    for name in spec.services.keys() {
        visit(spec, name, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// The reverse of [`order_services`]: `down`/`kill` stop services with
/// `depends_on` before the services they depend on (`spec.md` §4.9).
pub fn reverse_order_services(spec: &ProjectSpec) -> Result<Vec<String>, String> {
    let mut order = order_services(spec)?;
    order.reverse();
    Ok(order)
}

fn visit<'a>(
    spec: &'a ProjectSpec,
    name: &'a str,
    marks: &mut BTreeMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), String> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => return Err(format!("dependency cycle involving service {name:?}")),
        None => {}
    }
    marks.insert(name, Mark::Visiting);

    if let Some(service) = spec.services.get(name) {
        for dep in &service.depends_on {
            let dep_name: &str = spec
                .services
                .get_key_value(dep.as_str())
                .map(|(k, _)| k.as_str())
                .unwrap_or(dep.as_str());
            visit(spec, dep_name, marks, order)?;
        }
    }

    marks.insert(name, Mark::Done);
    order.push(name.to_string());
    Ok(())
}

/// Every service name reachable from `roots` via `networks`, used to
/// decide which declared networks actually need to exist. Kept separate
/// from `order_services` since network membership isn't a dependency
/// edge in the ordering sense.
pub fn networks_in_use(spec: &ProjectSpec) -> BTreeSet<String> {
    spec.services.values().flat_map(|s| s.networks.iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ServiceSpec;
    use std::collections::BTreeMap;

    fn spec_with(services: Vec<(&str, Vec<&str>)>) -> ProjectSpec {
        let mut map = BTreeMap::new();
        for (name, deps) in services {
            map.insert(
                name.to_string(),
                ServiceSpec {
                    image: Some("nginx:latest".into()),
                    depends_on: deps.into_iter().map(String::from).collect(),
                    ..Default::default()
                },
            );
        }
        ProjectSpec {
            project: "p".into(),
            services: map,
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
            fabric: Default::default(),
            resolver: Default::default(),
            snapshots: Default::default(),
        }
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let spec = spec_with(vec![("web", vec!["db"]), ("db", vec![])]);
        let order = order_services(&spec).unwrap();
        assert_eq!(order, vec!["db".to_string(), "web".to_string()]);
    }

    #[test]
    fn detects_cycle() {
        let spec = spec_with(vec![("a", vec!["b"]), ("b", vec!["a"])]);
        assert!(order_services(&spec).is_err());
    }

    #[test]
    fn reverse_order_stops_dependents_first() {
        let spec = spec_with(vec![("web", vec!["db"]), ("db", vec![])]);
        let order = reverse_order_services(&spec).unwrap();
        assert_eq!(order, vec!["web".to_string(), "db".to_string()]);
    }
}
