//! Component ordering
//!
//! Dependencies are hard edges; among components whose dependencies are all
//! placed, the highest priority goes first, then declaration order of
//! [`ComponentTag`].

use crate::config::{ComponentMigrationConfig, Priority};
use crate::error::ConfigError;
use logshift_transform::ComponentTag;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::BTreeMap;

/// Dependency graph, edges point from dependency to dependent
#[must_use]
pub fn dependency_graph(configs: &[ComponentMigrationConfig]) -> DiGraphMap<ComponentTag, ()> {
    let mut graph = DiGraphMap::new();
    for c in configs {
        graph.add_node(c.component);
        for dep in &c.dependencies {
            graph.add_edge(*dep, c.component, ());
        }
    }
    graph
}

/// Migration order for `configs`
///
/// # Errors
/// - `ConfigError::UnknownDependency` when a dependency is not configured
/// - `ConfigError::Cycle` listing the components caught in a cycle
pub fn plan_order(configs: &[ComponentMigrationConfig]) -> Result<Vec<ComponentTag>, ConfigError> {
    let priority: BTreeMap<ComponentTag, Priority> =
        configs.iter().map(|c| (c.component, c.priority)).collect();

    for c in configs {
        if let Some(dep) = c.dependencies.iter().find(|d| !priority.contains_key(*d)) {
            return Err(ConfigError::UnknownDependency {
                component: c.component,
                dependency: *dep,
            });
        }
    }

    let graph = dependency_graph(configs);
    let mut indegree: BTreeMap<ComponentTag, usize> = graph
        .nodes()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut order = Vec::with_capacity(indegree.len());
    loop {
        let next = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(tag, _)| *tag)
            .min_by_key(|tag| (priority[tag], *tag));
        let Some(next) = next else { break };

        indegree.remove(&next);
        for dependent in graph.neighbors_directed(next, Direction::Outgoing) {
            if let Some(d) = indegree.get_mut(&dependent) {
                *d = d.saturating_sub(1);
            }
        }
        order.push(next);
    }

    if indegree.is_empty() {
        Ok(order)
    } else {
        Err(ConfigError::Cycle(indegree.into_keys().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_components;
    use pretty_assertions::assert_eq;

    fn cfg(tag: ComponentTag, priority: Priority, deps: &[ComponentTag]) -> ComponentMigrationConfig {
        ComponentMigrationConfig {
            component: tag,
            paths: vec!["**/*".into()],
            priority,
            dependencies: deps.to_vec(),
            rules: Vec::new(),
            strict_residual: false,
        }
    }

    #[test]
    fn default_table_orders_by_priority() {
        let order = plan_order(&default_components()).unwrap();
        use ComponentTag::*;
        assert_eq!(
            order,
            vec![Core, Mcp, Interface, Coordination, Memory, Storage, Terminal, Hooks, Enterprise]
        );
    }

    #[test]
    fn dependency_beats_priority() {
        use ComponentTag::*;
        // Terminal is LOW but Mcp (CRITICAL) depends on it
        let configs = vec![
            cfg(Mcp, Priority::Critical, &[Terminal]),
            cfg(Terminal, Priority::Low, &[]),
            cfg(Core, Priority::Critical, &[]),
        ];
        let order = plan_order(&configs).unwrap();
        let pos = |t| order.iter().position(|o| *o == t).unwrap();
        assert!(pos(Terminal) < pos(Mcp));
        assert_eq!(order[0], Core);
    }

    #[test]
    fn cycle_is_reported() {
        use ComponentTag::*;
        let configs = vec![
            cfg(Core, Priority::Critical, &[]),
            cfg(Memory, Priority::High, &[Storage]),
            cfg(Storage, Priority::Medium, &[Memory]),
        ];
        match plan_order(&configs) {
            Err(ConfigError::Cycle(members)) => assert_eq!(members, vec![Memory, Storage]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let configs = vec![cfg(ComponentTag::Hooks, Priority::Low, &[ComponentTag::Coordination])];
        assert!(matches!(
            plan_order(&configs),
            Err(ConfigError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn every_dependency_precedes_its_dependent() {
        let configs = default_components();
        let order = plan_order(&configs).unwrap();
        for c in &configs {
            let me = order.iter().position(|t| *t == c.component).unwrap();
            for dep in &c.dependencies {
                let d = order.iter().position(|t| t == dep).unwrap();
                assert!(d < me, "{dep} must precede {}", c.component);
            }
        }
    }
}
