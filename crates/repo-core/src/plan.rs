//! Dependency sequencing.
//!
//! Operations are grouped into five fixed levels:
//!
//! | Level | Kinds |
//! |---|---|
//! | 0 | repository |
//! | 1 | collaborators, team access, labels, webhooks, deploy keys, custom properties, autolinks, repository secrets and variables |
//! | 2 | environments |
//! | 3 | environment secrets and variables, deployment branch policies |
//! | 4 | rulesets |
//!
//! Each operation also records the explicit edges it needs (an environment
//! child on its environment, a ruleset on the team access and environments it
//! references). Edges are checked with a topological sort: every edge must
//! point to a strictly earlier level.

use std::collections::{BTreeMap, BTreeSet};

use repo_model::{ActorRef, ActorType, ReviewerType, Resource, ResourceAddress, ResourceKind, Rule, Scope};

use crate::diff::Operation;
use crate::{Error, Result};

/// Number of sequencing levels.
pub const LEVELS: usize = 5;

/// The level an address is applied at.
pub fn level_of(address: &ResourceAddress) -> usize {
    match address.kind {
        ResourceKind::Repository => 0,
        ResourceKind::Collaborator
        | ResourceKind::TeamAccess
        | ResourceKind::Label
        | ResourceKind::Webhook
        | ResourceKind::DeployKey
        | ResourceKind::CustomProperty
        | ResourceKind::Autolink => 1,
        ResourceKind::Secret | ResourceKind::Variable => match address.scope {
            Scope::Repository => 1,
            Scope::Environment(_) => 3,
        },
        ResourceKind::Environment => 2,
        ResourceKind::DeploymentBranchPolicy => 3,
        ResourceKind::Ruleset => 4,
    }
}

/// Addresses `resource` must not be applied before, whether or not they are
/// part of the current plan.
fn references(resource: &Resource) -> Vec<ResourceAddress> {
    let mut refs = Vec::new();
    if let Some(env) = resource.address().owning_environment() {
        refs.push(env);
    }
    match resource {
        Resource::Environment(env) => {
            for reviewer in env.reviewers() {
                if let ActorRef::Name(name) = &reviewer.id {
                    let kind = match reviewer.reviewer_type {
                        ReviewerType::User => ResourceKind::Collaborator,
                        ReviewerType::Team => ResourceKind::TeamAccess,
                    };
                    refs.push(ResourceAddress::new(kind, name));
                }
            }
        }
        Resource::Ruleset(ruleset) => {
            for actor in &ruleset.bypass_actors {
                if actor.actor_type == ActorType::Team
                    && let ActorRef::Name(slug) = &actor.actor_id
                {
                    refs.push(ResourceAddress::new(ResourceKind::TeamAccess, slug));
                }
            }
            for rule in &ruleset.rules {
                if let Rule::RequiredDeployments(deployments) = rule {
                    for env in &deployments.required_deployment_environments {
                        refs.push(ResourceAddress::new(ResourceKind::Environment, env));
                    }
                }
            }
        }
        _ => {}
    }
    refs
}

/// Operations grouped by level, each level sorted by address.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    levels: Vec<Vec<Operation>>,
}

impl Plan {
    /// Sequence `operations`, filling in each operation's `depends_on`.
    pub fn build(operations: Vec<Operation>) -> Result<Self> {
        let present: BTreeSet<ResourceAddress> = operations.iter().map(|op| op.address.clone()).collect();
        let repository = present
            .iter()
            .find(|address| address.kind == ResourceKind::Repository)
            .cloned();

        let mut graph = DependencyGraph::default();
        let mut by_address = BTreeMap::new();
        for mut op in operations {
            let mut depends_on: BTreeSet<ResourceAddress> = BTreeSet::new();
            if let Some(repository) = &repository
                && op.address.kind != ResourceKind::Repository
            {
                depends_on.insert(repository.clone());
            }
            if let Some(resource) = &op.desired {
                depends_on.extend(references(resource).into_iter().filter(|address| present.contains(address)));
            }
            depends_on.remove(&op.address);

            graph.add_node(op.address.clone());
            for dependency in &depends_on {
                graph.add_edge(&op.address, dependency);
            }
            op.depends_on = depends_on.into_iter().collect();
            by_address.insert(op.address.clone(), op);
        }

        graph.validate_levels()?;
        let order = graph.topological_sort()?;

        let mut levels = vec![Vec::new(); LEVELS];
        for address in order {
            if let Some(op) = by_address.remove(&address) {
                levels[level_of(&address)].push(op);
            }
        }
        for level in &mut levels {
            level.sort_by(|a, b| a.address.cmp(&b.address));
        }

        tracing::debug!(
            operations = levels.iter().map(Vec::len).sum::<usize>(),
            edges = graph.edge_count(),
            "sequenced plan"
        );
        Ok(Self { levels })
    }

    /// Levels in execution order; empty levels included.
    pub fn levels(&self) -> impl Iterator<Item = (usize, &[Operation])> {
        self.levels.iter().enumerate().map(|(index, ops)| (index, ops.as_slice()))
    }

    pub fn into_levels(self) -> Vec<Vec<Operation>> {
        self.levels
    }

    /// All operations in execution order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.levels.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Directed graph of operation dependencies.
///
/// Edges point from dependent to dependency; the sort returns dependencies
/// first.
#[derive(Debug, Clone, Default)]
struct DependencyGraph {
    nodes: BTreeSet<ResourceAddress>,
    /// Adjacency list: key depends on each value.
    edges: BTreeMap<ResourceAddress, BTreeSet<ResourceAddress>>,
}

impl DependencyGraph {
    fn add_node(&mut self, address: ResourceAddress) {
        self.edges.entry(address.clone()).or_default();
        self.nodes.insert(address);
    }

    fn add_edge(&mut self, from: &ResourceAddress, to: &ResourceAddress) {
        self.edges.entry(from.clone()).or_default().insert(to.clone());
    }

    fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    fn validate_levels(&self) -> Result<()> {
        for (from, deps) in &self.edges {
            for to in deps {
                if level_of(to) >= level_of(from) {
                    return Err(Error::DependencyCycle {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm, taking ready nodes in (level, address) order.
    fn topological_sort(&self) -> Result<Vec<ResourceAddress>> {
        let mut remaining: BTreeMap<&ResourceAddress, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&ResourceAddress, Vec<&ResourceAddress>> = BTreeMap::new();
        for node in &self.nodes {
            let deps = self.edges.get(node).map(|deps| {
                deps.iter().filter(|dep| self.nodes.contains(*dep)).collect::<Vec<_>>()
            });
            let deps = deps.unwrap_or_default();
            remaining.insert(node, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(node);
            }
        }

        let mut ready: BTreeSet<(usize, &ResourceAddress)> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| (level_of(node), *node))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some((_, node)) = ready.pop_first() {
            order.push(node.clone());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((level_of(dependent), *dependent));
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .find(|node| !order.contains(node))
                .and_then(|node| {
                    let dep = self.edges.get(node)?.iter().find(|dep| !order.contains(dep))?;
                    Some((node.clone(), dep.clone()))
                });
            if let Some((from, to)) = stuck {
                return Err(Error::DependencyCycle { from, to });
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use repo_model::{
        BypassActor, BypassMode, Enforcement, Environment, Identifiers, Label, RefType, RepositorySettings,
        RequiredDeploymentsRule, Ruleset, RulesetTarget, Secret, DeploymentBranchPolicy,
    };

    fn env(name: &str) -> Operation {
        Operation::create(Resource::Environment(Environment::new(name)))
    }

    fn policy(env: &str, name: &str) -> Operation {
        Operation::create(Resource::DeploymentBranchPolicy(DeploymentBranchPolicy {
            environment: env.into(),
            ref_type: RefType::Branch,
            name: name.into(),
        }))
    }

    fn ruleset(bypass_team: &str, environments: &[&str]) -> Operation {
        Operation::create(Resource::Ruleset(Ruleset {
            name: "default".into(),
            target: RulesetTarget::Branch,
            enforcement: Enforcement::Active,
            source_type: Default::default(),
            conditions: Default::default(),
            bypass_actors: vec![BypassActor {
                actor_id: ActorRef::Name(bypass_team.into()),
                actor_type: ActorType::Team,
                bypass_mode: BypassMode::Always,
            }],
            rules: vec![Rule::RequiredDeployments(RequiredDeploymentsRule {
                required_deployment_environments: environments.iter().map(|e| e.to_string()).collect(),
            })],
        }))
    }

    fn label(name: &str) -> Operation {
        Operation::create(Resource::Label(Label {
            name: name.into(),
            color: "a73a4a".into(),
            description: String::new(),
        }))
    }

    fn addresses(plan: &Plan) -> Vec<String> {
        plan.operations().map(|op| op.address.to_string()).collect()
    }

    #[test]
    fn levels_follow_fixed_order() {
        let plan = Plan::build(vec![
            ruleset("test-team", &["production"]),
            policy("production", "main"),
            label("bug"),
            env("production"),
            Operation::create(Resource::Repository(RepositorySettings::with_defaults("widgets"))),
        ])
        .unwrap();

        assert_eq!(
            addresses(&plan),
            vec![
                "repository.widgets",
                "label.bug",
                "environment.production",
                "deployment_branch_policy[env:production].branch:main",
                "ruleset.default",
            ]
        );
    }

    #[test]
    fn edges_only_name_operations_in_the_plan() {
        let plan = Plan::build(vec![ruleset("test-team", &["production", "staging"]), env("production")]).unwrap();
        let ruleset = plan.operations().last().unwrap();
        assert_eq!(
            ruleset.depends_on,
            vec![ResourceAddress::new(ResourceKind::Environment, "production")]
        );
    }

    #[test]
    fn environment_children_depend_on_environment() {
        let secret = Operation::create(Resource::Secret(Secret {
            scope: Scope::environment("staging"),
            name: "TOKEN".into(),
            value: Some("x".into()),
        }));
        let plan = Plan::build(vec![secret, env("staging")]).unwrap();
        let (_, level_three) = plan.levels().nth(3).unwrap();
        assert_eq!(
            level_three[0].depends_on,
            vec![ResourceAddress::new(ResourceKind::Environment, "staging")]
        );
    }

    #[test]
    fn deletes_carry_no_payload_edges() {
        let delete = Operation::delete(
            ResourceAddress::new(ResourceKind::Ruleset, "old"),
            Identifiers::with_id(3),
        );
        let plan = Plan::build(vec![delete, env("production")]).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.operations().all(|op| op.depends_on.is_empty()));
    }

    #[test]
    fn same_level_edge_is_a_cycle() {
        let mut graph = DependencyGraph::default();
        let a = ResourceAddress::new(ResourceKind::Label, "a");
        let b = ResourceAddress::new(ResourceKind::Webhook, "b");
        graph.add_node(a.clone());
        graph.add_node(b.clone());
        graph.add_edge(&a, &b);
        graph.add_edge(&b, &a);

        assert!(matches!(graph.validate_levels(), Err(Error::DependencyCycle { .. })));
        assert!(matches!(graph.topological_sort(), Err(Error::DependencyCycle { .. })));
    }
}
