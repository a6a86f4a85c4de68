//! The tagged union over every descriptor type.

use serde::{Deserialize, Serialize};

use crate::access::{Collaborator, TeamAccess};
use crate::actor::{ActorKind, ActorRef};
use crate::address::{ResourceAddress, ResourceKind, Scope};
use crate::environment::{DeploymentBranchPolicy, Environment, ProtectionRule, ReviewerType};
use crate::keyed::{Autolink, CustomProperty, DeployKey, Label, Secret, Variable, Webhook};
use crate::repository::RepositorySettings;
use crate::ruleset::{ActorType, Rule, Ruleset};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum Resource {
    Repository(RepositorySettings),
    Collaborator(Collaborator),
    TeamAccess(TeamAccess),
    Label(Label),
    Webhook(Webhook),
    DeployKey(DeployKey),
    CustomProperty(CustomProperty),
    Autolink(Autolink),
    Environment(Environment),
    Secret(Secret),
    Variable(Variable),
    DeploymentBranchPolicy(DeploymentBranchPolicy),
    Ruleset(Ruleset),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Repository(_) => ResourceKind::Repository,
            Self::Collaborator(_) => ResourceKind::Collaborator,
            Self::TeamAccess(_) => ResourceKind::TeamAccess,
            Self::Label(_) => ResourceKind::Label,
            Self::Webhook(_) => ResourceKind::Webhook,
            Self::DeployKey(_) => ResourceKind::DeployKey,
            Self::CustomProperty(_) => ResourceKind::CustomProperty,
            Self::Autolink(_) => ResourceKind::Autolink,
            Self::Environment(_) => ResourceKind::Environment,
            Self::Secret(_) => ResourceKind::Secret,
            Self::Variable(_) => ResourceKind::Variable,
            Self::DeploymentBranchPolicy(_) => ResourceKind::DeploymentBranchPolicy,
            Self::Ruleset(_) => ResourceKind::Ruleset,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::Secret(secret) => secret.scope.clone(),
            Self::Variable(variable) => variable.scope.clone(),
            Self::DeploymentBranchPolicy(policy) => Scope::environment(&policy.environment),
            _ => Scope::Repository,
        }
    }

    /// The identity key used to match desired against live entries.
    pub fn key(&self) -> String {
        match self {
            Self::Repository(settings) => settings.name.clone(),
            Self::Collaborator(collaborator) => collaborator.login.clone(),
            Self::TeamAccess(team) => team.slug.clone(),
            Self::Label(label) => label.name.clone(),
            Self::Webhook(hook) => hook.url.clone(),
            Self::DeployKey(key) => key.title.clone(),
            Self::CustomProperty(property) => property.name.clone(),
            Self::Autolink(link) => link.key_prefix.clone(),
            Self::Environment(env) => env.name.clone(),
            Self::Secret(secret) => secret.name.clone(),
            Self::Variable(variable) => variable.name.clone(),
            Self::DeploymentBranchPolicy(policy) => policy.key(),
            Self::Ruleset(ruleset) => ruleset.name.clone(),
        }
    }

    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::scoped(self.kind(), self.scope(), self.key())
    }

    /// The write-only value carried by this resource, if any.
    pub fn write_only_value(&self) -> Option<&str> {
        match self {
            Self::Secret(secret) => secret.value.as_deref(),
            Self::Webhook(hook) => hook.secret.as_deref(),
            _ => None,
        }
    }

    /// Every actor reference embedded in this resource, in document order.
    pub fn actor_refs(&self) -> Vec<(ActorKind, &ActorRef)> {
        let mut refs = Vec::new();
        match self {
            Self::Environment(env) => {
                for reviewer in env.reviewers() {
                    refs.push((reviewer_kind(reviewer.reviewer_type), &reviewer.id));
                }
            }
            Self::Ruleset(ruleset) => {
                for actor in &ruleset.bypass_actors {
                    if let Some(kind) = bypass_kind(actor.actor_type) {
                        refs.push((kind, &actor.actor_id));
                    }
                }
                for rule in &ruleset.rules {
                    if let Rule::RequiredStatusChecks(checks) = rule {
                        for check in &checks.required_status_checks {
                            if let Some(id) = &check.integration_id {
                                refs.push((ActorKind::Integration, id));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        refs
    }

    /// Visit every actor reference mutably, e.g. to substitute resolved ids.
    pub fn for_each_actor_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(ActorKind, &mut ActorRef),
    {
        match self {
            Self::Environment(env) => {
                for rule in &mut env.protection_rules {
                    if let ProtectionRule::RequiredReviewers { reviewers, .. } = rule {
                        for reviewer in reviewers {
                            visit(reviewer_kind(reviewer.reviewer_type), &mut reviewer.id);
                        }
                    }
                }
            }
            Self::Ruleset(ruleset) => {
                for actor in &mut ruleset.bypass_actors {
                    if let Some(kind) = bypass_kind(actor.actor_type) {
                        visit(kind, &mut actor.actor_id);
                    }
                }
                for rule in &mut ruleset.rules {
                    if let Rule::RequiredStatusChecks(checks) = rule {
                        for check in &mut checks.required_status_checks {
                            if let Some(id) = &mut check.integration_id {
                                visit(ActorKind::Integration, id);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Whether every embedded actor reference has a numeric id.
    pub fn is_resolved(&self) -> bool {
        self.actor_refs().iter().all(|(_, actor)| actor.is_resolved())
    }
}

fn reviewer_kind(reviewer_type: ReviewerType) -> ActorKind {
    match reviewer_type {
        ReviewerType::User => ActorKind::User,
        ReviewerType::Team => ActorKind::Team,
    }
}

fn bypass_kind(actor_type: ActorType) -> Option<ActorKind> {
    match actor_type {
        ActorType::Team => Some(ActorKind::Team),
        ActorType::Integration => Some(ActorKind::Integration),
        ActorType::OrganizationAdmin | ActorType::RepositoryRole => None,
    }
}
