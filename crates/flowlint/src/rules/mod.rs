//! The rule framework and the rule catalog.

use std::sync::Arc;

use crate::config::Config;
use crate::finding::{Diagnostic, Fix, Kind};
use crate::models::Position;
use crate::state::LintState;
use crate::visitor::Visitor;

pub(crate) mod injection;

mod archived_uses;
mod artifact_poisoning;
mod artipacked;
mod bot_conditions;
mod cache_poisoning;
mod code_injection;
mod commit_sha;
mod conditional;
mod credentials;
mod deprecated_commands;
mod env_var;
mod envpath_injection;
mod envvar_injection;
mod expression;
mod id;
mod improper_access_control;
mod job_needs;
mod known_vulnerable_actions;
mod permissions;
mod poisonable_step;
mod ref_confusion;
mod secret_exposure;
mod secrets_in_artifacts;
mod timeout_minutes;
mod toctou_checkout;
mod unmasked_secret_exposure;
mod unsound_contains;
mod untrusted_checkout;
mod workflow_call;

/// A lint rule: visitor callbacks plus identity and accumulated output.
///
/// Rules hold their own per-workflow state, cleared in the `pre` events.
pub trait Rule: Visitor {
    /// The stable identifier used in output and ignore patterns.
    fn name(&self) -> &'static str;

    /// A one-line description of what the rule checks.
    fn description(&self) -> &'static str;

    /// Drains the diagnostics accumulated so far.
    fn take_diagnostics(&mut self) -> Vec<Diagnostic>;

    /// Drains the autofix registrations accumulated so far.
    fn take_fixes(&mut self) -> Vec<Fix>;

    fn set_config(&mut self, _config: Arc<Config>) {}
}

/// Shared rule state: accumulated diagnostics and fixes.
pub(crate) struct RuleBase {
    rule: &'static str,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) fixes: Vec<Fix>,
    pub(crate) config: Option<Arc<Config>>,
}

impl RuleBase {
    pub(crate) fn new(rule: &'static str) -> Self {
        Self {
            rule,
            diagnostics: Vec::new(),
            fixes: Vec::new(),
            config: None,
        }
    }

    /// Records a diagnostic under this rule's name.
    pub(crate) fn report(&mut self, pos: Position, kind: Kind, message: impl Into<String>) {
        let rule = self.rule;
        self.report_as(rule, pos, kind, message);
    }

    /// Records a diagnostic under an explicit rule name, for rules that
    /// pick between idents (e.g. `code-injection-critical` vs `-medium`).
    pub(crate) fn report_as(
        &mut self,
        rule: &'static str,
        pos: Position,
        kind: Kind,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic::new(rule, pos, kind, message));
    }

    /// Registers a deferred autofix.
    pub(crate) fn fix(&mut self, fix: Fix) {
        self.fixes.push(fix);
    }
}

/// Implements the [`Rule`] boilerplate for a type with a `base: RuleBase`
/// field.
macro_rules! rule_meta {
    ($t:ty, $id:literal, $desc:literal) => {
        impl $t {
            pub(crate) const NAME: &'static str = $id;
        }

        impl crate::rules::Rule for $t {
            fn name(&self) -> &'static str {
                $id
            }

            fn description(&self) -> &'static str {
                $desc
            }

            fn take_diagnostics(&mut self) -> Vec<crate::finding::Diagnostic> {
                std::mem::take(&mut self.base.diagnostics)
            }

            fn take_fixes(&mut self) -> Vec<crate::finding::Fix> {
                std::mem::take(&mut self.base.fixes)
            }

            fn set_config(&mut self, config: std::sync::Arc<crate::config::Config>) {
                self.base.config = Some(config);
            }
        }
    };
}

pub(crate) use rule_meta;

/// Builds fresh instances of every rule, in registration order.
///
/// Each analyzed file gets its own set; rules are stateful and never
/// shared between files.
pub fn default_rules(state: &LintState) -> Vec<Box<dyn Rule>> {
    let mut rules: Vec<Box<dyn Rule>> = vec![
        Box::new(expression::ExprRule::new()),
        Box::new(env_var::EnvVarRule::new()),
        Box::new(credentials::CredentialsRule::new()),
        Box::new(id::IdRule::new()),
        Box::new(job_needs::JobNeedsRule::new()),
        Box::new(permissions::PermissionsRule::new()),
        Box::new(workflow_call::WorkflowCallRule::new(
            state.reusable_workflows.clone(),
        )),
        Box::new(conditional::ConditionalRule::new()),
        Box::new(timeout_minutes::TimeoutMinutesRule::new()),
        Box::new(deprecated_commands::DeprecatedCommandsRule::new()),
        Box::new(commit_sha::CommitShaRule::new(state.repo_catalog.clone())),
        Box::new(code_injection::CodeInjectionRule::new()),
        Box::new(envvar_injection::EnvVarInjectionRule::new()),
        Box::new(envpath_injection::EnvPathInjectionRule::new()),
        Box::new(artifact_poisoning::ArtifactPoisoningCriticalRule::new()),
        Box::new(artifact_poisoning::ArtifactPoisoningMediumRule::new()),
        Box::new(secrets_in_artifacts::SecretsInArtifactsRule::new()),
        Box::new(cache_poisoning::CachePoisoningRule::new()),
        Box::new(untrusted_checkout::UntrustedCheckoutRule::new()),
        Box::new(toctou_checkout::ToctouCheckoutRule::new()),
        Box::new(secret_exposure::SecretExposureRule::new()),
        Box::new(unmasked_secret_exposure::UnmaskedSecretExposureRule::new()),
        Box::new(improper_access_control::ImproperAccessControlRule::new()),
        Box::new(known_vulnerable_actions::KnownVulnerableActionsRule::new(
            state.advisory_catalog.clone(),
            state.repo_catalog.clone(),
        )),
        Box::new(ref_confusion::RefConfusionRule::new(
            state.repo_catalog.clone(),
        )),
        Box::new(bot_conditions::BotConditionsRule::new()),
        Box::new(artipacked::ArtipackedRule::new()),
        Box::new(unsound_contains::UnsoundContainsRule::new()),
        Box::new(archived_uses::ArchivedUsesRule::new()),
        Box::new(poisonable_step::PoisonableStepRule::new()),
    ];
    for rule in &mut rules {
        rule.set_config(state.config.clone());
    }
    rules
}
