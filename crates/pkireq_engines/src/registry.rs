#![forbid(unsafe_code)]

//! Name-to-constructor table for the pluggable queue stages. Hosts populate it
//! at startup and resolve the names their configuration carries.

use std::collections::BTreeMap;
use std::sync::Arc;

use pkireq_kernel_contracts::capability::{Notifier, Policy, Service};
use thiserror::Error;

use crate::notifier::{LogNotifier, RecordingNotifier, NOTIFIER_LOG, NOTIFIER_RECORDING};
use crate::policy::{
    AcceptAllPolicy, AgentApprovalPolicy, DenyAllPolicy, POLICY_ACCEPT_ALL, POLICY_AGENT_APPROVAL,
    POLICY_DENY_ALL,
};
use crate::service::{DeferredService, NoopService, SERVICE_DEFERRED, SERVICE_NOOP};

pub type PolicyConstructor = Box<dyn Fn() -> Arc<dyn Policy> + Send + Sync>;
pub type ServiceConstructor = Box<dyn Fn() -> Arc<dyn Service> + Send + Sync>;
pub type NotifierConstructor = Box<dyn Fn() -> Arc<dyn Notifier> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Policy,
    Service,
    Notifier,
}

impl PluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Policy => "policy",
            PluginKind::Service => "service",
            PluginKind::Notifier => "notifier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown {} plugin {name:?}", kind.as_str())]
    UnknownPlugin { kind: PluginKind, name: String },
    #[error("{} plugin {name:?} is already registered", kind.as_str())]
    DuplicatePlugin { kind: PluginKind, name: String },
}

#[derive(Default)]
pub struct PluginRegistry {
    policies: BTreeMap<String, PolicyConstructor>,
    services: BTreeMap<String, ServiceConstructor>,
    notifiers: BTreeMap<String, NotifierConstructor>,
}

fn insert_unique<C>(
    table: &mut BTreeMap<String, C>,
    kind: PluginKind,
    name: String,
    ctor: C,
) -> Result<(), RegistryError> {
    if table.contains_key(&name) {
        return Err(RegistryError::DuplicatePlugin { kind, name });
    }
    table.insert(name, ctor);
    Ok(())
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every stock policy, service and notifier.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.policies.insert(
            POLICY_ACCEPT_ALL.to_string(),
            Box::new(|| -> Arc<dyn Policy> { Arc::new(AcceptAllPolicy) }),
        );
        r.policies.insert(
            POLICY_AGENT_APPROVAL.to_string(),
            Box::new(|| -> Arc<dyn Policy> { Arc::new(AgentApprovalPolicy) }),
        );
        r.policies.insert(
            POLICY_DENY_ALL.to_string(),
            Box::new(|| -> Arc<dyn Policy> { Arc::new(DenyAllPolicy) }),
        );
        r.services.insert(
            SERVICE_NOOP.to_string(),
            Box::new(|| -> Arc<dyn Service> { Arc::new(NoopService) }),
        );
        r.services.insert(
            SERVICE_DEFERRED.to_string(),
            Box::new(|| -> Arc<dyn Service> { Arc::new(DeferredService::new()) }),
        );
        r.notifiers.insert(
            NOTIFIER_LOG.to_string(),
            Box::new(|| -> Arc<dyn Notifier> { Arc::new(LogNotifier) }),
        );
        r.notifiers.insert(
            NOTIFIER_RECORDING.to_string(),
            Box::new(|| -> Arc<dyn Notifier> { Arc::new(RecordingNotifier::new()) }),
        );
        r
    }

    pub fn register_policy<F>(&mut self, name: impl Into<String>, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Arc<dyn Policy> + Send + Sync + 'static,
    {
        insert_unique(&mut self.policies, PluginKind::Policy, name.into(), Box::new(ctor))
    }

    pub fn register_service<F>(&mut self, name: impl Into<String>, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    {
        insert_unique(&mut self.services, PluginKind::Service, name.into(), Box::new(ctor))
    }

    pub fn register_notifier<F>(
        &mut self,
        name: impl Into<String>,
        ctor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Arc<dyn Notifier> + Send + Sync + 'static,
    {
        insert_unique(
            &mut self.notifiers,
            PluginKind::Notifier,
            name.into(),
            Box::new(ctor),
        )
    }

    pub fn build_policy(&self, name: &str) -> Result<Arc<dyn Policy>, RegistryError> {
        self.policies
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| unknown(PluginKind::Policy, name))
    }

    pub fn build_service(&self, name: &str) -> Result<Arc<dyn Service>, RegistryError> {
        self.services
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| unknown(PluginKind::Service, name))
    }

    pub fn build_notifier(&self, name: &str) -> Result<Arc<dyn Notifier>, RegistryError> {
        self.notifiers
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| unknown(PluginKind::Notifier, name))
    }

    pub fn names(&self, kind: PluginKind) -> Vec<&str> {
        match kind {
            PluginKind::Policy => self.policies.keys().map(String::as_str).collect(),
            PluginKind::Service => self.services.keys().map(String::as_str).collect(),
            PluginKind::Notifier => self.notifiers.keys().map(String::as_str).collect(),
        }
    }
}

fn unknown(kind: PluginKind, name: &str) -> RegistryError {
    RegistryError::UnknownPlugin {
        kind,
        name: name.to_string(),
    }
}
