use crate::domain::{
    CertificateProvisioner, CertificateRequest, ContainerRuntime, ContainerSpec, ContainerState,
    DeployError, DeployRequest, ImageRegistry, Instance, ProxyRoute, ProxySite, ReverseProxy,
    RunningStatus, SiteRequest, Store, top_domain,
};
use crate::services::dependency_resolver::evaluation_order;
use crate::services::port_allocator::{
    DEFAULT_PORT_RANGE, PortAllocator, PortProbe, assign_ports, port_history,
};
use crate::services::state_journal::{DeployOutcome, Replay, StateJournal};
use crate::services::strategy::select;
use crate::services::ValueEvaluator;
use crate::services::validation::validate;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default pause after starting a provider container.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// State threaded through one journaled operation.
#[derive(Debug, Default)]
pub struct ReconcileContext {
    /// Request recorded for the resulting configuration.
    pub requested: DeployRequest,
    /// Instances of the captured snapshot.
    pub active: Vec<Instance>,
    /// Set right before the first change to the host.
    pub mutated: bool,
    /// Instances the operation began installing.
    pub touched: Vec<Instance>,
    pub changed_hostnames: BTreeSet<String>,
    pub warnings: Vec<String>,
}

impl ReconcileContext {
    pub fn new(requested: DeployRequest, active: Vec<Instance>) -> Self {
        Self {
            requested,
            active,
            ..Default::default()
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    /// The request is the whole desired configuration.
    Full,
    /// The request is merged into the active configuration.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
}

impl fmt::Display for InstanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub port_range: Range<u16>,
    pub settle_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            port_range: DEFAULT_PORT_RANGE,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// External collaborators of the engine.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub proxy: Arc<dyn ReverseProxy>,
    pub certificates: Arc<dyn CertificateProvisioner>,
    pub registry: Arc<dyn ImageRegistry>,
    pub store: Arc<dyn Store>,
}

#[derive(Debug, Clone)]
struct Removal {
    instance: Instance,
    drop_volumes: bool,
}

/// Everything decided before the host is touched.
#[derive(Debug, Default)]
struct DeployPlan {
    removals: Vec<Removal>,
    installs: Vec<Instance>,
    survivors: Vec<Instance>,
}

/// Live view of one active instance.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub label: String,
    pub domain: String,
    pub app_id: String,
    pub recorded: RunningStatus,
    pub containers: Vec<(String, ContainerState)>,
}

/// Reconciles the host with a desired set of instances.
pub struct DeploymentEngine {
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Arc<dyn ReverseProxy>,
    certificates: Arc<dyn CertificateProvisioner>,
    registry: Arc<dyn ImageRegistry>,
    store: Arc<dyn Store>,
    evaluator: ValueEvaluator,
    journal: StateJournal,
    settings: EngineSettings,
    probe: Arc<dyn Fn(u16) -> bool + Send + Sync>,
}

impl fmt::Debug for DeploymentEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentEngine")
            .field("runtime", &self.runtime)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DeploymentEngine {
    pub fn new(
        collaborators: Collaborators,
        settings: EngineSettings,
        probe: impl Fn(u16) -> bool + Send + Sync + 'static,
    ) -> Self {
        let Collaborators {
            runtime,
            proxy,
            certificates,
            registry,
            store,
        } = collaborators;
        Self {
            runtime,
            proxy,
            certificates,
            registry,
            evaluator: ValueEvaluator::new(store.clone()),
            journal: StateJournal::new(store.clone()),
            store,
            settings,
            probe: Arc::new(probe),
        }
    }

    pub fn journal(&self) -> &StateJournal {
        &self.journal
    }

    /// Make `request` the whole configuration of the host.
    pub fn deploy(&self, request: &DeployRequest) -> Result<DeployOutcome> {
        info!("deploying {} site(s)", request.site.len());
        self.journal.restore_if_fail(self, |ctx| {
            ctx.requested = request.clone();
            self.reconcile(ctx, request, DeployMode::Full)
        })
    }

    /// Add or update the instances of `request`, leaving the others alone.
    pub fn merge(&self, request: &DeployRequest) -> Result<DeployOutcome> {
        info!("merging {} site(s)", request.site.len());
        self.journal.restore_if_fail(self, |ctx| {
            ctx.requested = merge_requests(&ctx.requested, request);
            self.reconcile(ctx, request, DeployMode::Merge)
        })
    }

    /// Remove one instance and its data.
    pub fn remove(&self, label: &str) -> Result<DeployOutcome> {
        info!("removing {label}");
        self.journal.restore_if_fail(self, |ctx| {
            let instance = find_active(ctx, label)?.clone();
            ctx.requested.site.retain(|site| site_label(site).as_deref() != Some(label));

            ctx.mutated = true;
            let hostname = instance.hostname();
            self.proxy
                .remove(&hostname)
                .with_context(|| format!("removing proxy site {hostname}"))?;
            self.reload_proxy()?;
            self.remove_instance(&instance, true)?;

            let active: Vec<Instance> = ctx
                .active
                .iter()
                .filter(|i| i.label != label)
                .cloned()
                .collect();
            ctx.changed_hostnames.insert(hostname);
            let hostnames = ctx.changed_hostnames.clone();
            self.publish(ctx, &active, &hostnames)?;
            Ok(active)
        })
    }

    /// Replay the last known-good configuration.
    pub fn restore(&self) -> Result<DeployOutcome> {
        info!("restoring the active configuration");
        self.journal.restore_if_fail(self, |ctx| {
            ctx.mutated = true;
            let snapshot = ctx.active.clone();
            self.replay(&snapshot, ctx)
        })
    }

    pub fn start(&self, label: &str) -> Result<DeployOutcome> {
        self.drive(label, InstanceAction::Start)
    }

    pub fn stop(&self, label: &str) -> Result<DeployOutcome> {
        self.drive(label, InstanceAction::Stop)
    }

    pub fn restart(&self, label: &str) -> Result<DeployOutcome> {
        self.drive(label, InstanceAction::Restart)
    }

    pub fn pause(&self, label: &str) -> Result<DeployOutcome> {
        self.drive(label, InstanceAction::Pause)
    }

    pub fn unpause(&self, label: &str) -> Result<DeployOutcome> {
        self.drive(label, InstanceAction::Unpause)
    }

    /// Active instances with the live state of their containers.
    pub fn status(&self) -> Result<Vec<InstanceStatus>> {
        let snapshot = self.journal.read_current_state()?;
        let mut statuses = Vec::with_capacity(snapshot.deployed.len());
        for instance in snapshot.deployed {
            let mut containers = Vec::new();
            for name in instance.container_names() {
                let state = self
                    .runtime
                    .state(&name)
                    .with_context(|| format!("reading state of {name}"))?;
                containers.push((name, state));
            }
            statuses.push(InstanceStatus {
                label: instance.label,
                domain: instance.domain,
                app_id: instance.app_id,
                recorded: instance.running_status,
                containers,
            });
        }
        Ok(statuses)
    }

    fn reconcile(
        &self,
        ctx: &mut ReconcileContext,
        request: &DeployRequest,
        mode: DeployMode,
    ) -> Result<Vec<Instance>> {
        let plan = self.plan(ctx, request, mode)?;
        self.execute(ctx, plan)
    }

    /// Parse, select strategies, evaluate values and assign ports, without
    /// touching the host.
    fn plan(
        &self,
        ctx: &mut ReconcileContext,
        request: &DeployRequest,
        mode: DeployMode,
    ) -> Result<DeployPlan> {
        let validated = validate(request)?;
        ctx.warnings.extend(validated.warnings);

        let mut incoming = validated.instances;
        for instance in &mut incoming {
            let resolved = self
                .registry
                .resolve(&instance.image)
                .with_context(|| format!("looking up image {}", instance.image))?
                .ok_or_else(|| DeployError::MissingImage(instance.image.clone()))?;
            debug!("{}: image {}", instance.label, resolved.image_id);
            for message in instance.apply_manifest(&resolved)? {
                ctx.warn(message);
            }
        }

        let mut plan = DeployPlan::default();
        let mut simulated = ctx.active.clone();
        if mode == DeployMode::Full {
            let wanted: BTreeSet<&str> = incoming.iter().map(|i| i.label_id.as_str()).collect();
            let (kept, dropped): (Vec<_>, Vec<_>) = simulated
                .into_iter()
                .partition(|i| wanted.contains(i.label_id.as_str()));
            simulated = kept;
            for instance in dropped {
                info!("{}: no longer requested", instance.label);
                plan.removals.push(Removal {
                    instance,
                    drop_volumes: true,
                });
            }
        }

        for mut instance in incoming {
            let selection = select(&instance, &simulated)?;
            info!(
                "{}: {} on {}",
                instance.label, selection.strategy, instance.domain
            );
            if let Some(previous) = selection.previous {
                let keeps_data = selection.strategy.keeps_data();
                if keeps_data {
                    instance.persistent = previous.persistent.clone();
                }
                simulated.retain(|i| i.label != previous.label);
                plan.removals.push(Removal {
                    instance: previous,
                    drop_volumes: !keeps_data,
                });
            }

            let order = evaluation_order(&instance)?;
            self.evaluator.evaluate(&mut instance, &order)?;
            simulated.push(instance.clone());
            plan.installs.push(instance);
        }

        let installed: BTreeSet<&str> = plan.installs.iter().map(|i| i.label.as_str()).collect();
        plan.survivors = simulated
            .into_iter()
            .filter(|i| !installed.contains(i.label.as_str()))
            .collect();

        let probe = self.probe.clone();
        let probe: PortProbe = Box::new(move |port| probe(port));
        let mut allocator = PortAllocator::new(self.settings.port_range.clone(), probe)
            .with_claimed(plan.survivors.iter().flat_map(Instance::published_ports));
        let history = port_history(&ctx.active);
        assign_ports(&mut allocator, &mut plan.installs, &history)?;

        Ok(plan)
    }

    fn execute(&self, ctx: &mut ReconcileContext, plan: DeployPlan) -> Result<Vec<Instance>> {
        let DeployPlan {
            removals,
            mut installs,
            survivors,
        } = plan;

        ctx.mutated = true;
        ctx.touched.extend(installs.iter().cloned());

        let released: BTreeSet<String> = removals.iter().map(|r| r.instance.hostname()).collect();
        if !released.is_empty() {
            for hostname in &released {
                self.proxy
                    .remove(hostname)
                    .with_context(|| format!("removing proxy site {hostname}"))?;
            }
            self.reload_proxy()?;
        }
        for removal in &removals {
            self.remove_instance(&removal.instance, removal.drop_volumes)?;
        }
        ctx.changed_hostnames.extend(released);

        for instance in &mut installs {
            self.install_instance(instance)?;
            self.store
                .save_instance(instance)
                .with_context(|| format!("saving instance {}", instance.label))?;
            ctx.changed_hostnames.insert(instance.hostname());
        }

        let mut active = survivors;
        active.extend(installs);
        let hostnames = ctx.changed_hostnames.clone();
        self.publish(ctx, &active, &hostnames)?;
        Ok(active)
    }

    fn drive(&self, label: &str, action: InstanceAction) -> Result<DeployOutcome> {
        info!("{action} {label}");
        self.journal.restore_if_fail(self, |ctx| {
            let position = ctx
                .active
                .iter()
                .position(|i| i.label == label)
                .ok_or_else(|| DeployError::UnknownLabel(label.to_string()))?;

            ctx.mutated = true;
            let mut active = ctx.active.clone();
            let instance = &mut active[position];
            let status = match action {
                InstanceAction::Start | InstanceAction::Unpause => {
                    self.bring_up(instance)?;
                    RunningStatus::Running
                }
                InstanceAction::Restart => {
                    self.stop_containers(instance);
                    self.bring_up(instance)?;
                    RunningStatus::Running
                }
                InstanceAction::Stop => {
                    self.stop_containers(instance);
                    RunningStatus::Stopped
                }
                InstanceAction::Pause => {
                    for name in instance.container_names().iter().rev() {
                        self.runtime
                            .pause(name)
                            .with_context(|| format!("pausing {name}"))?;
                    }
                    RunningStatus::Paused
                }
            };
            instance.set_running_status(status);
            self.store
                .save_instance(instance)
                .with_context(|| format!("saving instance {label}"))?;
            Ok(active)
        })
    }

    /// Unpause paused containers and recreate the others from their spec.
    fn bring_up(&self, instance: &Instance) -> Result<()> {
        for provider in &instance.providers {
            if self.revive(&provider.container_name, || provider.container_spec())? {
                thread::sleep(self.settings.settle_delay);
            }
        }
        self.revive(&instance.container_name, || instance.container_spec())?;
        Ok(())
    }

    /// Returns whether a new container was started.
    fn revive(&self, name: &str, spec: impl FnOnce() -> ContainerSpec) -> Result<bool> {
        match self.runtime.state(name)? {
            ContainerState::Running => Ok(false),
            ContainerState::Paused => {
                self.runtime
                    .unpause(name)
                    .with_context(|| format!("unpausing {name}"))?;
                Ok(false)
            }
            ContainerState::Stopped | ContainerState::NotCreated => {
                self.runtime.remove(name)?;
                self.runtime
                    .start(&spec())
                    .with_context(|| format!("starting {name}"))?;
                Ok(true)
            }
        }
    }

    /// Main container first, then providers; failures are only logged.
    fn stop_containers(&self, instance: &Instance) {
        for name in instance.container_names().iter().rev() {
            match self.runtime.stop(name) {
                Ok(_) => debug!("container {name} stopped"),
                Err(e) => warn!("failed to stop {name}: {e:#}"),
            }
        }
    }

    fn remove_instance(&self, instance: &Instance, drop_volumes: bool) -> Result<()> {
        info!(
            "{}: removing containers{}",
            instance.label,
            if drop_volumes { " and data" } else { "" }
        );
        self.stop_containers(instance);
        for name in instance.container_names().iter().rev() {
            self.runtime
                .remove(name)
                .with_context(|| format!("removing container {name}"))?;
        }
        if let Some(network) = &instance.network_name {
            self.runtime
                .remove_network(network)
                .with_context(|| format!("removing network {network}"))?;
        }
        if drop_volumes {
            for volume in instance.managed_volume_names() {
                self.runtime
                    .remove_volume(&volume)
                    .with_context(|| format!("removing volume {volume}"))?;
            }
        }
        self.store
            .delete_instance(&instance.label)
            .with_context(|| format!("deleting instance {}", instance.label))
    }

    /// Network, providers (each followed by the settle delay), main container.
    fn install_instance(&self, instance: &mut Instance) -> Result<()> {
        info!("{}: starting on {}", instance.label, instance.domain);
        if let Some(network) = &instance.network_name {
            self.runtime
                .create_network(network)
                .with_context(|| format!("creating network {network}"))?;
        }
        for provider in &instance.providers {
            self.ensure_image(&provider.image)?;
            let handle = self
                .runtime
                .start(&provider.container_spec())
                .with_context(|| format!("starting provider {}", provider.container_name))?;
            debug!("provider {} started ({})", handle.name, handle.id);
            thread::sleep(self.settings.settle_delay);
        }
        self.ensure_image(&instance.image_id)?;
        let handle = self
            .runtime
            .start(&instance.container_spec())
            .with_context(|| format!("starting container {}", instance.container_name))?;
        debug!("container {} started ({})", handle.name, handle.id);
        instance.set_running_status(RunningStatus::Running);
        Ok(())
    }

    fn ensure_image(&self, image: &str) -> Result<()> {
        if self.runtime.image_exists(image)? {
            return Ok(());
        }
        info!("pulling image {image}");
        self.runtime
            .pull_image(image)
            .with_context(|| format!("pulling image {image}"))
    }

    /// Render the proxy for `hostnames`, provision certificates, reload.
    fn publish(
        &self,
        ctx: &mut ReconcileContext,
        active: &[Instance],
        hostnames: &BTreeSet<String>,
    ) -> Result<()> {
        for hostname in hostnames {
            let Some(site) = proxy_site(active, hostname) else {
                continue;
            };
            let path = self
                .proxy
                .render(&site)
                .with_context(|| format!("rendering proxy site {hostname}"))?;
            debug!("proxy site {hostname} written to {}", path.display());
        }

        let certificates = certificate_request(active, hostnames);
        if !certificates.is_empty() {
            if let Err(e) = self.certificates.provision(&certificates) {
                ctx.warn(format!("certificate provisioning failed: {e:#}"));
            }
        }
        self.reload_proxy()
    }

    /// Reload, falling back to a full restart.
    fn reload_proxy(&self) -> Result<()> {
        match self.proxy.reload() {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("proxy reload failed, restarting: {e:#}");
                self.proxy.restart().context("restarting proxy")
            }
        }
    }
}

impl Replay for DeploymentEngine {
    /// Remove whatever the failed run left on the host, without touching
    /// volumes, then start the snapshot instances as they were deployed.
    fn replay(&self, snapshot: &[Instance], ctx: &ReconcileContext) -> Result<Vec<Instance>> {
        let stored = self.store.list_instances().context("listing stored instances")?;
        let on_host: Vec<&Instance> = stored
            .iter()
            .chain(ctx.touched.iter())
            .chain(snapshot.iter())
            .collect();

        let mut hostnames: BTreeSet<String> = on_host.iter().map(|i| i.hostname()).collect();
        for hostname in &hostnames {
            if let Err(e) = self.proxy.remove(hostname) {
                warn!("failed to remove proxy site {hostname}: {e:#}");
            }
        }

        let mut containers = BTreeSet::new();
        let mut networks = BTreeSet::new();
        for instance in &on_host {
            for name in instance.container_names().into_iter().rev() {
                if containers.insert(name.clone()) {
                    if let Err(e) = self.runtime.stop(&name) {
                        debug!("stop {name}: {e:#}");
                    }
                    if let Err(e) = self.runtime.remove(&name) {
                        warn!("failed to remove {name}: {e:#}");
                    }
                }
            }
            if let Some(network) = &instance.network_name {
                if networks.insert(network.clone()) {
                    if let Err(e) = self.runtime.remove_network(network) {
                        debug!("remove network {network}: {e:#}");
                    }
                }
            }
        }

        let keep: BTreeSet<&str> = snapshot.iter().map(|i| i.label.as_str()).collect();
        for instance in &stored {
            if !keep.contains(instance.label.as_str()) {
                self.store.delete_instance(&instance.label)?;
            }
        }

        let mut restored = snapshot.to_vec();
        for instance in &mut restored {
            let status = instance.running_status;
            self.install_instance(instance)?;
            match status {
                RunningStatus::Running => {}
                RunningStatus::Stopped => self.stop_containers(instance),
                RunningStatus::Paused => {
                    for name in instance.container_names().iter().rev() {
                        self.runtime
                            .pause(name)
                            .with_context(|| format!("pausing {name}"))?;
                    }
                }
            }
            instance.set_running_status(status);
            self.store
                .save_instance(instance)
                .with_context(|| format!("saving instance {}", instance.label))?;
        }

        hostnames.extend(restored.iter().map(Instance::hostname));
        let mut scratch = ReconcileContext::default();
        self.publish(&mut scratch, &restored, &hostnames)?;
        Ok(restored)
    }
}

/// Proxy configuration of one hostname, `None` when nothing is served there.
pub fn proxy_site(active: &[Instance], hostname: &str) -> Option<ProxySite> {
    let mut served: Vec<(Option<String>, u16)> = active
        .iter()
        .filter(|i| i.hostname() == hostname)
        .filter_map(|i| {
            i.proxied_port()
                .map(|port| (i.domain_name().location, port))
        })
        .collect();
    if served.is_empty() {
        return None;
    }
    served.sort();
    let located = served.iter().any(|(location, _)| location.is_some());
    Some(ProxySite {
        hostname: hostname.to_string(),
        located,
        routes: served
            .into_iter()
            .map(|(location, port)| ProxyRoute { location, port })
            .collect(),
    })
}

fn find_active<'a>(ctx: &'a ReconcileContext, label: &str) -> Result<&'a Instance> {
    ctx.active
        .iter()
        .find(|i| i.label == label)
        .ok_or_else(|| DeployError::UnknownLabel(label.to_string()).into())
}

/// Label a site entry resolves to, if the entry is well formed.
fn site_label(site: &SiteRequest) -> Option<String> {
    Instance::from_request(0, site).ok().map(|i| i.label)
}

/// Sites of `incoming` replace the sites of `current` with the same label.
pub fn merge_requests(current: &DeployRequest, incoming: &DeployRequest) -> DeployRequest {
    let replaced: BTreeSet<Option<String>> = incoming.site.iter().map(site_label).collect();
    let mut merged: Vec<SiteRequest> = current
        .site
        .iter()
        .filter(|site| !replaced.contains(&site_label(site)))
        .cloned()
        .collect();
    merged.extend(incoming.site.iter().cloned());
    DeployRequest { site: merged }
}

/// Hostnames grouped by registrable domain.
pub fn group_by_top_domain<'a>(
    hostnames: impl IntoIterator<Item = &'a str>,
) -> CertificateRequest {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for hostname in hostnames {
        grouped
            .entry(top_domain(hostname))
            .or_default()
            .push(hostname.to_string());
    }
    grouped
}

/// Every served hostname under the top domains touched by `changed`.
/// A certificate covers a whole top domain, so siblings are requested again.
pub fn certificate_request(active: &[Instance], changed: &BTreeSet<String>) -> CertificateRequest {
    let tops: BTreeSet<String> = changed.iter().map(|h| top_domain(h)).collect();
    let served: BTreeSet<String> = active
        .iter()
        .filter(|i| i.proxied_port().is_some())
        .map(Instance::hostname)
        .filter(|hostname| tops.contains(&top_domain(hostname)))
        .collect();
    group_by_top_domain(served.iter().map(String::as_str))
}
