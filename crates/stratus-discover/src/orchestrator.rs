//! Discovery orchestration engine.
//!
//! Spawns one tokio task per top-level resource family and expands every
//! discovered security group into its member instances. All branches push
//! into one bounded channel; a supervisor task closes the channel once the
//! completion counter drains to zero.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stratus_core::error::{Result, ScanError};
use stratus_core::events::Event;
use stratus_core::types::{Resource, ResourceKind};

use crate::config::{default_families, DiscoverConfig};
use crate::scanner::Scanner;

/// Reference channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Instance lookups in flight at once under [`NestedExpansion::Concurrent`].
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 8;

/// How security groups are expanded into their instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NestedExpansion {
    /// Inside the security-group branch: one group's instances are fully
    /// emitted before the next group is listed.
    #[default]
    Inline,
    /// One task per group; groups expand in parallel.
    Concurrent,
}

/// Options for a [`Discoverer`].
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub families: Vec<ResourceKind>,
    pub channel_capacity: usize,
    pub nested_expansion: NestedExpansion,
    /// Upper bound on concurrent nested lookups; a limit of zero is treated
    /// as one.
    pub max_concurrent_lookups: usize,
    /// Cancelling this token abandons every run started with these options.
    pub cancel: CancellationToken,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            families: default_families(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            nested_expansion: NestedExpansion::default(),
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
            cancel: CancellationToken::new(),
        }
    }
}

impl DiscoveryOptions {
    pub fn from_config(config: &DiscoverConfig) -> Self {
        Self {
            families: config.families.clone(),
            channel_capacity: config.channel_capacity,
            nested_expansion: if config.expand_concurrently {
                NestedExpansion::Concurrent
            } else {
                NestedExpansion::Inline
            },
            max_concurrent_lookups: config.max_concurrent_lookups,
            cancel: CancellationToken::new(),
        }
    }

    /// Families that get their own branch, deduplicated in order.
    fn top_level_families(&self) -> Vec<ResourceKind> {
        let mut families = Vec::with_capacity(self.families.len());
        for kind in &self.families {
            if !kind.is_top_level() {
                tracing::warn!(kind = %kind, "Not a top-level family, skipping");
                continue;
            }
            if !families.contains(kind) {
                families.push(*kind);
            }
        }
        families
    }
}

// ── Completion counter ────────────────────────────────────────────

/// Outstanding-branch counter for a single discovery run.
///
/// Every branch holds a [`BranchGuard`]; dropping the last guard wakes the
/// waiter. A guard can only be registered while another guard is alive (or
/// before the run starts), so the count reaches zero at most once.
#[derive(Debug, Default)]
pub struct CompletionCounter {
    outstanding: AtomicUsize,
    drained: Notify,
}

impl CompletionCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count one more outstanding branch.
    pub fn register(self: &Arc<Self>) -> BranchGuard {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        BranchGuard {
            counter: Arc::clone(self),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Resolve once no branch is outstanding.
    pub async fn wait_for_zero(&self) {
        loop {
            let drained = self.drained.notified();
            if self.outstanding() == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Marks one outstanding branch; decrements the counter on drop.
#[derive(Debug)]
pub struct BranchGuard {
    counter: Arc<CompletionCounter>,
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        // Only the guard observing the 1 -> 0 transition notifies.
        if self.counter.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.counter.drained.notify_one();
        }
    }
}

// ── Branches ──────────────────────────────────────────────────────

/// One unit of scanning work feeding the run's channel.
struct Branch {
    kind: ResourceKind,
    /// Security group being expanded, for nested branches.
    scope: Option<String>,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
    counter: Arc<CompletionCounter>,
    emitted: usize,
    // Declared last so it drops after `events`.
    _guard: BranchGuard,
}

impl Branch {
    fn new(
        kind: ResourceKind,
        events: mpsc::Sender<Event>,
        cancel: CancellationToken,
        counter: &Arc<CompletionCounter>,
    ) -> Self {
        Self {
            kind,
            scope: None,
            events,
            cancel,
            counter: Arc::clone(counter),
            emitted: 0,
            _guard: counter.register(),
        }
    }

    /// Register a child branch while this one is still outstanding.
    fn nested(&self, kind: ResourceKind, scope: &str) -> Self {
        let mut child = Self::new(kind, self.events.clone(), self.cancel.clone(), &self.counter);
        child.scope = Some(scope.to_string());
        child
    }

    /// Run a scanner call unless the run is cancelled first.
    async fn call<T>(&self, operation: impl Future<Output = Result<T>>) -> Option<Result<T>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = operation => Some(result),
        }
    }

    /// Send one event, waiting for channel space.
    ///
    /// Returns false when the run is cancelled or the consumer is gone; the
    /// branch should stop.
    async fn emit(&mut self, event: Event) -> bool {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        };
        if sent {
            self.emitted += 1;
        }
        sent
    }

    async fn emit_all<T: Into<Resource>>(&mut self, records: impl IntoIterator<Item = T>) -> bool {
        for record in records {
            if !self.emit(Event::resource(record)).await {
                return false;
            }
        }
        true
    }

    async fn fail(&mut self, error: ScanError) -> bool {
        tracing::warn!(
            kind = %self.kind,
            scope = self.scope.as_deref(),
            error = %error,
            "Discovery branch failed"
        );
        self.emit(Event::error(self.kind, error)).await
    }

    fn finish(self) {
        tracing::debug!(
            kind = %self.kind,
            scope = self.scope.as_deref(),
            emitted = self.emitted,
            cancelled = self.cancel.is_cancelled(),
            "Discovery branch complete"
        );
    }
}

/// Emit every present record of one listing, or a single tagged error.
async fn run_listing<T, F>(mut branch: Branch, listing: F)
where
    T: Into<Resource>,
    F: Future<Output = Result<Vec<Option<T>>>>,
{
    match branch.call(listing).await {
        None => {}
        Some(Ok(records)) => {
            branch.emit_all(records.into_iter().flatten()).await;
        }
        Some(Err(e)) => {
            branch.fail(e).await;
        }
    }
    branch.finish();
}

async fn run_branch(
    scanner: Arc<dyn Scanner>,
    branch: Branch,
    expansion: NestedExpansion,
    lookups: Arc<Semaphore>,
) {
    let kind = branch.kind;
    match kind {
        ResourceKind::SecurityGroup => {
            scan_security_groups(scanner, branch, expansion, lookups).await
        }
        ResourceKind::LoadBalancer => run_listing(branch, scanner.list_load_balancers()).await,
        ResourceKind::DbInstance => run_listing(branch, scanner.list_database_instances()).await,
        ResourceKind::DbSecurityGroup => {
            run_listing(branch, scanner.list_database_security_groups()).await
        }
        ResourceKind::AutoScalingGroup => {
            run_listing(branch, scanner.list_auto_scaling_groups()).await
        }
        ResourceKind::RouteTable => run_listing(branch, scanner.list_route_tables()).await,
        ResourceKind::Subnet => run_listing(branch, scanner.list_subnets()).await,
        // Filtered out by `top_level_families`.
        ResourceKind::Instance => branch.finish(),
    }
}

/// List security groups, emitting each one and expanding it into instances.
async fn scan_security_groups(
    scanner: Arc<dyn Scanner>,
    mut branch: Branch,
    expansion: NestedExpansion,
    lookups: Arc<Semaphore>,
) {
    let groups = match branch.call(scanner.list_security_groups()).await {
        None => return branch.finish(),
        Some(Err(e)) => {
            branch.fail(e).await;
            return branch.finish();
        }
        Some(Ok(groups)) => groups,
    };

    for group in groups.into_iter().flatten() {
        let group_id = group.group_id.clone();
        if !branch.emit(Event::resource(group)).await {
            break;
        }
        let Some(group_id) = group_id else {
            continue;
        };

        let nested = branch.nested(ResourceKind::Instance, &group_id);
        match expansion {
            NestedExpansion::Inline => {
                if !expand_group(scanner.as_ref(), nested, &group_id).await {
                    break;
                }
            }
            NestedExpansion::Concurrent => {
                let scanner = Arc::clone(&scanner);
                let lookups = Arc::clone(&lookups);
                // The nested guard is already registered; waiting for a
                // permit keeps the run open.
                tokio::spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = nested.cancel.cancelled() => None,
                        permit = lookups.acquire() => permit.ok(),
                    };
                    match permit {
                        Some(_permit) => {
                            expand_group(scanner.as_ref(), nested, &group_id).await;
                        }
                        None => nested.finish(),
                    }
                });
            }
        }
    }

    branch.finish();
}

/// Emit the instances of one security group, flattened out of their
/// reservations. A failed lookup yields one instance-tagged error.
///
/// Returns false when the run was cancelled or the consumer went away.
async fn expand_group(scanner: &dyn Scanner, mut branch: Branch, group_id: &str) -> bool {
    let proceed = match branch
        .call(scanner.list_instances_in_security_group(group_id))
        .await
    {
        None => false,
        Some(Err(e)) => branch.fail(e).await,
        Some(Ok(reservations)) => {
            let instances = reservations
                .into_iter()
                .flatten()
                .flat_map(|r| r.instances)
                .flatten();
            branch.emit_all(instances).await
        }
    };
    branch.finish();
    proceed
}

// ── Discoverer ────────────────────────────────────────────────────

/// Fans discovery out across resource families and merges the results
/// into one stream.
pub struct Discoverer {
    scanner: Arc<dyn Scanner>,
    options: DiscoveryOptions,
}

impl Discoverer {
    pub fn new(scanner: Arc<dyn Scanner>, options: DiscoveryOptions) -> Self {
        Self { scanner, options }
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Start a discovery run and return its event stream immediately.
    ///
    /// Must be called from within a Tokio runtime. Each call is an
    /// independent run with its own channel and completion counter.
    pub fn discover(&self) -> DiscoveryStream {
        let run_id = Uuid::new_v4();
        let families = self.options.top_level_families();
        // tokio channels require a non-zero capacity.
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let cancel = self.options.cancel.child_token();
        let counter = CompletionCounter::new();
        let lookups = Arc::new(Semaphore::new(self.options.max_concurrent_lookups.max(1)));

        // Every top-level branch is counted before any of them starts.
        let branches: Vec<Branch> = families
            .iter()
            .map(|&kind| Branch::new(kind, tx.clone(), cancel.clone(), &counter))
            .collect();

        tracing::info!(
            run_id = %run_id,
            families = ?families,
            expansion = ?self.options.nested_expansion,
            max_concurrent_lookups = self.options.max_concurrent_lookups,
            "Starting discovery"
        );

        for branch in branches {
            let scanner = Arc::clone(&self.scanner);
            let expansion = self.options.nested_expansion;
            tokio::spawn(run_branch(scanner, branch, expansion, Arc::clone(&lookups)));
        }

        let supervisor = tokio::spawn(supervise(run_id, Arc::clone(&counter), tx));

        DiscoveryStream {
            run_id,
            events: rx,
            cancel,
            counter,
            supervisor,
        }
    }
}

/// Hold the last sender until every branch is done, then close the channel.
async fn supervise(run_id: Uuid, counter: Arc<CompletionCounter>, last_sender: mpsc::Sender<Event>) {
    let start = Instant::now();
    counter.wait_for_zero().await;
    drop(last_sender);

    tracing::info!(
        run_id = %run_id,
        duration_ms = start.elapsed().as_millis(),
        "Discovery complete"
    );
}

/// Receiving end of one discovery run.
///
/// Yields events until every branch has finished, then `None`. Dropping the
/// stream stops the run's branches at their next send.
pub struct DiscoveryStream {
    run_id: Uuid,
    events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    counter: Arc<CompletionCounter>,
    supervisor: JoinHandle<()>,
}

impl DiscoveryStream {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next event, or `None` once the run is complete.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Abandon the run. Branches stop without emitting further events and
    /// the stream still closes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Branches (top-level and nested) not yet finished.
    pub fn outstanding_branches(&self) -> usize {
        self.counter.outstanding()
    }

    /// Whether the supervisor has closed the stream.
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }

    pub fn into_receiver(self) -> mpsc::Receiver<Event> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_counter_without_branches_is_drained() {
        let counter = CompletionCounter::new();
        assert_eq!(counter.outstanding(), 0);
        tokio::time::timeout(Duration::from_secs(1), counter.wait_for_zero())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_counter_waits_for_nested_guards() {
        let counter = CompletionCounter::new();
        let parent = counter.register();
        let child = counter.register();
        drop(parent);
        assert_eq!(counter.outstanding(), 1);

        let waiter = tokio::spawn({
            let counter = Arc::clone(&counter);
            async move { counter.wait_for_zero().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(child);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counter_concurrent_release() {
        let counter = CompletionCounter::new();
        let guards: Vec<BranchGuard> = (0..64).map(|_| counter.register()).collect();

        let handles: Vec<_> = guards
            .into_iter()
            .map(|guard| {
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    drop(guard);
                })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.outstanding(), 0);
    }

    #[test]
    fn test_top_level_families_filters_and_dedupes() {
        let options = DiscoveryOptions {
            families: vec![
                ResourceKind::Subnet,
                ResourceKind::Instance,
                ResourceKind::LoadBalancer,
                ResourceKind::Subnet,
            ],
            ..Default::default()
        };
        assert_eq!(
            options.top_level_families(),
            vec![ResourceKind::Subnet, ResourceKind::LoadBalancer]
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = DiscoverConfig {
            expand_concurrently: true,
            channel_capacity: 8,
            max_concurrent_lookups: 2,
            ..Default::default()
        };
        let options = DiscoveryOptions::from_config(&config);
        assert_eq!(options.nested_expansion, NestedExpansion::Concurrent);
        assert_eq!(options.channel_capacity, 8);
        assert_eq!(options.max_concurrent_lookups, 2);
        assert_eq!(options.families, default_families());
    }
}
