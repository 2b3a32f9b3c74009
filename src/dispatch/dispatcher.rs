use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::Result;
use super::search_path::SearchPath;
use crate::balancer::service::LoadBalancer;
use crate::clock::Clock;
use crate::cluster::service::SearchCluster;
use crate::error::DispatchError;
use crate::invoker::factory::InvokerFactory;
use crate::invoker::types::SearchInvoker;
use crate::random::{RandomSource, StdRandom};
use crate::search::coverage::Coverage;
use crate::search::types::{Query, ResultError};
use crate::transport::types::ConnectionPool;

/// Groups tried per query before giving up.
pub const MAX_GROUP_SELECTION_ATTEMPTS: usize = 3;

/// Entry point of the dispatch layer: turns a query into a ready-to-run invoker.
///
/// Tries, in order, an explicit search path on the query, direct dispatch to a local
/// corpus node, and finally load-balanced group selection with retries.
pub struct Dispatcher {
    cluster: Arc<SearchCluster>,
    load_balancer: Arc<LoadBalancer>,
    factory: InvokerFactory,
    random: Mutex<Box<dyn RandomSource>>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(cluster: Arc<SearchCluster>, pool: Arc<dyn ConnectionPool>, clock: Arc<dyn Clock>) -> Self {
        let load_balancer = Arc::new(LoadBalancer::with_sources(
            cluster.groups(),
            cluster.config().load_balancing_policy,
            Box::new(StdRandom::new()),
            clock.clone(),
        ));
        let factory = InvokerFactory::new(cluster.clone(), pool, clock.clone());
        Self::with_parts(cluster, load_balancer, factory, Box::new(StdRandom::new()), clock)
    }

    pub fn with_parts(
        cluster: Arc<SearchCluster>,
        load_balancer: Arc<LoadBalancer>,
        factory: InvokerFactory,
        random: Box<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cluster,
            load_balancer,
            factory,
            random: Mutex::new(random),
            clock,
        }
    }

    pub fn cluster(&self) -> &Arc<SearchCluster> {
        &self.cluster
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    /// Time source shared with the invokers. Query deadlines must be taken from it.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Pick the target for `query` and build its invoker. No node is contacted here.
    ///
    /// On load-balanced dispatch the chosen group is recorded on the query as search
    /// path `/<group>` and released again when the invoker is closed.
    pub fn get_search_invoker(&self, query: &mut Query) -> Result<SearchInvoker> {
        if let Some(invoker) = self.search_path_invoker(query)? {
            return Ok(invoker);
        }
        self.internal_invoker(query)
    }

    fn search_path_invoker(&self, query: &Query) -> Result<Option<SearchInvoker>> {
        let Some(raw) = query.search_path.as_deref() else {
            return Ok(None);
        };
        let Some(path) = SearchPath::parse(raw)? else {
            return Ok(None);
        };
        let nodes = path.select_nodes(&self.cluster, &mut **self.random.lock())?;
        if nodes.is_empty() {
            debug!("Search path {} selects no nodes, dispatching normally", path);
            return Ok(None);
        }

        info!("Dispatching query {} with search path {}", query.id, path);
        let invoker = self
            .factory
            .create_search_invoker(&nodes, true)
            .unwrap_or_else(|| {
                self.factory.error_invoker(
                    ResultError::BackendCommunication(format!(
                        "No reachable nodes for search path {}",
                        path
                    )),
                    Coverage::unanswered(nodes.len() as u32),
                )
            });
        Ok(Some(invoker))
    }

    fn internal_invoker(&self, query: &mut Query) -> Result<SearchInvoker> {
        if let Some(node) = self.cluster.local_corpus_dispatch_target() {
            debug!("Dispatching query {} directly to {}", query.id, node);
            return self
                .factory
                .create_search_invoker(std::slice::from_ref(node), true)
                .ok_or_else(|| DispatchError::DirectDispatch {
                    key: node.key(),
                    hostname: node.hostname().to_string(),
                });
        }

        let covered = self.cluster.groups_with_sufficient_coverage();
        let groups = self.cluster.groups().len();
        let max_attempts = (covered + 1).min(groups).min(MAX_GROUP_SELECTION_ATTEMPTS);

        let mut rejected = HashSet::new();
        for attempt in 0..max_attempts {
            let Some(group) = self.load_balancer.take_group(&rejected) else {
                break;
            };
            let accept_incomplete_coverage = attempt + 1 == max_attempts;
            match self
                .factory
                .create_search_invoker(group.nodes(), accept_incomplete_coverage)
            {
                Some(mut invoker) => {
                    debug!(
                        "Dispatching query {} to group {} after {} retries",
                        query.id,
                        group.id(),
                        attempt
                    );
                    query.search_path = Some(format!("/{}", group.id()));
                    let load_balancer = self.load_balancer.clone();
                    invoker.set_teardown(Box::new(move |success, elapsed| {
                        load_balancer.release_group(&group, success, elapsed)
                    }));
                    return Ok(invoker);
                }
                None => {
                    self.load_balancer.release_group(&group, false, Duration::ZERO);
                    rejected.insert(group.id());
                }
            }
        }

        let mut rejected: Vec<u32> = rejected.into_iter().collect();
        rejected.sort_unstable();
        error!(
            "No suitable groups to dispatch query {}. Rejected: {:?}",
            query.id, rejected
        );
        Err(DispatchError::NoSuitableGroups { rejected })
    }
}
