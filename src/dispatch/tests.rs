//! Dispatch Module Tests
//!
//! Covers search path parsing and evaluation, group selection with retries, and the
//! full query path from the HTTP handler down to mock nodes.
//!
//! ## Test Scopes
//! - **Search Path Parsing**: Syntax, canonical form, error reporting.
//! - **Search Path Evaluation**: Node and group resolution against a cluster.
//! - **Dispatcher**: Search path, local corpus and load-balanced dispatch, retry,
//!   incomplete coverage on the last attempt, exhaustion, group release.
//! - **End-to-End**: `/search` handler over a 3x3 cluster.

#[cfg(test)]
mod tests {
    use crate::balancer::service::LoadBalancer;
    use crate::clock::TokioClock;
    use crate::cluster::service::SearchCluster;
    use crate::cluster::types::Node;
    use crate::config::{DispatchConfig, LoadBalancingPolicy};
    use crate::dispatch::dispatcher::Dispatcher;
    use crate::dispatch::search_path::{SearchPath, Selection};
    use crate::error::{DispatchError, PathSide, SearchPathError};
    use crate::invoker::factory::InvokerFactory;
    use crate::invoker::types::InvokerKind;
    use crate::search::handlers::{SearchParams, handle_search};
    use crate::search::types::{Query, ResultError};
    use crate::test_utils::{ManualClock, MockPool, ScriptedRandom, answer, cluster, report_docs};
    use axum::http::StatusCode;
    use axum::{Extension, Json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn parse(path: &str) -> SearchPath {
        SearchPath::parse(path).unwrap().unwrap()
    }

    fn keys(nodes: &[Arc<Node>]) -> Vec<u32> {
        nodes.iter().map(|n| n.key()).collect()
    }

    /// Pool where every node of the cluster answers one hit after `delay`.
    fn answering_pool(cluster: &SearchCluster, delay: Duration) -> MockPool {
        (0..cluster.node_count() as u32).fold(MockPool::new(), |pool, key| {
            pool.answering(key, delay, answer(key, 1000, &[(u64::from(key), 1.0)]))
        })
    }

    fn round_robin_dispatcher(cluster: &Arc<SearchCluster>, pool: MockPool) -> Dispatcher {
        let clock = Arc::new(TokioClock);
        let balancer = Arc::new(LoadBalancer::with_sources(
            cluster.groups(),
            LoadBalancingPolicy::RoundRobin,
            Box::new(ScriptedRandom::new()),
            clock.clone(),
        ));
        let factory = InvokerFactory::new(cluster.clone(), Arc::new(pool), clock.clone());
        Dispatcher::with_parts(
            cluster.clone(),
            balancer,
            factory,
            Box::new(ScriptedRandom::new()),
            clock,
        )
    }

    fn query() -> Query {
        Query::new("q", Instant::now() + ms(500))
    }

    // ============================================================
    // SEARCH PATH PARSING TESTS
    // ============================================================

    #[test]
    fn test_empty_path_is_absent() {
        assert_eq!(SearchPath::parse(""), Ok(None));
        assert_eq!(SearchPath::parse("   "), Ok(None));
    }

    #[test]
    fn test_canonical_form() {
        assert_eq!(parse("*/2").to_string(), "/2");
        assert_eq!(parse("[0,1>,1/2").to_string(), "0,1/2");
        assert_eq!(parse("0/").to_string(), "0");
        assert_eq!(parse("[1,3>,5/[0,2>").to_string(), "[1,3>,5/[0,2>");
        assert_eq!(parse("*").to_string(), "");
    }

    #[test]
    fn test_parsed_selections() {
        let path = parse("[1,3>,5/7");

        assert_eq!(path.nodes(), &[Selection::range(1, 3), Selection::single(5)]);
        assert_eq!(path.groups(), &[Selection::single(7)]);

        let wildcard = parse("*/*");
        assert!(wildcard.nodes().is_empty());
        assert!(wildcard.groups().is_empty());
    }

    #[test]
    fn test_invalid_paths() {
        assert_eq!(
            SearchPath::parse("1/2/3"),
            Err(SearchPathError::TooManySlashes("1/2/3".to_string()))
        );
        assert_eq!(
            SearchPath::parse("[3,1>"),
            Err(SearchPathError::InvalidRange {
                side: PathSide::Nodes,
                lo: 3,
                hi: 1
            })
        );
        assert_eq!(
            SearchPath::parse("/[2,2>"),
            Err(SearchPathError::InvalidRange {
                side: PathSide::Groups,
                lo: 2,
                hi: 2
            })
        );
        assert_eq!(
            SearchPath::parse("p/0"),
            Err(SearchPathError::InvalidSelection {
                side: PathSide::Nodes,
                token: "p".to_string()
            })
        );
        assert_eq!(
            SearchPath::parse("1,2,3/r"),
            Err(SearchPathError::InvalidSelection {
                side: PathSide::Groups,
                token: "r".to_string()
            })
        );
        assert!(matches!(
            SearchPath::parse("[1,x>/0"),
            Err(SearchPathError::InvalidSelection { side: PathSide::Nodes, .. })
        ));
    }

    #[test]
    fn test_empty_items_are_not_wildcards() {
        let empty = |side| -> Result<Option<SearchPath>, SearchPathError> {
            Err(SearchPathError::InvalidSelection {
                side,
                token: String::new(),
            })
        };

        assert_eq!(SearchPath::parse("1,,2"), empty(PathSide::Nodes));
        assert_eq!(SearchPath::parse(",5"), empty(PathSide::Nodes));
        assert_eq!(SearchPath::parse("0/,3"), empty(PathSide::Groups));

        // A lone star or an empty side still selects everything
        assert!(parse("*,1/3").nodes().is_empty());
        assert_eq!(parse("/3").groups(), &[Selection::single(3)]);
    }

    #[test]
    fn test_largest_ids_keep_round_trip() {
        assert_eq!(
            SearchPath::parse("4294967295/0"),
            Err(SearchPathError::InvalidSelection {
                side: PathSide::Nodes,
                token: "4294967295".to_string()
            })
        );

        let path = parse("4294967294/[0,4294967295>");
        let reparsed = parse(&path.to_string());

        assert_eq!(path.to_string(), "4294967294/[0,4294967295>");
        assert_eq!(reparsed, path);
    }

    // ============================================================
    // SEARCH PATH EVALUATION TESTS
    // ============================================================

    #[test]
    fn test_select_nodes_in_group() {
        let cluster = cluster(3, 3, DispatchConfig::new());

        let nodes = parse("1,2/1")
            .select_nodes(&cluster, &mut ScriptedRandom::new())
            .unwrap();

        assert_eq!(keys(&nodes), vec![4, 5]);
    }

    #[test]
    fn test_select_random_group_from_range() {
        let cluster = cluster(3, 3, DispatchConfig::new());
        let mut random = ScriptedRandom::new().with_indexes(&[2]);

        let nodes = parse("/[0,3>").select_nodes(&cluster, &mut random).unwrap();

        assert_eq!(keys(&nodes), vec![6, 7, 8]);
    }

    #[test]
    fn test_select_missing_group() {
        let cluster = cluster(3, 3, DispatchConfig::new());

        let err = parse("0/5")
            .select_nodes(&cluster, &mut ScriptedRandom::new())
            .unwrap_err();

        assert_eq!(err, SearchPathError::NoSuchGroup { needed: 6 });
        assert_eq!(
            err.to_string(),
            "Invalid search path: cluster does not have 6 groups"
        );
    }

    #[test]
    fn test_select_without_groups_uses_first_covered_group() {
        // ARRANGE
        let cluster = cluster(3, 3, DispatchConfig::new());
        cluster.groups()[0].set_has_sufficient_coverage(false);

        // ACT: out of range and duplicate node indexes are ignored
        let nodes = parse("0,7,0,[0,2>")
            .select_nodes(&cluster, &mut ScriptedRandom::new())
            .unwrap();

        // ASSERT
        assert_eq!(keys(&nodes), vec![3, 4]);
    }

    #[test]
    fn test_select_without_working_groups() {
        let cluster = cluster(2, 1, DispatchConfig::new());
        for group in cluster.groups() {
            group.set_has_sufficient_coverage(false);
        }

        let err = parse("0")
            .select_nodes(&cluster, &mut ScriptedRandom::new())
            .unwrap_err();

        assert_eq!(err, SearchPathError::NoWorkingGroups);
    }

    // ============================================================
    // DISPATCHER TESTS
    // ============================================================

    #[test]
    fn test_dispatch_pins_chosen_group_and_releases_it() {
        // ARRANGE
        let cluster = cluster(3, 3, DispatchConfig::new());
        report_docs(&cluster, 1000);
        let pool = answering_pool(&cluster, ms(1));
        let dispatcher = round_robin_dispatcher(&cluster, pool);
        let mut query = query();

        // ACT
        let invoker = dispatcher.get_search_invoker(&mut query).unwrap();

        // ASSERT
        assert_eq!(query.search_path.as_deref(), Some("/0"));
        assert_eq!(invoker.distribution_keys(), vec![0, 1, 2]);
        let status = dispatcher.load_balancer().group_status(0).unwrap();
        assert_eq!(status.allocations(), 1);

        drop(invoker);
        assert_eq!(status.allocations(), 0);
    }

    #[test]
    fn test_dispatch_retries_next_group() {
        // ARRANGE
        let cluster = cluster(3, 3, DispatchConfig::new());
        report_docs(&cluster, 1000);
        let pool = answering_pool(&cluster, ms(1)).unreachable(1);
        let dispatcher = round_robin_dispatcher(&cluster, pool);
        let mut query = query();

        // ACT
        let invoker = dispatcher.get_search_invoker(&mut query).unwrap();

        // ASSERT
        assert_eq!(query.search_path.as_deref(), Some("/1"));
        assert_eq!(invoker.distribution_keys(), vec![3, 4, 5]);
        let balancer = dispatcher.load_balancer();
        assert_eq!(balancer.group_status(0).unwrap().allocations(), 0);
        assert_eq!(balancer.group_status(1).unwrap().allocations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_attempt_accepts_incomplete_coverage() {
        // ARRANGE
        let cluster = cluster(2, 2, DispatchConfig::new());
        report_docs(&cluster, 1000);
        let pool = answering_pool(&cluster, ms(1)).unreachable(1).unreachable(3);
        let dispatcher = round_robin_dispatcher(&cluster, pool);
        let mut query = query();

        // ACT
        let mut invoker = dispatcher.get_search_invoker(&mut query).unwrap();
        let result = invoker.search(&query).await;

        // ASSERT
        assert_eq!(query.search_path.as_deref(), Some("/1"));
        assert_eq!(invoker.distribution_keys(), vec![2]);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(
            result.errors,
            vec![ResultError::BackendCommunication(
                "Connection failure on nodes with distribution-keys: 3".to_string()
            )]
        );
    }

    #[test]
    fn test_dispatch_exhausts_groups() {
        // ARRANGE: no documents reported, so empty node sets still count as covered
        let cluster = cluster(2, 1, DispatchConfig::new());
        let pool = MockPool::new().unreachable(0).unreachable(1);
        let dispatcher = round_robin_dispatcher(&cluster, pool);

        // ACT
        let err = dispatcher.get_search_invoker(&mut query()).unwrap_err();

        // ASSERT
        assert!(matches!(&err, DispatchError::NoSuitableGroups { rejected } if rejected == &vec![0, 1]));
        assert_eq!(
            err.to_string(),
            "No suitable groups to dispatch query. Rejected: [0, 1]"
        );
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let balancer = dispatcher.load_balancer();
        assert_eq!(balancer.group_status(0).unwrap().allocations(), 0);
        assert_eq!(balancer.group_status(1).unwrap().allocations(), 0);
    }

    #[test]
    fn test_attempts_limited_by_covered_groups() {
        // ARRANGE: only group 2 is covered, so two attempts are made, covered group first
        let cluster = cluster(4, 1, DispatchConfig::new());
        for id in [0, 1, 3] {
            cluster.groups()[id].set_has_sufficient_coverage(false);
        }
        let pool = MockPool::new()
            .unreachable(0)
            .unreachable(1)
            .unreachable(2)
            .unreachable(3);
        let dispatcher = round_robin_dispatcher(&cluster, pool);

        // ACT
        let err = dispatcher.get_search_invoker(&mut query()).unwrap_err();

        // ASSERT
        assert!(matches!(err, DispatchError::NoSuitableGroups { rejected } if rejected == vec![2, 3]));
    }

    #[test]
    fn test_search_path_bypasses_load_balancer() {
        let cluster = cluster(3, 3, DispatchConfig::new());
        let pool = answering_pool(&cluster, ms(1));
        let dispatcher = round_robin_dispatcher(&cluster, pool);
        let mut query = query().with_search_path("0/2");

        let invoker = dispatcher.get_search_invoker(&mut query).unwrap();

        assert!(matches!(invoker.kind(), InvokerKind::Node(_)));
        assert_eq!(invoker.distribution_keys(), vec![6]);
        assert_eq!(query.search_path.as_deref(), Some("0/2"));
        assert_eq!(dispatcher.load_balancer().group_status(2).unwrap().allocations(), 0);
    }

    #[test]
    fn test_search_path_errors_surface() {
        let cluster = cluster(3, 3, DispatchConfig::new());
        let dispatcher = round_robin_dispatcher(&cluster, MockPool::new());
        let mut query = query().with_search_path("1/2/3");

        let err = dispatcher.get_search_invoker(&mut query).unwrap_err();

        assert!(matches!(
            err,
            DispatchError::InvalidSearchPath(SearchPathError::TooManySlashes(_))
        ));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_search_path_selecting_nothing_falls_through() {
        let cluster = cluster(3, 3, DispatchConfig::new());
        let pool = answering_pool(&cluster, ms(1));
        let dispatcher = round_robin_dispatcher(&cluster, pool);
        let mut query = query().with_search_path("7/1");

        let invoker = dispatcher.get_search_invoker(&mut query).unwrap();

        assert_eq!(query.search_path.as_deref(), Some("/0"));
        assert_eq!(invoker.distribution_keys(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_search_path_to_unreachable_node() {
        let cluster = cluster(3, 3, DispatchConfig::new());
        report_docs(&cluster, 1000);
        let dispatcher = round_robin_dispatcher(&cluster, MockPool::new().unreachable(6));
        let mut query = query().with_search_path("0/2");

        let mut invoker = dispatcher.get_search_invoker(&mut query).unwrap();
        let result = invoker.search(&query).await;

        assert!(matches!(invoker.kind(), InvokerKind::Error(_)));
        assert_eq!(
            result.errors,
            vec![ResultError::BackendCommunication(
                "Connection failure on nodes with distribution-keys: 6".to_string()
            )]
        );
    }

    #[test]
    fn test_local_corpus_dispatch() {
        // ARRANGE
        let nodes = vec![
            Node::new("dispatcher-host", 19100, 0, 0),
            Node::new("other-host", 19100, 1, 1),
        ];
        let cluster = Arc::new(SearchCluster::new(DispatchConfig::new(), nodes, "dispatcher-host").unwrap());
        let pool = answering_pool(&cluster, ms(1));
        let dispatcher = round_robin_dispatcher(&cluster, pool);
        let mut query = query();

        // ACT
        let invoker = dispatcher.get_search_invoker(&mut query).unwrap();

        // ASSERT
        assert!(matches!(invoker.kind(), InvokerKind::Node(_)));
        assert_eq!(invoker.distribution_keys(), vec![0]);
        assert_eq!(query.search_path, None);
        assert_eq!(dispatcher.load_balancer().group_status(0).unwrap().allocations(), 0);
    }

    #[test]
    fn test_local_corpus_unreachable() {
        let nodes = vec![
            Node::new("dispatcher-host", 19100, 0, 0),
            Node::new("other-host", 19100, 1, 1),
        ];
        let cluster = Arc::new(SearchCluster::new(DispatchConfig::new(), nodes, "dispatcher-host").unwrap());
        let dispatcher = round_robin_dispatcher(&cluster, MockPool::new().unreachable(0));

        let err = dispatcher.get_search_invoker(&mut query()).unwrap_err();

        assert!(matches!(err, DispatchError::DirectDispatch { key: 0, .. }));
        assert_eq!(
            err.to_string(),
            "Could not dispatch directly to dispatcher-host (distribution key 0)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_search_feeds_latency() {
        let cluster = cluster(1, 2, DispatchConfig::new());
        let pool = answering_pool(&cluster, ms(20));
        let dispatcher = round_robin_dispatcher(&cluster, pool);
        let mut query = query();

        let mut invoker = dispatcher.get_search_invoker(&mut query).unwrap();
        invoker.search(&query).await;
        invoker.close();

        let status = dispatcher.load_balancer().group_status(0).unwrap();
        assert_eq!(status.allocations(), 0);
        assert!(status.average_search_time() >= 0.020);
    }

    // ============================================================
    // END-TO-END TESTS
    // ============================================================

    fn params(q: &str) -> SearchParams {
        SearchParams {
            q: q.to_string(),
            hits: Some(5),
            offset: None,
            timeout_ms: Some(500),
            searchpath: None,
            topk_probability: None,
        }
    }

    fn e2e_cluster() -> Arc<SearchCluster> {
        let config = DispatchConfig::new().with_policy(LoadBalancingPolicy::RoundRobin);
        let cluster = cluster(3, 3, config);
        report_docs(&cluster, 1000);
        cluster
    }

    /// Node `k` answers `k` and `k - 0.5` after `5 + k` ms.
    fn e2e_pool() -> MockPool {
        (0..9u32).fold(MockPool::new(), |pool, key| {
            let base = u64::from(key) * 10;
            let relevance = f64::from(key);
            pool.answering(
                key,
                ms(5 + u64::from(key)),
                answer(key, 1000, &[(base, relevance), (base + 1, relevance - 0.5)]),
            )
        })
    }

    fn e2e_dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(e2e_cluster(), Arc::new(e2e_pool()), Arc::new(TokioClock)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_handler_end_to_end() {
        // ARRANGE
        let dispatcher = e2e_dispatcher();

        // ACT
        let Json(first) = handle_search(axum::extract::Query(params("q")), Extension(dispatcher.clone()))
            .await
            .unwrap();
        let Json(second) = handle_search(axum::extract::Query(params("q")), Extension(dispatcher.clone()))
            .await
            .unwrap();

        // ASSERT: group 0 holds keys 0..3
        assert_eq!(first.search_path.as_deref(), Some("/0"));
        assert_eq!(first.count, 5);
        let relevances: Vec<f64> = first.hits.iter().map(|h| h.relevance).collect();
        assert_eq!(relevances, vec![2.0, 1.5, 1.0, 0.5, 0.0]);
        assert_eq!(first.hits[0].distribution_key, 2);
        assert_eq!(first.hits[0].gid, "000000000000000000000014");
        assert_eq!(first.coverage.docs, 3000);
        assert_eq!(first.coverage.nodes, 3);
        assert!(first.coverage.full);
        assert_eq!(first.coverage.result_percentage, 100);
        assert!(first.errors.is_empty());

        assert_eq!(second.search_path.as_deref(), Some("/1"));
        assert_eq!(second.hits[0].distribution_key, 5);

        for id in 0..3 {
            let status = dispatcher.load_balancer().group_status(id).unwrap();
            assert_eq!(status.allocations(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_handler_with_search_path_and_offset() {
        let dispatcher = e2e_dispatcher();
        let params = SearchParams {
            offset: Some(1),
            hits: Some(2),
            searchpath: Some("[0,2>/2".to_string()),
            ..params("q")
        };

        let Json(response) = handle_search(axum::extract::Query(params), Extension(dispatcher))
            .await
            .unwrap();

        assert_eq!(response.search_path.as_deref(), Some("[0,2>/2"));
        let relevances: Vec<f64> = response.hits.iter().map(|h| h.relevance).collect();
        assert_eq!(relevances, vec![6.5, 6.0]);
        assert_eq!(response.coverage.nodes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_handler_takes_deadline_from_dispatcher_clock() {
        // ARRANGE: the dispatcher's clock runs ten seconds ahead of tokio's
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        let pool = Arc::new(e2e_pool());
        let dispatcher = Arc::new(Dispatcher::new(e2e_cluster(), pool.clone(), clock));

        // ACT
        let Json(response) = handle_search(axum::extract::Query(params("q")), Extension(dispatcher))
            .await
            .unwrap();

        // ASSERT: the full 500 ms budget reached the nodes
        assert_eq!(response.count, 5);
        assert!(response.errors.is_empty());
        let requests = pool.connection_for(0).requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].timeout_ms, 500);
    }

    #[tokio::test]
    async fn test_search_handler_rejects_bad_search_path() {
        let dispatcher = e2e_dispatcher();
        let params = SearchParams {
            searchpath: Some("1/2/3".to_string()),
            ..params("q")
        };

        let (status, Json(error)) = handle_search(axum::extract::Query(params), Extension(dispatcher))
            .await
            .unwrap_err();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, "INVALID_SEARCH_PATH");
        assert!(error.message.contains("1/2/3"));
    }
}
