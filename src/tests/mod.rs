use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;

use crate::basecase::{BaseCase, BaseCaseOracle, BaseMode, DEFAULT_FAIL_CASE};
use crate::dispatcher::{
    DispatchSettings, Dispatcher, ExtToCheck, ProbeTarget, RunCounters,
};
use crate::output::ResultKind;
use crate::runner::{Options, Runner, WordlistSource};
use crate::transport::{ProbeMethod, ProbeResponse, Transport, TransportError};
use crate::worker::{classify, Verdict};

fn response(status: u16, body: &str) -> ProbeResponse {
    ProbeResponse {
        status,
        content_type: Some("text/html".to_string()),
        header_block: format!("HTTP/1.1 {status}\r\nContent-Type: text/html\r\n\r\n"),
        body: body.to_string(),
    }
}

/// Scripted transport: responses keyed by URL, served in order with the last
/// one repeating. Unknown URLs get the fallback.
struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<ProbeResponse>>>,
    head_routes: Mutex<HashMap<String, ProbeResponse>>,
    fallback: ProbeResponse,
    hits: Mutex<Vec<(ProbeMethod, String)>>,
}

impl MockTransport {
    fn new(fallback: ProbeResponse) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            head_routes: Mutex::new(HashMap::new()),
            fallback,
            hits: Mutex::new(Vec::new()),
        }
    }

    fn route(self, url: &str, responses: Vec<ProbeResponse>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    fn route_head(self, url: &str, head: ProbeResponse) -> Self {
        self.head_routes
            .lock()
            .unwrap()
            .insert(url.to_string(), head);
        self
    }

    fn hit_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }

    fn hits_for(&self, url: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, hit)| hit == url)
            .count()
    }
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        method: ProbeMethod,
        url: &'a str,
    ) -> BoxFuture<'a, Result<ProbeResponse, TransportError>> {
        Box::pin(async move {
            self.hits.lock().unwrap().push((method, url.to_string()));

            if method == ProbeMethod::Head {
                if let Some(head) = self.head_routes.lock().unwrap().get(url) {
                    let mut head = head.clone();
                    head.body.clear();
                    return Ok(head);
                }
            }

            let mut routes = self.routes.lock().unwrap();
            let mut resp = match routes.get_mut(url) {
                Some(seq) if seq.len() > 1 => seq.pop_front().unwrap_or_default(),
                Some(seq) => seq.front().cloned().unwrap_or_default(),
                None => self.fallback.clone(),
            };
            if method == ProbeMethod::Head {
                resp.body.clear();
            }
            Ok(resp)
        })
    }
}

fn oracle(transport: Arc<MockTransport>, patterns: &[&str]) -> BaseCaseOracle {
    let regexes: Vec<Regex> = patterns.iter().map(|p| Regex::new(p).unwrap()).collect();
    BaseCaseOracle::new(
        transport,
        Arc::new(RunCounters::default()),
        "http://t".to_string(),
        DEFAULT_FAIL_CASE.to_string(),
        regexes,
    )
}

fn settings(start: &str, case_insensitive: bool) -> DispatchSettings {
    DispatchSettings {
        first_part: "http://t".to_string(),
        start_point: start.to_string(),
        extensions: vec![ExtToCheck::new("php", true)],
        do_dirs: true,
        do_files: false,
        recursive: true,
        case_insensitive,
        only_under_start_point: true,
        worker_count: 4,
        exts_to_skip: Vec::new(),
    }
}

fn status_only_base() -> Arc<BaseCase> {
    Arc::new(BaseCase {
        probe_url: "http://t/x/".to_string(),
        fail_status: 404,
        is_dir: true,
        ext: String::new(),
        mode: BaseMode::StatusOnly,
    })
}

fn probe(path: &str) -> ProbeTarget {
    ProbeTarget {
        url: format!("http://t{path}"),
        path: path.to_string(),
        method: ProbeMethod::Get,
        is_dir: true,
        item: String::new(),
        base: status_only_base(),
    }
}

// A stable soft-404 page becomes an exact-body base case and misses compare
// equal against it.
#[tokio::test]
async fn stable_miss_page_adopts_exact_body_mode() {
    let transport = Arc::new(MockTransport::new(response(200, "Sorry, Not Found")));
    let oracle = oracle(transport.clone(), &[]);

    let base = oracle.for_dirs("/").await.unwrap();
    assert!(base.content_analysis());
    assert!(!base.low_confidence());
    // three samples are taken for a 200 miss
    assert_eq!(
        transport.hits_for(&format!("http://t/{DEFAULT_FAIL_CASE}/")),
        3
    );

    assert_eq!(
        classify(&base, 200, "Sorry, Not Found", "admin"),
        Verdict::NotFound
    );
    assert!(classify(&base, 200, "<html>Index of /backup</html>", "backup").is_found());
}

// An unstable miss page falls back to the first registry pattern matching
// all three samples (counter-embedding 404 pages).
#[tokio::test]
async fn unstable_miss_page_falls_back_to_regex() {
    let url = format!("http://t/{DEFAULT_FAIL_CASE}");
    let transport = Arc::new(MockTransport::new(response(404, "gone")).route(
        &url,
        vec![
            response(200, "id=1001"),
            response(200, "id=1002"),
            response(200, "id=1003"),
        ],
    ));
    let oracle = oracle(transport, &[r"^id=\d+$"]);

    let base = oracle.for_files("/", "").await.unwrap();
    assert!(base.use_regex());

    assert_eq!(classify(&base, 200, "id=9999", "x"), Verdict::NotFound);
    assert_eq!(
        classify(&base, 200, "<html>Secret</html>", "x"),
        Verdict::Found {
            low_confidence: false
        }
    );
}

#[tokio::test]
async fn unstable_miss_page_without_pattern_degrades_to_heuristic() {
    let url = format!("http://t/{DEFAULT_FAIL_CASE}");
    let transport = Arc::new(MockTransport::new(response(404, "gone")).route(
        &url,
        vec![
            response(200, "id=1001"),
            response(200, "id=1002"),
            response(200, "id=1003"),
        ],
    ));
    let oracle = oracle(transport, &[]);

    let base = oracle.for_files("/", "").await.unwrap();
    assert!(base.low_confidence());
    assert_eq!(
        classify(&base, 200, "something else", "x"),
        Verdict::Found {
            low_confidence: true
        }
    );
}

// Concurrent requests for the same scope produce exactly one derivation.
#[tokio::test]
async fn base_case_derivation_is_single_flight() {
    let transport = Arc::new(MockTransport::new(response(404, "no")));
    let oracle = Arc::new(oracle(transport.clone(), &[]));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let oracle = oracle.clone();
        tasks.push(tokio::spawn(
            async move { oracle.for_dirs("/app/").await },
        ));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(
        transport.hits_for(&format!("http://t/app/{DEFAULT_FAIL_CASE}/")),
        1
    );
}

#[test]
fn classification_is_deterministic() {
    let base = BaseCase {
        probe_url: "http://t/x/".to_string(),
        fail_status: 200,
        is_dir: true,
        ext: String::new(),
        mode: BaseMode::Content {
            body: "miss".to_string(),
        },
    };
    let first = classify(&base, 200, "hit page", "admin");
    for _ in 0..10 {
        assert_eq!(classify(&base, 200, "hit page", "admin"), first);
    }
}

// A directory is only ever enqueued once, no matter how many probes
// rediscover it.
#[tokio::test]
async fn rediscovered_directory_is_not_requeued() {
    let counters = Arc::new(RunCounters::default());
    let (dispatcher, _parse, _live) = Dispatcher::new(settings("/", false), counters).await;

    dispatcher.found_dir("/admin/", 200, false).await;
    dispatcher.found_dir("/admin/", 403, false).await;

    // seed entry plus one for /admin/
    assert_eq!(dispatcher.dir_queue.len().await, 2);
    assert_eq!(dispatcher.counters.dirs_found(), 1);
    // both sightings are still reported
    assert_eq!(dispatcher.results_len().await, 2);
}

#[tokio::test]
async fn case_insensitive_dedup_folds_variants() {
    let counters = Arc::new(RunCounters::default());
    let (dispatcher, _parse, _live) = Dispatcher::new(settings("/", true), counters).await;

    dispatcher.found_dir("/Admin/", 200, false).await;
    dispatcher.found_dir("/admin/", 200, false).await;

    assert_eq!(dispatcher.dir_queue.len().await, 2);
    assert_eq!(dispatcher.counters.dirs_found(), 1);
}

// A found directory outside the start point is reported but never expanded,
// and the progress estimate does not grow.
#[tokio::test]
async fn directory_outside_start_point_is_not_expanded() {
    let counters = Arc::new(RunCounters::default());
    let (dispatcher, _parse, _live) =
        Dispatcher::new(settings("/app/", false), counters).await;

    dispatcher.found_dir("/private/", 200, false).await;

    assert_eq!(dispatcher.dir_queue.len().await, 1);
    assert_eq!(dispatcher.counters.dirs_found(), 0);
    assert_eq!(dispatcher.results_len().await, 1);
}

// Skipping a subtree purges its queued probes and corrects the total.
#[tokio::test]
async fn skip_subtree_purges_queued_probes() {
    let counters = Arc::new(RunCounters::default());
    let (dispatcher, _parse, _live) = Dispatcher::new(settings("/", false), counters).await;

    for i in 0..7 {
        dispatcher.probe_queue.push(probe(&format!("/old/x{i}/"))).await;
    }
    for i in 0..3 {
        dispatcher.probe_queue.push(probe(&format!("/api/y{i}/"))).await;
    }

    let purged = dispatcher.skip_subtree("/old/").await;
    assert_eq!(purged, 7);
    assert_eq!(dispatcher.counters.work_correction(), 7);
    assert_eq!(dispatcher.probe_queue.len().await, 3);
    let survivor = dispatcher.probe_queue.take().await;
    assert!(survivor.path.starts_with("/api/"));
}

#[tokio::test]
async fn parse_feed_respects_skip_extensions() {
    let counters = Arc::new(RunCounters::default());
    let mut cfg = settings("/", false);
    cfg.exts_to_skip = vec!["jpg".to_string(), "css".to_string()];
    let (dispatcher, _parse, _live) = Dispatcher::new(cfg, counters).await;

    assert!(dispatcher.should_skip_link("/img/logo.JPG"));
    assert!(dispatcher.should_skip_link("/style/main.css"));
    assert!(!dispatcher.should_skip_link("/js/app.php"));
    assert!(!dispatcher.should_skip_link("/noext"));
}

// Findings mark their path in the processed-link registry so a
// link-extraction consumer never feeds the same link back twice.
#[tokio::test]
async fn processed_link_registry_deduplicates_crawl_feedback() {
    let counters = Arc::new(RunCounters::default());
    let (dispatcher, _parse, _live) = Dispatcher::new(settings("/", true), counters).await;

    assert!(!dispatcher.link_already_processed("/admin/").await);
    dispatcher.found_dir("/admin/", 200, false).await;
    assert!(dispatcher.link_already_processed("/admin/").await);
    // registry follows the scan's case rule
    assert!(dispatcher.link_already_processed("/ADMIN/").await);

    assert!(dispatcher.mark_link_processed("/login.php").await);
    assert!(!dispatcher.mark_link_processed("/login.php").await);
    assert!(dispatcher.link_already_processed("/login.php").await);
}

fn scan_options(words: &[&str]) -> Options {
    Options {
        target: "http://t/".to_string(),
        wordlist: Some(WordlistSource::Inline(
            words.iter().map(|w| w.to_string()).collect(),
        )),
        workers: 4,
        ..Options::default()
    }
}

// Full pipeline against a scripted server that answers misses with a plain
// 404: discovery, recursion, HEAD escalation and counter consistency.
#[tokio::test]
async fn scan_discovers_and_recurses_with_consistent_counters() {
    let transport = Arc::new(
        MockTransport::new(response(404, "not here"))
            .route("http://t:80/admin/", vec![response(200, "<html>admin</html>")])
            .route(
                "http://t:80/backup/",
                vec![response(200, "<html>backup</html>")],
            ),
    );

    let runner = Runner::new(scan_options(&["admin", "backup", "missing"])).unwrap();
    let mut scan = runner
        .start_with_transport(transport.clone())
        .await
        .unwrap();
    let mut parse_rx = scan.parse_queue.take().unwrap();
    let report = scan.wait().await;

    let mut dirs: Vec<String> = report
        .results
        .iter()
        .filter(|r| r.kind == ResultKind::Directory)
        .map(|r| r.path.clone())
        .collect();
    dirs.sort();
    assert_eq!(dirs, vec!["/admin/", "/backup/"]);
    assert!(report
        .results
        .iter()
        .all(|r| r.kind != ResultKind::Error));

    // 3 scopes derive a base case (1 fetch each, all 404) and 10 probes run:
    // the start dir itself plus 3 candidates under each of /, /admin/, /backup/
    assert_eq!(report.counters.base_cases, 3);
    assert_eq!(report.counters.total_done, 13);
    assert_eq!(report.counters.dirs_found, 2);
    assert_eq!(report.counters.work_correction, 0);

    // both found bodies were offered to the link-extraction queue
    let mut fed = Vec::new();
    while let Ok(entry) = parse_rx.try_recv() {
        fed.push(entry.source_path);
    }
    fed.sort();
    assert_eq!(fed, vec!["/admin/", "/backup/"]);
    assert_eq!(report.counters.parsed_links, 2);
}

// A HEAD/GET status disagreement is surfaced as an error without dropping
// the finding.
#[tokio::test]
async fn head_get_disagreement_reports_error_and_finding() {
    let transport = Arc::new(
        MockTransport::new(response(404, "not here"))
            .route_head("http://t:80/admin/", response(200, ""))
            .route("http://t:80/admin/", vec![response(500, "boom")]),
    );

    let mut options = scan_options(&["admin"]);
    options.recursive = false;
    let runner = Runner::new(options).unwrap();
    let report = runner
        .start_with_transport(transport)
        .await
        .unwrap()
        .wait()
        .await;

    let dir = report
        .results
        .iter()
        .find(|r| r.kind == ResultKind::Directory)
        .expect("finding should survive the disagreement");
    assert_eq!(dir.path, "/admin/");
    assert_eq!(dir.status, 200);

    let error = report
        .results
        .iter()
        .find(|r| r.kind == ResultKind::Error)
        .expect("disagreement should be reported");
    assert!(error.message.as_deref().unwrap().contains("HEAD returned 200"));
}

// Stopping mid-scan drains cooperatively and still yields a report.
#[tokio::test]
async fn stop_ends_scan_early() {
    let transport = Arc::new(MockTransport::new(response(404, "no")));
    let words: Vec<String> = (0..5000).map(|i| format!("w{i}")).collect();
    let word_refs: Vec<&str> = words.iter().map(String::as_str).collect();

    let runner = Runner::new(scan_options(&word_refs)).unwrap();
    let scan = runner.start_with_transport(transport).await.unwrap();
    let controls = scan.controls.clone();

    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        controls.stop();
    });

    let report = tokio::time::timeout(std::time::Duration::from_secs(10), scan.wait())
        .await
        .expect("stop must unwind the scan");
    assert!(report.counters.total_done < 5004);
}

// Pausing freezes the pipeline without losing work: no new probe starts
// while paused, in-flight probes finish, and resume drains the scan.
#[tokio::test]
async fn pause_halts_probing_until_resume() {
    let transport = Arc::new(MockTransport::new(response(404, "no")));
    let words: Vec<String> = (0..3000).map(|i| format!("w{i}")).collect();
    let word_refs: Vec<&str> = words.iter().map(String::as_str).collect();
    let mut options = scan_options(&word_refs);
    options.auto_switch_head = false;

    let runner = Runner::new(options).unwrap();
    let scan = runner
        .start_with_transport(transport.clone())
        .await
        .unwrap();
    let controls = scan.controls.clone();
    controls.pause();
    assert!(controls.is_paused());

    // any probe already taken completes, then the hit count stays frozen
    tokio::time::sleep(Duration::from_millis(150)).await;
    let frozen = transport.hit_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.hit_count(), frozen);
    assert!(frozen < 3002, "pause did not stop the pipeline");

    controls.resume();
    let report = tokio::time::timeout(Duration::from_secs(30), scan.wait())
        .await
        .expect("resume must let the scan drain");
    // one derivation fetch, the start dir self-probe and 3000 candidates
    assert_eq!(report.counters.total_done, 3002);
}

// Resizing the pool mid-scan: retired workers finish their in-flight probe
// and every queued probe is still processed exactly once.
#[tokio::test]
async fn pool_resize_mid_scan_loses_no_probes() {
    struct SlowTransport(MockTransport);
    impl Transport for SlowTransport {
        fn send<'a>(
            &'a self,
            method: ProbeMethod,
            url: &'a str,
        ) -> BoxFuture<'a, Result<ProbeResponse, TransportError>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.0.send(method, url).await
            })
        }
    }

    let transport = Arc::new(SlowTransport(MockTransport::new(response(404, "no"))));
    let words: Vec<String> = (0..120).map(|i| format!("w{i}")).collect();
    let word_refs: Vec<&str> = words.iter().map(String::as_str).collect();
    let mut options = scan_options(&word_refs);
    options.auto_switch_head = false;

    let runner = Runner::new(options).unwrap();
    let scan = runner.start_with_transport(transport).await.unwrap();
    let controls = scan.controls.clone();

    controls.add_workers(4).await;
    assert_eq!(controls.worker_count().await, 8);

    // shrink while probes are in flight against the slow transport
    tokio::time::sleep(Duration::from_millis(30)).await;
    controls.remove_workers(6).await;
    assert_eq!(controls.worker_count().await, 2);
    // a removal never empties the pool
    controls.remove_workers(100).await;
    assert_eq!(controls.worker_count().await, 1);

    let report = tokio::time::timeout(Duration::from_secs(30), scan.wait())
        .await
        .expect("scan must drain after resizing");
    // one derivation fetch, the start dir self-probe and 120 candidates:
    // nothing interrupted, nothing double counted
    assert_eq!(report.counters.total_done, 122);
    assert!(report.results.iter().all(|r| r.kind != ResultKind::Error));
}

// With a rate cap the pool's observed throughput stays near the cap instead
// of running the scripted transport flat out.
#[tokio::test]
async fn rate_limit_bounds_observed_throughput() {
    let transport = Arc::new(MockTransport::new(response(404, "no")));
    let words: Vec<String> = (0..100).map(|i| format!("w{i}")).collect();
    let word_refs: Vec<&str> = words.iter().map(String::as_str).collect();
    let mut options = scan_options(&word_refs);
    options.auto_switch_head = false;
    options.rate_limit = Some(200);

    let runner = Runner::new(options).unwrap();
    let started = std::time::Instant::now();
    let scan = runner.start_with_transport(transport).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(30), scan.wait())
        .await
        .expect("throttled scan must still drain");
    let elapsed = started.elapsed().as_secs_f64();

    assert_eq!(report.counters.total_done, 102);
    // an unthrottled run against this transport finishes in milliseconds
    assert!(
        elapsed > 0.25,
        "scan finished too fast to have throttled: {elapsed:.3}s"
    );
    let observed = report.counters.total_done as f64 / elapsed;
    assert!(
        observed <= 400.0,
        "observed {observed:.0} req/s exceeds twice the cap"
    );
}

#[tokio::test]
async fn transport_errors_become_error_results() {
    struct FailingTransport;
    impl Transport for FailingTransport {
        fn send<'a>(
            &'a self,
            _method: ProbeMethod,
            url: &'a str,
        ) -> BoxFuture<'a, Result<ProbeResponse, TransportError>> {
            Box::pin(async move {
                Err(TransportError::InvalidUrl {
                    url: url.to_string(),
                })
            })
        }
    }

    let mut options = scan_options(&["admin"]);
    options.recursive = false;
    options.auto_switch_head = false;
    let runner = Runner::new(options).unwrap();
    let report = runner
        .start_with_transport(Arc::new(FailingTransport))
        .await
        .unwrap()
        .wait()
        .await;

    // base-case derivation fails for the start scope, which is reported and
    // charged against the estimate
    assert!(report
        .results
        .iter()
        .any(|r| r.kind == ResultKind::Error));
    assert_eq!(report.counters.work_correction, 1);
}

#[tokio::test]
async fn reqwest_transport_reads_status_headers_and_body() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string("hi"),
        )
        .mount(&server)
        .await;

    let transport = crate::transport::ReqwestTransport::build(None, 5, false, &[]).unwrap();
    let url = format!("{}/hello", server.uri());
    let resp = transport.send(ProbeMethod::Get, &url).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "hi");
    assert!(resp.is_textual());
    assert!(resp.header_block.starts_with("HTTP/1.1 200"));
    assert!(resp.raw().contains("content-type"));
}
