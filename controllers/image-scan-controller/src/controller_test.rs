//! End-to-end passes against the mock DefectDojo client and fake cluster

use super::*;
use crate::config::{RunConfig, ScannerConfig};
use crate::test_utils::{pod, scan_type, FakeCluster, FakeRegistry, FakeScanner};
use defectdojo_client::{MockDefectDojoClient, SystemSettings};

const GRYPE: &str = "Anchore Grype";
const LANE: &str = "grype-lane";

fn config(workers: usize) -> Config {
    Config {
        run: RunConfig {
            workers,
            ..Default::default()
        },
        scanner: ScannerConfig::default(),
        ..Default::default()
    }
}

fn controller(client: &MockDefectDojoClient, cluster: FakeCluster, registry: FakeRegistry, scanner: &Arc<FakeScanner>) -> Controller {
    controller_with(client, cluster, registry, vec![scan_type(GRYPE, LANE, scanner)], config(4))
}

fn controller_with(
    client: &MockDefectDojoClient,
    cluster: FakeCluster,
    registry: FakeRegistry,
    scan_types: Vec<ScanType>,
    config: Config,
) -> Controller {
    let collector = InventoryCollector::new(Arc::new(cluster), Arc::new(registry));
    let selection = NamespaceSelection::Explicit(vec!["ns1".to_string()]);
    Controller::new(Arc::new(client.clone()), collector, selection, scan_types, config)
}

fn single_worker(client: &MockDefectDojoClient, cluster: FakeCluster, scanner: &Arc<FakeScanner>) -> Controller {
    controller_with(client, cluster, FakeRegistry::default(), vec![scan_type(GRYPE, LANE, scanner)], config(1))
}

fn two_images() -> FakeCluster {
    FakeCluster::new().with_pod(pod(
        "ns1",
        "p1",
        &[
            ("a", "registry.local/a:v1", Some("registry.local/a@sha256:01")),
            ("b", "registry.local/b:v1", Some("registry.local/b@sha256:02")),
        ],
    ))
}

fn replaced_image() -> FakeCluster {
    FakeCluster::new().with_pod(pod(
        "ns1",
        "p1",
        &[
            ("a", "registry.local/a:v1", Some("registry.local/a@sha256:01")),
            ("c", "registry.local/c:v1", Some("registry.local/c@sha256:03")),
        ],
    ))
}

#[tokio::test]
async fn test_first_pass_creates_everything_and_scans_each_image() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();

    let summary = controller(&client, two_images(), FakeRegistry::default(), &scanner)
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.product_types()[0].name, "ns1");
    assert_eq!(client.products()[0].name, "p1");
    let created = client.created_engagements();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, LANE);
    assert_eq!(created[0].tags, vec!["registry.local/a@sha256:01", "registry.local/b@sha256:02"]);
    assert_eq!(scanner.calls().len(), 2);
    assert_eq!(client.imports().len(), 2);
    assert_eq!(scanner.prepare_calls(), 1);

    assert_eq!(summary.pods_scanned, 1);
    assert_eq!(summary.images_scanned, 2);
    assert_eq!(summary.scanning_tools, 1);
    assert_eq!(summary.imports, 2);
}

#[tokio::test]
async fn test_unchanged_second_pass_does_nothing() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let shutdown = CancellationToken::new();

    controller(&client, two_images(), FakeRegistry::default(), &scanner)
        .run_once(&shutdown)
        .await
        .unwrap();
    let tests_after_first = client.tests().len();

    let summary = controller(&client, two_images(), FakeRegistry::default(), &scanner)
        .run_once(&shutdown)
        .await
        .unwrap();

    assert_eq!(scanner.calls().len(), 2, "no new scans");
    assert_eq!(client.created_engagements().len(), 1, "no new engagements");
    assert_eq!(client.tests().len(), tests_after_first, "no new tests");
    assert_eq!(client.product_types().len(), 1);
    assert_eq!(client.products().len(), 1);
    assert_eq!(summary.scans_run, 0);
}

#[tokio::test]
async fn test_replaced_image_rescans_only_new_digest() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let shutdown = CancellationToken::new();

    controller(&client, two_images(), FakeRegistry::default(), &scanner)
        .run_once(&shutdown)
        .await
        .unwrap();
    let first = client.engagements()[0].id;

    controller(&client, replaced_image(), FakeRegistry::default(), &scanner)
        .run_once(&shutdown)
        .await
        .unwrap();

    assert_eq!(client.deleted_engagements(), vec![first]);
    let engagements = client.engagements();
    assert_eq!(engagements.len(), 1);
    assert_eq!(engagements[0].tags, vec!["registry.local/a@sha256:01", "registry.local/c@sha256:03"]);
    assert_eq!(
        scanner.calls(),
        vec![
            "registry.local/a@sha256:01",
            "registry.local/b@sha256:02",
            "registry.local/c@sha256:03"
        ]
    );
}

#[tokio::test]
async fn test_unresolvable_digest_does_not_stop_the_pod() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let cluster = FakeCluster::new().with_pod(pod(
        "ns1",
        "p1",
        &[
            ("private", "private.example.com/app:v1", None),
            ("a", "registry.local/a:v1", Some("registry.local/a@sha256:01")),
        ],
    ));
    let registry = FakeRegistry::default().failing("private.example.com/app:v1");

    let summary = controller(&client, cluster, registry, &scanner)
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(scanner.calls(), vec!["registry.local/a@sha256:01"]);
    assert_eq!(
        client.created_engagements()[0].tags,
        vec!["private.example.com/app:v1", "registry.local/a@sha256:01"]
    );
    assert_eq!(summary.pods_scanned, 1);
}

#[tokio::test]
async fn test_pod_without_any_digest_opens_no_engagement() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let cluster = FakeCluster::new().with_pod(pod("ns1", "p1", &[("private", "private.example.com/app:v1", None)]));
    let registry = FakeRegistry::default().failing("private.example.com/app:v1");

    controller(&client, cluster, registry, &scanner)
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert!(client.created_engagements().is_empty());
    assert!(scanner.calls().is_empty());
}

#[tokio::test]
async fn test_delete_failure_aborts_the_pass() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let shutdown = CancellationToken::new();

    controller(&client, two_images(), FakeRegistry::default(), &scanner)
        .run_once(&shutdown)
        .await
        .unwrap();
    client.fail_engagement_deletes();

    let err = controller(&client, replaced_image(), FakeRegistry::default(), &scanner)
        .run_once(&shutdown)
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::EngagementDelete { .. }));
    assert_eq!(client.created_engagements().len(), 1, "no replacement engagement");
    assert_eq!(client.engagements().len(), 1, "old engagement kept");
    assert_eq!(scanner.calls().len(), 2);
}

#[tokio::test]
async fn test_fatal_error_stops_scheduling_new_pods() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let shutdown = CancellationToken::new();

    single_worker(&client, two_images(), &scanner).run_once(&shutdown).await.unwrap();
    client.fail_engagement_deletes();

    let cluster = replaced_image().with_pod(pod(
        "ns1",
        "p2",
        &[("d", "registry.local/d:v1", Some("registry.local/d@sha256:04"))],
    ));
    let err = single_worker(&client, cluster, &scanner).run_once(&shutdown).await.unwrap_err();

    assert!(matches!(err, ControllerError::EngagementDelete { .. }));
    assert!(!scanner.calls().contains(&"registry.local/d@sha256:04".to_string()));
    assert!(client.products().iter().all(|p| p.name != "p2"), "p2 was never started");
}

#[tokio::test]
async fn test_directory_failure_is_fatal() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    client.fail_product_type_queries();
    let scanner = FakeScanner::new();

    let err = controller(&client, two_images(), FakeRegistry::default(), &scanner)
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::Directory(_)));
    assert!(scanner.calls().is_empty());
}

#[tokio::test]
async fn test_product_failure_skips_only_that_pod() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    client.fail_product_create("p1");
    let scanner = FakeScanner::new();
    let cluster = two_images().with_pod(pod(
        "ns1",
        "p2",
        &[("d", "registry.local/d:v1", Some("registry.local/d@sha256:04"))],
    ));

    let summary = controller(&client, cluster, FakeRegistry::default(), &scanner)
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pods_scanned, 1);
    assert_eq!(scanner.calls(), vec!["registry.local/d@sha256:04"]);
}

#[tokio::test]
async fn test_lanes_are_reconciled_independently() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let grype = FakeScanner::new();
    let trivy = FakeScanner::new();
    let scan_types = vec![
        scan_type(GRYPE, LANE, &grype),
        scan_type("Trivy Scan", "trivy-lane", &trivy),
    ];

    let summary = controller_with(&client, two_images(), FakeRegistry::default(), scan_types, config(2))
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let lanes: Vec<String> = client.created_engagements().into_iter().map(|e| e.name).collect();
    assert_eq!(lanes, vec![LANE, "trivy-lane"]);
    assert_eq!(grype.calls().len(), 2);
    assert_eq!(trivy.calls().len(), 2);
    assert_eq!(summary.scanning_tools, 2);
    assert_eq!(summary.images_scanned, 2, "images are counted once per pod");
}

#[tokio::test]
async fn test_many_pods_on_a_small_pool() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let mut cluster = FakeCluster::new();
    for i in 0..12 {
        let image = format!("registry.local/app{}:v1", i);
        let id = format!("registry.local/app{}@sha256:{:02}", i, i);
        cluster = cluster.with_pod(pod("ns1", &format!("p{}", i), &[("app", image.as_str(), Some(id.as_str()))]));
    }

    let summary = controller_with(
        &client,
        cluster,
        FakeRegistry::default(),
        vec![scan_type(GRYPE, LANE, &scanner)],
        config(3),
    )
    .run_once(&CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(summary.pods_scanned, 12);
    assert_eq!(client.products().len(), 12);
    assert_eq!(client.imports().len(), 12);
}

#[tokio::test]
async fn test_cancelled_pass_reports_cancellation() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let err = controller(&client, two_images(), FakeRegistry::default(), &scanner)
        .run_once(&shutdown)
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::Cancelled));
    assert!(scanner.calls().is_empty());
}

#[tokio::test]
async fn test_system_settings_sync() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    client.set_system_settings(SystemSettings {
        id: 1,
        enable_deduplication: false,
        delete_duplicates: false,
        max_dupes: None,
    });
    let scanner = FakeScanner::new();
    let mut config = config(1);
    config.defect_dojo.sync_settings = true;
    config.defect_dojo.delete_duplicates = true;
    config.defect_dojo.max_duplicates = 5;

    controller_with(
        &client,
        two_images(),
        FakeRegistry::default(),
        vec![scan_type(GRYPE, LANE, &scanner)],
        config,
    )
    .run_once(&CancellationToken::new())
    .await
    .unwrap();

    let settings = client.system_settings().unwrap();
    assert!(settings.enable_deduplication);
    assert!(settings.delete_duplicates);
    assert_eq!(settings.max_dupes, Some(5));
}

#[tokio::test]
async fn test_system_settings_failure_is_not_fatal() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    client.fail_system_settings();
    let scanner = FakeScanner::new();
    let mut config = config(1);
    config.defect_dojo.sync_settings = true;

    let result = controller_with(
        &client,
        two_images(),
        FakeRegistry::default(),
        vec![scan_type(GRYPE, LANE, &scanner)],
        config,
    )
    .run_once(&CancellationToken::new())
    .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_clean_deletes_all_product_types() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    client.add_product_type("ns1");
    client.add_product_type("ns2");
    let scanner = FakeScanner::new();

    let deleted = controller(&client, FakeCluster::new(), FakeRegistry::default(), &scanner)
        .clean()
        .await
        .unwrap();

    assert_eq!(deleted, 2);
    assert!(client.product_types().is_empty());
}

#[tokio::test]
async fn test_periodic_stops_on_shutdown() {
    let client = MockDefectDojoClient::new("http://dojo.test");
    let scanner = FakeScanner::new();
    let shutdown = CancellationToken::new();
    let controller = controller(&client, two_images(), FakeRegistry::default(), &scanner);

    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();
    });
    tokio::time::timeout(
        Duration::from_secs(5),
        controller.run_periodic(Duration::from_secs(3600), shutdown),
    )
    .await
    .expect("periodic loop should stop once shutdown fires");
}
