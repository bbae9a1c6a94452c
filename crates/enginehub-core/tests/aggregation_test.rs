//! Tests for the aggregation layer: fan-out listings, per-engine failure
//! isolation, single-target operations and label batches.

use std::sync::Arc;
use std::time::Duration;

use enginehub_core::engine::wire::{
    CompatInfo, CompatVolume, DiskUsage, NativeImage, UsageData, VolumeUsageEntry,
};
use enginehub_core::engine::{CreateContainerOptions, CreatePodOptions, ManifestOptions};
use enginehub_core::{
    ConnectionGuard, ConnectionStatus, EngineError, EngineId, EngineKind, EngineRegistry,
    ListOptions, RegistryConfig,
};
use enginehub_test_utils::{
    FakeConnector, FakeEngine, RecordingTelemetry, compat_container, native_container, native_pod,
    registration,
};

// ===========================================================================
// Fixture
// ===========================================================================

struct Fleet {
    registry: EngineRegistry,
    connector: Arc<FakeConnector>,
    telemetry: Arc<RecordingTelemetry>,
    guards: Vec<ConnectionGuard>,
}

impl Fleet {
    fn new() -> Self {
        let connector = FakeConnector::new();
        let telemetry = RecordingTelemetry::new();
        let registry = EngineRegistry::builder(connector.clone())
            .config(RegistryConfig {
                status_poll_interval: Duration::from_secs(60),
                ..RegistryConfig::default()
            })
            .telemetry(telemetry.clone())
            .build();
        Self {
            registry,
            connector,
            telemetry,
            guards: Vec::new(),
        }
    }

    /// Register a started engine and return its fake.
    fn engine(&mut self, provider: &str, name: &str, kind: EngineKind) -> Arc<FakeEngine> {
        let address = format!("unix:///run/{provider}/{name}.sock");
        let engine = FakeEngine::new();
        self.connector.insert(&address, engine.clone());
        let (reg, _status) = registration(provider, name, &address, kind, ConnectionStatus::Started);
        self.guards.push(self.registry.register(reg));
        engine
    }
}

fn id(provider: &str, name: &str) -> EngineId {
    EngineId::new(provider, name)
}

// ===========================================================================
// Fan-out listings
// ===========================================================================

#[tokio::test]
async fn lists_containers_of_a_compat_engine() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);
    e1.add_container(compat_container("c1", "x", "running", &[]));
    e1.add_container(compat_container("c2", "y", "exited", &[]));

    let containers = fleet.registry.list_containers().await;
    assert_eq!(containers.len(), 2);
    assert!(containers.iter().all(|c| c.engine.engine_id == id("docker", "e1")));
    assert!(containers.iter().all(|c| c.engine.engine_kind == EngineKind::Compat));
    let names: Vec<_> = containers.iter().map(|c| c.names[0].as_str()).collect();
    assert_eq!(names, vec!["/x", "/y"]);
}

#[tokio::test]
async fn failing_engine_contributes_nothing_and_is_reported() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("podman", "e1", EngineKind::Native);
    e1.add_native_container(native_container("n1", "web", "running"));
    e1.fail("native.list_containers");
    let e2 = fleet.engine("docker", "e2", EngineKind::Compat);
    e2.add_container(compat_container("c1", "db", "running", &[]));

    let containers = fleet.registry.list_containers().await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].engine.engine_id, id("docker", "e2"));
    assert!(containers.iter().all(|c| c.engine.engine_id != id("podman", "e1")));

    let failures = fleet.telemetry.named("aggregate.engine-failure");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["engine_id"], "podman.e1");
    assert_eq!(failures[0]["operation"], "container.list");
    assert!(failures[0]["error"].as_str().unwrap().contains("native.list_containers"));
}

#[tokio::test]
async fn native_listing_is_preferred_and_enriched_with_pods() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("podman", "machine", EngineKind::Native);
    e1.add_native_container(native_container("a", "demo-a", "running"));
    e1.add_native_container(native_container("b", "loner", "running"));
    e1.add_container(compat_container("compat-only", "hidden", "running", &[]));
    e1.add_pod(native_pod("pod1", "demo", &["a"]));

    let containers = fleet.registry.list_containers().await;
    let ids: Vec<_> = containers.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(containers[0].names, vec!["/demo-a"]);

    let pod = containers[0].pod.as_ref().expect("member container carries its pod");
    assert_eq!(pod.id, "pod1");
    assert_eq!(pod.name, "demo");
    assert_eq!(pod.engine_id, id("podman", "machine"));
    assert!(containers[1].pod.is_none());
    assert_eq!(e1.count("list_containers"), 0);
}

#[tokio::test]
async fn pod_listing_failure_only_loses_enrichment() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("podman", "machine", EngineKind::Native);
    e1.add_native_container(native_container("a", "demo-a", "running"));
    e1.add_pod(native_pod("pod1", "demo", &["a"]));
    e1.fail("native.list_pods");

    let containers = fleet.registry.list_containers().await;
    assert_eq!(containers.len(), 1);
    assert!(containers[0].pod.is_none());
}

#[tokio::test]
async fn compat_only_option_bypasses_native_listing() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("podman", "machine", EngineKind::Native);
    e1.add_native_container(native_container("native", "n", "running"));
    e1.add_container(compat_container("compat", "c", "running", &[]));

    let options = ListOptions {
        all: true,
        compat_only: true,
        ..ListOptions::default()
    };
    let containers = fleet.registry.list_containers_with(&options).await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, "compat");
}

#[tokio::test]
async fn explicit_engine_must_be_connected() {
    let mut fleet = Fleet::new();
    fleet.engine("docker", "e1", EngineKind::Compat);

    let err = fleet
        .registry
        .list_containers_with(&ListOptions::for_engine(id("docker", "nope")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoRunningEngine { .. }));

    let only = fleet
        .registry
        .list_images(&ListOptions::for_engine(id("docker", "e1")))
        .await
        .unwrap();
    assert!(only.is_empty());
}

#[tokio::test]
async fn label_filter_applies_to_native_listing() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("podman", "machine", EngineKind::Native);
    let mut tagged = native_container("a", "a", "running");
    tagged.labels = Some([("project".to_string(), "demo".to_string())].into());
    e1.add_native_container(tagged);
    e1.add_native_container(native_container("b", "b", "running"));

    let mut options = ListOptions {
        all: true,
        ..ListOptions::default()
    };
    options.filters.insert("label".into(), vec!["project=demo".into()]);
    let containers = fleet.registry.list_containers_with(&options).await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, "a");
}

#[tokio::test]
async fn simple_listing_uses_compat_api() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("podman", "machine", EngineKind::Native);
    e1.add_container(compat_container("c1", "web", "running", &[]));

    let simple = fleet.registry.list_simple_containers().await;
    assert_eq!(simple.len(), 1);
    assert_eq!(simple[0].names, vec!["/web"]);
    assert_eq!(e1.count("native."), 0);
}

#[tokio::test]
async fn native_images_report_manifest_lists() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("podman", "machine", EngineKind::Native);
    e1.add_native_image(NativeImage {
        id: "m1".into(),
        is_manifest_list: Some(true),
        ..NativeImage::default()
    });

    let images = fleet.registry.list_images(&ListOptions::default()).await.unwrap();
    assert_eq!(images.len(), 1);
    assert!(images[0].is_manifest);
}

#[tokio::test]
async fn pods_come_only_from_native_engines() {
    let mut fleet = Fleet::new();
    let native = fleet.engine("podman", "machine", EngineKind::Native);
    native.add_pod(native_pod("pod1", "demo", &["a", "b"]));
    fleet.engine("docker", "e1", EngineKind::Compat);

    let pods = fleet.registry.list_pods(None).await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].containers.len(), 2);

    let err = fleet.registry.list_pods(Some(&id("docker", "e1"))).await.unwrap_err();
    assert!(matches!(err, EngineError::CapabilityMissing { capability: "pods", .. }));
}

#[tokio::test]
async fn volumes_with_usage() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);
    e1.add_volume(CompatVolume {
        name: "data".into(),
        driver: "local".into(),
        ..CompatVolume::default()
    });
    e1.add_volume(CompatVolume {
        name: "cache".into(),
        ..CompatVolume::default()
    });
    e1.set_disk_usage(DiskUsage {
        volumes: vec![VolumeUsageEntry {
            name: "data".into(),
            usage_data: Some(UsageData {
                size: 4096,
                ref_count: 2,
            }),
        }],
    });

    let volumes = fleet.registry.list_volumes(true).await;
    assert_eq!(volumes.len(), 2);
    let data = volumes.iter().find(|v| v.name == "data").unwrap();
    assert_eq!(data.usage.as_ref().unwrap().size, 4096);
    assert_eq!(data.usage.as_ref().unwrap().ref_count, 2);
    assert!(volumes.iter().find(|v| v.name == "cache").unwrap().usage.is_none());

    let plain = fleet.registry.list_volumes(false).await;
    assert!(plain.iter().all(|v| v.usage.is_none()));
    assert_eq!(e1.count("disk_usage"), 1);
}

#[tokio::test]
async fn volume_usage_failure_keeps_volumes() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);
    e1.add_volume(CompatVolume {
        name: "data".into(),
        ..CompatVolume::default()
    });
    e1.fail("disk_usage");

    let volumes = fleet.registry.list_volumes(true).await;
    assert_eq!(volumes.len(), 1);
    assert!(volumes[0].usage.is_none());
}

#[tokio::test]
async fn info_propagates_and_list_infos_isolates() {
    let mut fleet = Fleet::new();
    let good = fleet.engine("docker", "good", EngineKind::Compat);
    good.set_info(CompatInfo {
        server_version: "27.0.1".into(),
        ncpu: 8,
        ..CompatInfo::default()
    });
    let bad = fleet.engine("docker", "bad", EngineKind::Compat);
    bad.fail("info");

    let info = fleet.registry.info(&id("docker", "good")).await.unwrap();
    assert_eq!(info.server_version, "27.0.1");
    assert_eq!(info.cpus, 8);

    assert!(fleet.registry.info(&id("docker", "bad")).await.is_err());

    let infos = fleet.registry.list_infos(&ListOptions::default()).await.unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].engine.engine_id, id("docker", "good"));
}

// ===========================================================================
// Single-target operations
// ===========================================================================

#[tokio::test]
async fn single_target_ops_need_a_running_engine() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);

    let err = fleet
        .registry
        .start_container(&id("docker", "missing"), "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoRunningEngine { .. }));
    assert!(e1.calls().iter().all(|c| !c.starts_with("start_container")));

    let recorded = fleet.telemetry.named("container.start");
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0]["error"].is_string());
}

#[tokio::test]
async fn container_operations_reach_the_engine() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);
    let engine = id("docker", "e1");
    e1.add_container(compat_container("c1", "web", "exited", &[]));

    fleet.registry.start_container(&engine, "c1").await.unwrap();
    assert_eq!(e1.container_state("c1").as_deref(), Some("running"));
    fleet.registry.stop_container(&engine, "c1").await.unwrap();
    fleet.registry.restart_container(&engine, "c1").await.unwrap();
    fleet.registry.kill_container(&engine, "c1", Some("SIGTERM")).await.unwrap();

    let doc = fleet.registry.inspect_container(&engine, "c1").await.unwrap();
    assert_eq!(doc["Id"], "c1");

    fleet.registry.delete_container(&engine, "c1").await.unwrap();
    assert!(e1.container_state("c1").is_none());
    assert!(fleet.registry.inspect_container(&engine, "c1").await.is_err());
    fleet.registry.ping(&engine).await.unwrap();
}

#[tokio::test]
async fn create_container_can_start_it() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);
    let engine = id("docker", "e1");

    let options = CreateContainerOptions {
        name: Some("web".into()),
        image: "nginx".into(),
        start: true,
        ..CreateContainerOptions::default()
    };
    let new_id = fleet.registry.create_container(&engine, &options).await.unwrap();
    assert_eq!(e1.container_state(&new_id).as_deref(), Some("running"));

    let created_only = CreateContainerOptions {
        start: false,
        ..options
    };
    let other = fleet.registry.create_container(&engine, &created_only).await.unwrap();
    assert_eq!(e1.container_state(&other).as_deref(), Some("created"));
}

#[tokio::test]
async fn pod_and_manifest_ops_require_native() {
    let mut fleet = Fleet::new();
    let native = fleet.engine("podman", "machine", EngineKind::Native);
    fleet.engine("docker", "e1", EngineKind::Compat);
    let podman = id("podman", "machine");
    let docker = id("docker", "e1");

    let pod = fleet
        .registry
        .create_pod(&podman, &CreatePodOptions {
            name: "demo".into(),
            ..CreatePodOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(pod, "pod-demo");
    fleet.registry.start_pod(&podman, &pod).await.unwrap();
    fleet.registry.stop_pod(&podman, &pod).await.unwrap();
    fleet.registry.restart_pod(&podman, &pod).await.unwrap();
    fleet.registry.delete_pod(&podman, &pod).await.unwrap();
    assert_eq!(native.count("native.start_pod"), 1);
    assert_eq!(native.count("native.remove_pod"), 1);

    let err = fleet.registry.start_pod(&docker, "p").await.unwrap_err();
    assert!(matches!(err, EngineError::CapabilityMissing { capability: "pods", .. }));

    let manifest = ManifestOptions {
        name: "app:multi".into(),
        images: vec!["app:amd64".into(), "app:arm64".into()],
        all: false,
    };
    assert_eq!(
        fleet.registry.create_manifest(&podman, &manifest).await.unwrap(),
        "manifest-app:multi"
    );
    let err = fleet.registry.create_manifest(&docker, &manifest).await.unwrap_err();
    assert!(matches!(err, EngineError::CapabilityMissing { capability: "manifests", .. }));
}

#[tokio::test]
async fn prune_and_resource_deletes() {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);
    let engine = id("docker", "e1");
    e1.add_container(compat_container("dead", "old", "exited", &[]));
    e1.add_container(compat_container("alive", "web", "running", &[]));

    let report = fleet.registry.prune_containers(&engine).await.unwrap();
    assert_eq!(report.deleted, vec!["dead"]);
    assert_eq!(e1.container_state("alive").as_deref(), Some("running"));

    fleet.registry.delete_image(&engine, "sha256:abc", true).await.unwrap();
    fleet.registry.delete_volume(&engine, "data").await.unwrap();
    fleet.registry.delete_network(&engine, "net1").await.unwrap();
    fleet.registry.prune_images(&engine, false).await.unwrap();
    fleet.registry.prune_volumes(&engine).await.unwrap();
    let calls = e1.calls();
    for expected in ["remove_image:sha256:abc", "remove_volume:data", "remove_network:net1"] {
        assert!(calls.iter().any(|c| c == expected), "missing call {expected}");
    }
}

// ===========================================================================
// Label batches
// ===========================================================================

fn labelled_fleet() -> (Fleet, Arc<FakeEngine>) {
    let mut fleet = Fleet::new();
    let e1 = fleet.engine("docker", "e1", EngineKind::Compat);
    let demo = [("project", "demo")];
    e1.add_container(compat_container("s1", "one", "exited", &demo));
    e1.add_container(compat_container("s2", "two", "exited", &demo));
    e1.add_container(compat_container("s3", "three", "exited", &demo));
    e1.add_container(compat_container("r1", "running", "running", &demo));
    e1.add_container(compat_container("other", "other", "exited", &[("project", "other")]));
    (fleet, e1)
}

#[tokio::test]
async fn label_batch_attempts_every_target_and_reports_failure() {
    let (fleet, e1) = labelled_fleet();
    e1.fail("start_container:s2");

    let err = fleet
        .registry
        .start_containers_by_label(&id("docker", "e1"), "project", "demo")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("start_container:s2"));

    let calls = e1.calls();
    assert!(calls.iter().any(|c| c == "start_container:s1"), "first target still attempted");
    assert!(calls.iter().any(|c| c == "start_container:s3"), "later target still attempted");
    assert!(!calls.iter().any(|c| c == "start_container:r1"), "running containers are skipped");
    assert!(!calls.iter().any(|c| c == "start_container:other"));
    assert_eq!(e1.container_state("s1").as_deref(), Some("running"));
}

#[tokio::test]
async fn stop_batch_targets_running_only() {
    let (fleet, e1) = labelled_fleet();
    fleet
        .registry
        .stop_containers_by_label(&id("docker", "e1"), "project", "demo")
        .await
        .unwrap();
    assert_eq!(e1.count("stop_container"), 1);
    assert_eq!(e1.container_state("r1").as_deref(), Some("exited"));
}

#[tokio::test]
async fn restart_and_delete_batches_target_every_match() {
    let (fleet, e1) = labelled_fleet();
    let engine = id("docker", "e1");
    fleet
        .registry
        .restart_containers_by_label(&engine, "project", "demo")
        .await
        .unwrap();
    assert_eq!(e1.count("restart_container"), 4);

    fleet
        .registry
        .delete_containers_by_label(&engine, "project", "demo")
        .await
        .unwrap();
    assert_eq!(e1.count("remove_container"), 4);
    assert_eq!(e1.container_state("other").as_deref(), Some("exited"));
    assert!(e1.container_state("s1").is_none());
}

#[tokio::test]
async fn label_batch_with_no_matches_succeeds() {
    let (fleet, e1) = labelled_fleet();
    fleet
        .registry
        .start_containers_by_label(&id("docker", "e1"), "project", "absent")
        .await
        .unwrap();
    assert_eq!(e1.count("start_container"), 0);
}
