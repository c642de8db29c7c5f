//! End-to-end engine scenarios with recording providers.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use berth::engine::Engine;
use berth::provider::Provider;
use berth::registry::Registry;
use berth::resource::{Resource, Status, IMAGE_CACHE_ID};
use berth::state::StateStore;

/// Shared log of provider calls plus switchable failure behavior.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    fail_create: Mutex<HashSet<String>>,
    fail_destroy: Mutex<HashSet<String>>,
    drifted: Mutex<HashSet<String>>,
}

impl Recorder {
    fn record(&self, op: &str, id: &str) {
        self.calls.lock().unwrap().push(format!("{op} {id}"));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn fail_create(&self, id: &str) {
        self.fail_create.lock().unwrap().insert(id.to_string());
    }

    fn fail_destroy(&self, id: &str) {
        self.fail_destroy.lock().unwrap().insert(id.to_string());
    }

    fn mark_drifted(&self, id: &str) {
        self.drifted.lock().unwrap().insert(id.to_string());
    }

    fn clear_failures(&self) {
        self.fail_create.lock().unwrap().clear();
        self.fail_destroy.lock().unwrap().clear();
        self.drifted.lock().unwrap().clear();
    }
}

struct MockProvider {
    recorder: Arc<Recorder>,
}

impl Provider for MockProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        self.recorder.record("create", resource.id());
        if self.recorder.fail_create.lock().unwrap().contains(resource.id()) {
            bail!("create failed for {}", resource.id());
        }
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource) -> Result<()> {
        self.recorder.record("destroy", resource.id());
        if self.recorder.fail_destroy.lock().unwrap().contains(resource.id()) {
            bail!("destroy failed for {}", resource.id());
        }
        Ok(())
    }

    fn refresh(&self, resource: &mut Resource) -> Result<()> {
        self.recorder.record("refresh", resource.id());
        Ok(())
    }

    fn changed(&self, resource: &Resource) -> Result<bool> {
        self.recorder.record("changed", resource.id());
        Ok(self.recorder.drifted.lock().unwrap().contains(resource.id()))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    stack: PathBuf,
    state_path: PathBuf,
    engine: Engine,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let stack = dir.path().join("stack");
        fs::create_dir(&stack).unwrap();
        let state_path = dir.path().join("state.json");

        let recorder = Arc::new(Recorder::default());
        let mut registry = Registry::new();
        for tag in [
            "network",
            "container",
            "sidecar",
            "image_cache",
            "registry",
            "k8s_cluster",
            "helm",
            "exec",
        ] {
            let recorder = recorder.clone();
            registry
                .register(tag, move || {
                    Box::new(MockProvider {
                        recorder: recorder.clone(),
                    })
                })
                .unwrap();
        }

        let engine = Engine::new(registry, StateStore::new(&state_path));
        Self {
            _dir: dir,
            stack,
            state_path,
            engine,
            recorder,
        }
    }

    fn write_stack(&self, content: &str) {
        fs::write(self.stack.join("stack.toml"), content).unwrap();
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(&self.state_path).unwrap()).unwrap()
    }

    fn status_of(&self, id: &str) -> Status {
        self.engine
            .config()
            .find_resource(id)
            .unwrap_or_else(|| panic!("{id} not in config"))
            .status()
    }
}

const NETWORK_AND_CONTAINER: &str = r#"
[network.a]
subnet = "10.0.0.0/24"

[container.c]
image = "app:1"
depends_on = ["resource.network.a"]
"#;

#[test]
fn fresh_apply_creates_stack_and_image_cache() {
    // S1: empty state, one network and one dependent container.
    let mut h = Harness::new();
    h.write_stack(NETWORK_AND_CONTAINER);

    h.engine.apply(&h.stack).unwrap();

    assert_eq!(
        h.recorder.calls(),
        [
            "create resource.image_cache.default",
            "create resource.network.a",
            "refresh resource.image_cache.default",
            "create resource.container.c",
        ]
    );

    assert_eq!(h.status_of("resource.network.a"), Status::Created);
    assert_eq!(h.status_of("resource.container.c"), Status::Created);
    assert_eq!(h.status_of(IMAGE_CACHE_ID), Status::Created);

    let cache = h.engine.config().find_resource(IMAGE_CACHE_ID).unwrap();
    assert_eq!(cache.meta.depends_on, ["resource.network.a"]);

    // State reached disk with the same picture.
    let state = h.state_json();
    assert_eq!(state["resources"].as_array().unwrap().len(), 3);
}

#[test]
fn changed_checksum_destroys_and_recreates() {
    // S2: same resource id, different declared text.
    let mut h = Harness::new();
    h.write_stack("[container.c]\nimage = \"app:1\"\n");
    h.engine.apply(&h.stack).unwrap();

    h.write_stack("[container.c]\nimage = \"app:2\"\n");
    h.recorder.clear_calls();
    h.engine.apply(&h.stack).unwrap();

    assert_eq!(
        h.recorder.calls(),
        [
            "destroy resource.container.c",
            "create resource.container.c",
        ]
    );
    assert_eq!(h.status_of("resource.container.c"), Status::Created);
}

#[test]
fn removed_resource_is_destroyed_and_dropped() {
    // S3: b leaves the stack and therefore the state.
    let mut h = Harness::new();
    h.write_stack(
        "[container.a]\nimage = \"x\"\n\n[container.b]\nimage = \"x\"\n\n[container.c]\nimage = \"x\"\n",
    );
    h.engine.apply(&h.stack).unwrap();

    h.write_stack("[container.a]\nimage = \"x\"\n\n[container.c]\nimage = \"x\"\n");
    h.recorder.clear_calls();
    h.engine.apply(&h.stack).unwrap();

    assert_eq!(h.recorder.count("destroy resource.container.b"), 1);

    let ids: Vec<&str> = h
        .engine
        .config()
        .resources
        .iter()
        .map(|r| r.id())
        .collect();
    assert_eq!(
        ids,
        [
            IMAGE_CACHE_ID,
            "resource.container.a",
            "resource.container.c",
        ]
    );
}

#[test]
fn failed_resource_is_retried_on_next_apply() {
    // S4: create fails, state records failed, the next apply
    // destroys the wreck and recreates.
    let mut h = Harness::new();
    h.write_stack("[container.c]\nimage = \"app:1\"\n");
    h.recorder.fail_create("resource.container.c");

    assert!(h.engine.apply(&h.stack).is_err());
    assert_eq!(h.status_of("resource.container.c"), Status::Failed);

    // Failure is durable.
    let state = h.state_json();
    let recorded = &state["resources"].as_array().unwrap()[1];
    assert_eq!(recorded["properties"]["status"], "failed");

    h.recorder.clear_failures();
    h.recorder.clear_calls();
    h.engine.apply(&h.stack).unwrap();

    assert_eq!(
        h.recorder.calls(),
        [
            "changed resource.container.c",
            "destroy resource.container.c",
            "create resource.container.c",
        ]
    );
    assert_eq!(h.status_of("resource.container.c"), Status::Created);
}

#[test]
fn disabling_a_created_resource_destroys_it_but_keeps_state() {
    // S5: created -> disabled transition.
    let mut h = Harness::new();
    h.write_stack("[container.c]\nimage = \"app:1\"\n");
    h.engine.apply(&h.stack).unwrap();

    h.write_stack("[container.c]\nimage = \"app:1\"\ndisabled = true\n");
    h.recorder.clear_calls();
    h.engine.apply(&h.stack).unwrap();

    assert_eq!(h.recorder.calls(), ["destroy resource.container.c"]);

    let c = h.engine.config().find_resource("resource.container.c").unwrap();
    assert!(c.meta.disabled);
    assert_eq!(c.status(), Status::Disabled);
}

#[test]
fn added_registry_restarts_the_image_cache_once() {
    // S6: a second registry lands in the cache's list and the cache is
    // bounced exactly once to pick it up.
    let mut h = Harness::new();
    h.write_stack(
        r#"
[network.n]
subnet = "10.0.0.0/24"

[registry.r1]
hostname = "r1.internal"
"#,
    );
    h.engine.apply(&h.stack).unwrap();

    h.write_stack(
        r#"
[network.n]
subnet = "10.0.0.0/24"

[registry.r1]
hostname = "r1.internal"

[registry.r2]
hostname = "r2.internal"
"#,
    );
    h.recorder.clear_calls();
    h.engine.apply(&h.stack).unwrap();

    assert_eq!(h.recorder.count("destroy resource.image_cache.default"), 1);
    assert_eq!(h.recorder.count("create resource.image_cache.default"), 1);

    let state = h.state_json();
    let cache = state["resources"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["resource_id"] == IMAGE_CACHE_ID)
        .unwrap();
    let hostnames: Vec<&str> = cache["registries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["hostname"].as_str().unwrap())
        .collect();
    assert_eq!(hostnames, ["r1.internal", "r2.internal"]);
}

#[test]
fn apply_is_idempotent_with_always_successful_providers() {
    // Testable property 6.
    let mut h = Harness::new();
    h.write_stack(NETWORK_AND_CONTAINER);

    h.engine.apply(&h.stack).unwrap();
    let first = h.state_json();

    h.engine.apply(&h.stack).unwrap();
    let second = h.state_json();

    assert_eq!(first, second);
}

#[test]
fn statuses_are_terminal_after_a_successful_apply() {
    // Testable property 3: nothing is left pending or tainted.
    let mut h = Harness::new();
    h.write_stack(
        r#"
[network.a]
subnet = "10.0.0.0/24"

[container.on]
image = "app:1"

[container.off]
image = "app:1"
disabled = true
"#,
    );
    h.engine.apply(&h.stack).unwrap();

    for resource in &h.engine.config().resources {
        assert!(
            matches!(
                resource.status(),
                Status::Created | Status::Disabled | Status::Failed
            ),
            "{} is {:?}",
            resource.id(),
            resource.status()
        );
    }
}

#[test]
fn cache_dependencies_track_created_networks() {
    // Testable property 4, including pruning on removal.
    let mut h = Harness::new();
    h.write_stack(
        "[network.a]\nsubnet = \"10.0.0.0/24\"\n\n[network.b]\nsubnet = \"10.1.0.0/24\"\n",
    );
    h.engine.apply(&h.stack).unwrap();

    let cache = h.engine.config().find_resource(IMAGE_CACHE_ID).unwrap();
    assert_eq!(
        cache.meta.depends_on,
        ["resource.network.a", "resource.network.b"]
    );

    h.write_stack("[network.a]\nsubnet = \"10.0.0.0/24\"\n");
    h.engine.apply(&h.stack).unwrap();

    let cache = h.engine.config().find_resource(IMAGE_CACHE_ID).unwrap();
    assert_eq!(cache.meta.depends_on, ["resource.network.a"]);
}

#[test]
fn destroy_walks_in_reverse_and_deletes_state() {
    // Testable property 5, success half.
    let mut h = Harness::new();
    h.write_stack(NETWORK_AND_CONTAINER);
    h.engine.apply(&h.stack).unwrap();

    h.recorder.clear_calls();
    h.engine.destroy().unwrap();

    let calls = h.recorder.calls();
    assert_eq!(calls.len(), 3);
    // The container leaves before its network; the cache attached to
    // the network, so it leaves before the network too.
    assert_eq!(calls[0], "destroy resource.container.c");
    assert_eq!(calls[2], "destroy resource.network.a");

    assert!(!h.state_path.exists());
    assert!(h.engine.config().is_empty());
}

#[test]
fn destroy_failure_preserves_state_for_retry() {
    // Testable property 5, failure half.
    let mut h = Harness::new();
    h.write_stack(NETWORK_AND_CONTAINER);
    h.engine.apply(&h.stack).unwrap();

    h.recorder.fail_destroy("resource.network.a");
    assert!(h.engine.destroy().is_err());
    assert!(h.state_path.exists());

    h.recorder.clear_failures();
    h.engine.destroy().unwrap();
    assert!(!h.state_path.exists());
}

#[test]
fn destroy_without_state_is_a_noop() {
    let mut h = Harness::new();
    h.engine.destroy().unwrap();
    assert!(h.recorder.calls().is_empty());
}

#[test]
fn diff_partitions_resources() {
    // Testable property 2.
    let mut h = Harness::new();
    h.write_stack(
        "[container.a]\nimage = \"x\"\n\n[container.b]\nimage = \"x\"\n\n[container.c]\nimage = \"x\"\n",
    );
    h.engine.apply(&h.stack).unwrap();

    h.write_stack(
        "[container.a]\nimage = \"y\"\n\n[container.c]\nimage = \"x\"\n\n[container.d]\nimage = \"x\"\n",
    );
    let diff = h
        .engine
        .diff(&h.stack, &Default::default(), None)
        .unwrap();

    let ids = |resources: &[Resource]| -> Vec<String> {
        resources.iter().map(|r| r.id().to_string()).collect()
    };
    assert_eq!(ids(&diff.new), ["resource.container.d"]);
    assert_eq!(ids(&diff.changed), ["resource.container.a"]);
    assert_eq!(ids(&diff.removed), ["resource.container.b"]);
    assert_eq!(ids(&diff.unchanged), ["resource.container.c"]);
}

#[test]
fn drifted_resources_are_classified_changed() {
    // Diff rule 3: an unchanged declaration whose live target moved.
    let mut h = Harness::new();
    h.write_stack("[container.c]\nimage = \"app:1\"\n");
    h.engine.apply(&h.stack).unwrap();

    h.recorder.mark_drifted("resource.container.c");
    let diff = h
        .engine
        .diff(&h.stack, &Default::default(), None)
        .unwrap();

    assert_eq!(diff.changed.len(), 1);
    assert!(diff.unchanged.is_empty());
}

#[test]
fn image_cache_create_failure_is_fatal_but_recorded() {
    let mut h = Harness::new();
    h.write_stack("[container.c]\nimage = \"app:1\"\n");
    h.recorder.fail_create(IMAGE_CACHE_ID);

    let err = h.engine.apply(&h.stack).unwrap_err();
    assert!(err.to_string().contains("image cache"));

    // No other provider ran, but the failed cache made it to disk with
    // its real status.
    assert_eq!(h.recorder.calls(), [format!("create {IMAGE_CACHE_ID}")]);
    let state = h.state_json();
    let cache = &state["resources"].as_array().unwrap()[0];
    assert_eq!(cache["properties"]["status"], "failed");

    // The next apply retries the cache before anything else.
    h.recorder.clear_failures();
    h.recorder.clear_calls();
    h.engine.apply(&h.stack).unwrap();
    assert_eq!(
        h.recorder.calls(),
        [
            format!("destroy {IMAGE_CACHE_ID}"),
            format!("create {IMAGE_CACHE_ID}"),
            "create resource.container.c".to_string(),
        ]
    );
    assert_eq!(h.status_of(IMAGE_CACHE_ID), Status::Created);
}

#[test]
fn failed_branch_does_not_stop_independent_resources() {
    let mut h = Harness::new();
    h.write_stack(
        r#"
[network.a]
subnet = "10.0.0.0/24"

[container.dependent]
image = "app:1"
depends_on = ["resource.network.a"]

[container.lone]
image = "app:1"
"#,
    );
    h.recorder.fail_create("resource.network.a");

    assert!(h.engine.apply(&h.stack).is_err());

    // The dependent was skipped, the unrelated container still came up.
    assert_eq!(h.recorder.count("create resource.container.dependent"), 0);
    assert_eq!(h.recorder.count("create resource.container.lone"), 1);
    assert_eq!(h.status_of("resource.network.a"), Status::Failed);
    assert_eq!(h.status_of("resource.container.lone"), Status::Created);
}

#[test]
fn pseudo_resources_live_in_state_but_never_touch_providers() {
    let mut h = Harness::new();
    let module_dir = h.stack.join("extras");
    fs::create_dir(&module_dir).unwrap();
    fs::write(
        module_dir.join("main.toml"),
        "[container.extra]\nimage = \"app:1\"\n",
    )
    .unwrap();
    h.write_stack(
        r#"
[variable.tag]
default = "1.0"

[module.extras]
source = "./extras"

[container.main]
image = "app:${var.tag}"
"#,
    );

    h.engine.apply(&h.stack).unwrap();
    h.engine.apply(&h.stack).unwrap();

    // Both the module's resources and the pseudo-resources are in state.
    assert!(h.engine.config().find_resource("resource.container.extra").is_some());
    assert!(h.engine.config().find_resource("resource.module.extras").is_some());
    assert!(h.engine.config().find_resource("resource.variable.tag").is_some());

    // No provider call ever names a pseudo-resource.
    assert!(h
        .recorder
        .calls()
        .iter()
        .all(|call| !call.contains("resource.module.") && !call.contains("resource.variable.")));
}

#[test]
fn destroy_reports_missing_provider() {
    // A state file can name a type this binary has no provider for.
    let h = Harness::new();
    fs::write(
        &h.state_path,
        r#"{
            "blueprint": null,
            "resources": [{
                "resource_id": "resource.helm.dangling",
                "resource_name": "dangling",
                "resource_type": "helm",
                "cluster": "resource.k8s_cluster.gone",
                "chart": "x",
                "properties": { "status": "created" }
            }]
        }"#,
    )
    .unwrap();

    let recorder = Arc::new(Recorder::default());
    let mut registry = Registry::new();
    let rec = recorder.clone();
    registry
        .register("network", move || {
            Box::new(MockProvider {
                recorder: rec.clone(),
            })
        })
        .unwrap();

    let mut engine = Engine::new(registry, StateStore::new(&h.state_path));
    let err = engine.destroy().unwrap_err();
    assert!(err.to_string().contains("no provider"));
    assert!(h.state_path.exists());
}
