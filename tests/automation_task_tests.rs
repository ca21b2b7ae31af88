/// Automation task tests
///
/// Runs rebuild tasks the way a cluster-operation scheduler does: by name, with string
/// parameters, inserting emitted tasks right after the task that emitted them.
/// Run with: cargo test --test automation_task_tests

use shardgraph::automation::{self, TaskContainer, check_required_parameters, task_for_name};
use shardgraph::{
    Keyspace, MemoryTopoServer, RebuildConfig, RebuildDriver, RebuildEngine, Shard, Tablet,
    TabletAlias, TabletRole, TopoError, TopoServer,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

async fn sharded_keyspace() -> (MemoryTopoServer, RebuildDriver) {
    let topo = MemoryTopoServer::new();
    topo.create_keyspace(&Keyspace::new("customer")).await.unwrap();
    for (index, name) in ["-40", "40-80", "80-"].iter().enumerate() {
        let mut shard = Shard::new("customer", *name).unwrap();
        shard.add_cell("zone1");
        shard.add_cell("zone2");
        topo.create_shard(&shard).await.unwrap();

        let base = (index as u32 + 1) * 100;
        for (offset, cell, role) in [
            (1, "zone1", TabletRole::Master),
            (2, "zone1", TabletRole::Replica),
            (3, "zone2", TabletRole::Rdonly),
        ] {
            topo.create_tablet(&Tablet::new(
                TabletAlias::new(cell, base + offset),
                format!("customer-{}", base + offset),
                "customer",
                *name,
                role,
            ))
            .await
            .unwrap();
        }
    }
    let driver = RebuildDriver::new(
        RebuildEngine::new(Arc::new(topo.clone())),
        RebuildConfig::default(),
    )
    .unwrap();
    (topo, driver)
}

/// Minimal scheduler: emitted tasks run next, in emission order. Returns the names run.
async fn run_all(first: TaskContainer, driver: &RebuildDriver) -> Vec<String> {
    let mut queue = VecDeque::from([first]);
    let mut ran = Vec::new();
    while let Some(container) = queue.pop_front() {
        let output = assert_ok!(automation::run_task(&container, driver.clone()).await);
        ran.push(format!(
            "{}:{}",
            container.name,
            container.parameters.get("shard").map(String::as_str).unwrap_or("*")
        ));
        for task in output.new_tasks.into_iter().rev() {
            queue.push_front(task);
        }
    }
    ran
}

#[tokio::test]
async fn test_keyspace_task_rebuilds_every_shard() {
    let (topo, driver) = sharded_keyspace().await;

    let ran = run_all(
        TaskContainer::new("RebuildKeyspace").parameter("keyspace", "customer"),
        &driver,
    )
    .await;
    assert_eq!(
        ran,
        vec![
            "RebuildKeyspace:*",
            "RebuildShard:-40",
            "RebuildShard:40-80",
            "RebuildShard:80-"
        ]
    );

    for shard in ["-40", "40-80", "80-"] {
        let zone1 = topo
            .get_endpoint_set_roles("zone1", "customer", shard)
            .await
            .unwrap();
        assert_eq!(zone1, vec![TabletRole::Master, TabletRole::Replica]);
        let zone2 = topo
            .get_endpoint_set_roles("zone2", "customer", shard)
            .await
            .unwrap();
        assert_eq!(zone2, vec![TabletRole::Rdonly]);
    }
}

#[tokio::test]
async fn test_shard_task_limited_to_cells() {
    let (topo, driver) = sharded_keyspace().await;
    let task = task_for_name("rebuildShard", driver).unwrap();
    let parameters = HashMap::from([
        ("keyspace".to_string(), "customer".to_string()),
        ("shard".to_string(), "80-".to_string()),
        ("cells".to_string(), "zone2".to_string()),
        ("lock_timeout_ms".to_string(), "500".to_string()),
    ]);
    assert_ok!(check_required_parameters(task.as_ref(), &parameters));

    let output = assert_ok!(task.run(&parameters).await);
    assert!(output.output.contains("zone2=done"), "{}", output.output);
    assert!(output.output.ends_with("changed=true"));

    let zone1 = topo
        .get_endpoint_set_roles("zone1", "customer", "80-")
        .await
        .unwrap();
    assert!(zone1.is_empty());
}

#[tokio::test]
async fn test_shard_task_surfaces_cell_failures() {
    let (topo, driver) = sharded_keyspace().await;
    topo.fail_endpoint_writes_in_cell("zone2");

    let container = TaskContainer::new("RebuildShard")
        .parameter("keyspace", "customer")
        .parameter("shard", "-40");
    let err = assert_err!(automation::run_task(&container, driver).await);
    let TopoError::Aggregate(failures) = err else {
        panic!("expected aggregate error, got {:?}", err);
    };
    assert_eq!(failures.failed_cells(), vec!["customer/-40/zone2"]);
    assert_eq!(failures.succeeded, vec!["customer/-40/zone1"]);
}

#[tokio::test]
async fn test_missing_keyspace_parameter() {
    let (_topo, driver) = sharded_keyspace().await;
    let err = assert_err!(
        automation::run_task(&TaskContainer::new("RebuildKeyspace"), driver).await
    );
    assert!(matches!(err, TopoError::InvalidArgument(ref msg) if msg.contains("keyspace")));
}

#[tokio::test]
async fn test_keyspace_task_unknown_keyspace() {
    let (_topo, driver) = sharded_keyspace().await;
    let container = TaskContainer::new("RebuildKeyspace").parameter("keyspace", "nope");
    let err = assert_err!(automation::run_task(&container, driver).await);
    assert!(err.is_not_found());
}
