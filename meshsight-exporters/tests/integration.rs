//! Integration tests for the exporters, driven by a crawl of the demo mesh.

use std::fs;
use std::sync::Arc;

use meshsight_crawler::mock::{MockMesh, MockNode, demo_mesh};
use meshsight_crawler::{Crawler, CrawlerConfig, NetworkMap, ResourceKind, Transport};
use meshsight_exporters::{
    MuninExporter, collect_rows, render_dot, render_table, take_snapshot, to_json,
};
use tempfile::TempDir;

async fn crawl(mesh: &Arc<MockMesh>) -> NetworkMap {
    let coordinator: Arc<dyn Transport> = mesh.clone();
    Crawler::new(coordinator, CrawlerConfig::default())
        .crawl()
        .await
}

#[tokio::test]
async fn test_table_sorted_by_address() {
    let mesh = Arc::new(demo_mesh());
    let mut map = crawl(&mesh).await;

    let rows = collect_rows(&mut map).await;
    let addresses: Vec<u32> = rows.iter().map(|r| r.address).collect();
    assert_eq!(addresses, vec![0, 1, 2, 3, 4, 5]);

    assert_eq!(rows[0].application.as_deref(), Some("Coordinator"));
    assert_eq!(rows[0].uptime_days, Some(14.0));
    assert_eq!(rows[4].application, None);
    assert_eq!(rows[4].uptime_days, None);

    let table = render_table(&rows);
    assert_eq!(table.lines().count(), 7);
    assert!(table.contains("14 days, 0:00:00"));
}

#[tokio::test]
async fn test_dot_edges() {
    let mesh = Arc::new(demo_mesh());
    let map = crawl(&mesh).await;

    let dot = render_dot(&map);
    let edges: Vec<&str> = dot
        .lines()
        .filter(|l| l.contains("->"))
        .map(str::trim)
        .collect();

    assert!(dot.starts_with("digraph net {\n"));
    assert!(dot.ends_with("}\n"));
    assert_eq!(
        edges,
        vec![
            "n0 -> n1", "n0 -> n2", "n0 -> n5", "n1 -> n0", "n1 -> n3", "n3 -> n1", "n3 -> n4",
        ]
    );
}

#[tokio::test]
async fn test_munin_export_writes_artifacts() {
    let dir = TempDir::new().unwrap();
    let mesh = Arc::new(demo_mesh());
    let mut map = crawl(&mesh).await;
    let exporter = MuninExporter::new(dir.path());

    let report = exporter.export(&mut map).await.unwrap();

    // Every graphable resource gets a config.
    assert_eq!(report.configs, 5);
    assert_eq!(report.removed, 0);

    let uptime = fs::read_to_string(exporter.value_path(ResourceKind::Uptime, 1)).unwrap();
    assert_eq!(uptime, "uptime.value 1\n");

    let radio = fs::read_to_string(exporter.value_path(ResourceKind::RadioStatistics, 0)).unwrap();
    assert_eq!(
        radio,
        "bytes.value 374774\noverflows.value 3\ntimeouts.value 12\n"
    );

    // Gated, failed and unreachable readings produce no value files.
    assert!(!exporter.value_path(ResourceKind::RadioStatistics, 5).exists());
    assert!(!exporter.value_path(ResourceKind::McuTemperature, 3).exists());
    assert!(!exporter.value_path(ResourceKind::Uptime, 4).exists());
    assert!(!exporter.value_path(ResourceKind::FritzboxUptime, 0).exists());

    let config = fs::read_to_string(exporter.config_path(ResourceKind::RadioStatistics)).unwrap();
    assert!(config.contains("bytes.type DERIVE"));
}

#[tokio::test]
async fn test_munin_export_removes_stale_files() {
    let dir = TempDir::new().unwrap();
    let exporter = MuninExporter::new(dir.path());

    // A leftover from a node that has since left the mesh.
    let stale = exporter.value_path(ResourceKind::Uptime, 42);
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, "uptime.value 3\n").unwrap();
    let unrelated = dir.path().join("README");
    fs::write(&unrelated, "keep me").unwrap();

    let mesh = Arc::new(
        MockMesh::new().with_node(
            MockNode::new(0)
                .hello("Coordinator", "2.40")
                .neighbors(&[])
                .respond("uptime", "86400"),
        ),
    );
    let mut map = crawl(&mesh).await;

    let report = exporter.export(&mut map).await.unwrap();

    assert_eq!(report.removed, 1);
    assert!(!stale.exists());
    assert!(unrelated.exists());
    assert!(exporter.value_path(ResourceKind::Uptime, 0).exists());
}

#[tokio::test]
async fn test_json_snapshot() {
    let mesh = Arc::new(demo_mesh());
    let mut map = crawl(&mesh).await;

    let snapshot = take_snapshot(&mut map).await;
    assert_eq!(snapshot.nodes.len(), 6);

    let coordinator = &snapshot.nodes[0];
    assert_eq!(coordinator.neighbors, vec![1, 2, 5]);
    assert!(coordinator.resources.contains_key("radio_statistics"));
    assert!(!coordinator.resources.contains_key("fritzbox_uptime"));

    let json: serde_json::Value = serde_json::from_str(&to_json(&snapshot).unwrap()).unwrap();
    assert_eq!(json["nodes"][0]["resources"]["version"], "2.42");
    assert_eq!(json["nodes"][0]["resources"]["uptime"], 14.0);
    assert_eq!(json["nodes"][4]["status"], "unreachable");
}
