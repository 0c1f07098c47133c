use crate::catalog::{Validation, WorkspaceCatalog};
use crate::tests::helpers::FakeStorage;
use crate::workspace::{Descriptor, DescriptorKind, StoreDir, WorkspaceRecord};
use std::collections::BTreeSet;
use std::fs::{File, FileTimes};
use std::time::{Duration, SystemTime};

fn record(uri: &str, store: &str) -> WorkspaceRecord {
    WorkspaceRecord::new(
        Descriptor {
            uri: uri.to_string(),
            kind: DescriptorKind::Folder,
        },
        StoreDir::new(store),
    )
    .unwrap()
}

#[test]
fn test_one_record_per_uri_in_any_discovery_order() {
    let discovered = [
        ("file:///a", "/s/1"),
        ("file:///b", "/s/2"),
        ("file:///a", "/s/3"),
        ("file:///c", "/s/4"),
        ("file:///b", "/s/5"),
        ("file:///a", "/s/6"),
    ];
    let expected: BTreeSet<&str> = discovered.iter().map(|(uri, _)| *uri).collect();

    for rotation in 0..discovered.len() {
        for reversed in [false, true] {
            let mut order: Vec<_> = discovered.to_vec();
            order.rotate_left(rotation);
            if reversed {
                order.reverse();
            }

            let mut catalog = WorkspaceCatalog::new();
            for (uri, store) in order {
                catalog.add(record(uri, store));
            }

            let uris: BTreeSet<String> = catalog.uris().into_iter().collect();
            assert_eq!(uris.len(), expected.len());
            assert!(expected.iter().all(|uri| uris.contains(*uri)));
        }
    }
}

#[test]
fn test_sorted_by_recency_uses_target_access_time() {
    let storage = FakeStorage::new("recency");
    let (old_path, old_uri) = storage.project("old");
    let (new_path, new_uri) = storage.project("new");
    let gone_uri = "file:///definitely/not/here".to_string();

    let now = SystemTime::now();
    let set_accessed = |path: &std::path::Path, at: SystemTime| {
        File::open(path)
            .unwrap()
            .set_times(FileTimes::new().set_accessed(at).set_modified(at))
            .unwrap();
    };
    set_accessed(&old_path, now - Duration::from_secs(3600));
    set_accessed(&new_path, now);

    let mut catalog = WorkspaceCatalog::new();
    catalog.add(record(&gone_uri, "/s/0"));
    catalog.add(record(&old_uri, "/s/1"));
    catalog.add(record(&new_uri, "/s/2"));

    let order: Vec<String> = catalog
        .sorted_by_recency()
        .into_iter()
        .map(|v| v.uri)
        .collect();
    assert_eq!(order, vec![new_uri, old_uri, gone_uri]);
}

#[tokio::test]
async fn test_validate_reports_without_removing() {
    let storage = FakeStorage::new("validate");
    let (project, uri) = storage.project("proj");
    let store = storage.folder_store("s1", &uri);

    let mut catalog = WorkspaceCatalog::new();
    catalog.add(record(&uri, store.to_str().unwrap()));
    let probe = catalog.get(&uri).unwrap().probe();

    assert_eq!(WorkspaceCatalog::check(&probe).await, Validation::Valid);

    std::fs::write(store.join("workspace.json"), "{").unwrap();
    assert!(matches!(
        WorkspaceCatalog::check(&probe).await,
        Validation::DescriptorBroken(_)
    ));

    std::fs::remove_dir_all(&project).unwrap();
    assert!(!WorkspaceCatalog::validate(&probe).await);
    assert_eq!(WorkspaceCatalog::check(&probe).await, Validation::TargetMissing);
    assert!(catalog.contains(&uri));
}

#[test]
fn test_snapshot_is_detached_from_catalog() {
    let mut catalog = WorkspaceCatalog::new();
    catalog.add(record("file:///a", "/s/1"));
    catalog.add(record("file:///b", "/s/2"));

    let snapshot = catalog.snapshot();
    catalog.remove("file:///a");
    catalog.add(record("file:///c", "/s/3"));

    let uris: Vec<&str> = snapshot.iter().map(|v| v.uri.as_str()).collect();
    assert_eq!(uris, vec!["file:///a", "file:///b"]);
}
