//! Sequential pipeline behavior over single-partition fixtures.

use std::sync::Arc;

use romkit::config::ResignConfig;
use romkit::partitions::{Partition, PartitionName};
use romkit::resigner::{ResignError, RomResigner, RunCounters};
use romkit::signing::KeyStore;
use romkit::xattrs::SECURITY_CONTEXT_ATTR;

use crate::support::{
    make_key, make_partition_tree, matching_cert, policy_xml, unmatched_cert, write_package,
    EchoParser, FailingSigner, MemoryAttrs, RecordingSigner,
};

fn sequential() -> ResignConfig {
    ResignConfig {
        parallel: false,
        workers: 1,
    }
}

fn partition(root: &std::path::Path) -> Partition {
    Partition {
        name: PartitionName::System,
        path: root.to_path_buf(),
    }
}

#[tokio::test]
async fn resigns_matching_package_and_updates_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = make_partition_tree(dir.path(), &policy_xml(&[("platform", "aabbcc")]));
    let package = root.join("app").join("Settings.apk");
    write_package(&package, Some(&matching_cert("aabbcc")));

    let key = make_key(dir.path(), "platform");
    let mut keys = KeyStore::new();
    keys.insert("platform".to_owned(), key.key.clone());

    let attrs = Arc::new(MemoryAttrs::default());
    attrs.put(&package, SECURITY_CONTEXT_ATTR, b"u:object_r:system_file:s0");
    let signer = Arc::new(RecordingSigner::new(Arc::clone(&attrs)));

    let mut resigner = RomResigner::new(
        keys,
        Arc::clone(&signer) as Arc<dyn romkit::signing::PackageSigner>,
        Arc::new(EchoParser),
        Arc::clone(&attrs) as Arc<dyn romkit::xattrs::SecurityAttrs>,
        &sequential(),
    );
    let counters = resigner
        .resign(&[partition(&root)])
        .await
        .expect("resign run");

    assert_eq!(
        counters,
        RunCounters {
            total_processed: 1,
            resigned: 1,
            skipped: 0
        }
    );
    assert_eq!(signer.signed_labels(), vec!["platform".to_owned()]);

    // The security context must round-trip across the signing rewrite.
    assert_eq!(
        attrs.read(&package, SECURITY_CONTEXT_ATTR).as_deref(),
        Some(&b"u:object_r:system_file:s0"[..])
    );

    let text = std::fs::read_to_string(
        root.join("etc").join("selinux").join("plat_mac_permissions.xml"),
    )
    .expect("read policy");
    assert!(text.contains(&format!("signature=\"{}\"", key.der_hex)));
    assert!(!text.contains("signature=\"aabbcc\""));
}

#[tokio::test]
async fn skips_matched_package_without_key_and_leaves_policy_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let policy = policy_xml(&[("platform", "aabbcc")]);
    let root = make_partition_tree(dir.path(), &policy);
    let package = root.join("app").join("Settings.apk");
    write_package(&package, Some(&matching_cert("aabbcc")));

    let attrs = Arc::new(MemoryAttrs::default());
    let signer = Arc::new(RecordingSigner::new(Arc::clone(&attrs)));

    let mut resigner = RomResigner::new(
        KeyStore::new(),
        Arc::clone(&signer) as Arc<dyn romkit::signing::PackageSigner>,
        Arc::new(EchoParser),
        Arc::clone(&attrs) as Arc<dyn romkit::xattrs::SecurityAttrs>,
        &sequential(),
    );
    let counters = resigner
        .resign(&[partition(&root)])
        .await
        .expect("resign run");

    assert_eq!(
        counters,
        RunCounters {
            total_processed: 1,
            resigned: 0,
            skipped: 1
        }
    );
    assert!(signer.signed_labels().is_empty());

    let text = std::fs::read_to_string(
        root.join("etc").join("selinux").join("plat_mac_permissions.xml"),
    )
    .expect("read policy");
    assert_eq!(text, policy);
}

#[tokio::test]
async fn skips_package_whose_certificate_matches_no_label() {
    let dir = tempfile::tempdir().expect("tempdir");
    let policy = policy_xml(&[("platform", "aabbcc")]);
    let root = make_partition_tree(dir.path(), &policy);
    let package = root.join("app").join("Other.apk");
    write_package(&package, Some(&unmatched_cert()));

    let key = make_key(dir.path(), "platform");
    let mut keys = KeyStore::new();
    keys.insert("platform".to_owned(), key.key);

    let attrs = Arc::new(MemoryAttrs::default());
    let signer = Arc::new(RecordingSigner::new(Arc::clone(&attrs)));

    let mut resigner = RomResigner::new(
        keys,
        Arc::clone(&signer) as Arc<dyn romkit::signing::PackageSigner>,
        Arc::new(EchoParser),
        Arc::clone(&attrs) as Arc<dyn romkit::xattrs::SecurityAttrs>,
        &sequential(),
    );
    let counters = resigner
        .resign(&[partition(&root)])
        .await
        .expect("resign run");

    assert_eq!(
        counters,
        RunCounters {
            total_processed: 1,
            resigned: 0,
            skipped: 1
        }
    );
    let text = std::fs::read_to_string(
        root.join("etc").join("selinux").join("plat_mac_permissions.xml"),
    )
    .expect("read policy");
    assert_eq!(text, policy);
}

#[tokio::test]
async fn unsigned_package_is_never_mutated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = make_partition_tree(dir.path(), &policy_xml(&[("platform", "aabbcc")]));
    let package = root.join("app").join("Plain.jar");
    write_package(&package, None);
    let before = std::fs::read(&package).expect("read package");

    let key = make_key(dir.path(), "platform");
    let mut keys = KeyStore::new();
    keys.insert("platform".to_owned(), key.key);

    let attrs = Arc::new(MemoryAttrs::default());
    let signer = Arc::new(RecordingSigner::new(Arc::clone(&attrs)));

    let mut resigner = RomResigner::new(
        keys,
        Arc::clone(&signer) as Arc<dyn romkit::signing::PackageSigner>,
        Arc::new(EchoParser),
        Arc::clone(&attrs) as Arc<dyn romkit::xattrs::SecurityAttrs>,
        &sequential(),
    );
    let counters = resigner
        .resign(&[partition(&root)])
        .await
        .expect("resign run");

    assert_eq!(
        counters,
        RunCounters {
            total_processed: 1,
            resigned: 0,
            skipped: 1
        }
    );
    let after = std::fs::read(&package).expect("read package");
    assert_eq!(before, after);
}

#[tokio::test]
async fn partition_without_policy_document_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("partition");
    std::fs::create_dir_all(root.join("app")).expect("create app dir");
    let package = root.join("app").join("Settings.apk");
    write_package(&package, Some(&matching_cert("aabbcc")));

    let attrs = Arc::new(MemoryAttrs::default());
    let signer = Arc::new(RecordingSigner::new(Arc::clone(&attrs)));

    let mut resigner = RomResigner::new(
        KeyStore::new(),
        Arc::clone(&signer) as Arc<dyn romkit::signing::PackageSigner>,
        Arc::new(EchoParser),
        Arc::clone(&attrs) as Arc<dyn romkit::xattrs::SecurityAttrs>,
        &sequential(),
    );
    let counters = resigner
        .resign(&[partition(&root)])
        .await
        .expect("resign run");

    assert_eq!(counters, RunCounters::default());
    assert!(signer.signed_labels().is_empty());
}

#[tokio::test]
async fn counters_accumulate_across_partitions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let key = make_key(dir.path(), "platform");

    let mut partitions = Vec::new();
    for sub in ["first", "second"] {
        let tree = dir.path().join(sub);
        std::fs::create_dir_all(&tree).expect("create partition dir");
        let root = make_partition_tree(&tree, &policy_xml(&[("platform", "aabbcc")]));
        write_package(
            &root.join("app").join("Settings.apk"),
            Some(&matching_cert("aabbcc")),
        );
        partitions.push(Partition {
            name: PartitionName::System,
            path: root,
        });
    }

    let mut keys = KeyStore::new();
    keys.insert("platform".to_owned(), key.key);

    let attrs = Arc::new(MemoryAttrs::default());
    let signer = Arc::new(RecordingSigner::new(Arc::clone(&attrs)));

    let mut resigner = RomResigner::new(
        keys,
        Arc::clone(&signer) as Arc<dyn romkit::signing::PackageSigner>,
        Arc::new(EchoParser),
        Arc::clone(&attrs) as Arc<dyn romkit::xattrs::SecurityAttrs>,
        &sequential(),
    );
    let counters = resigner.resign(&partitions).await.expect("resign run");

    assert_eq!(
        counters,
        RunCounters {
            total_processed: 2,
            resigned: 2,
            skipped: 0
        }
    );
}

#[tokio::test]
async fn signer_failure_aborts_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = make_partition_tree(dir.path(), &policy_xml(&[("platform", "aabbcc")]));
    write_package(
        &root.join("app").join("Settings.apk"),
        Some(&matching_cert("aabbcc")),
    );

    let key = make_key(dir.path(), "platform");
    let mut keys = KeyStore::new();
    keys.insert("platform".to_owned(), key.key);

    let attrs = Arc::new(MemoryAttrs::default());
    let mut resigner = RomResigner::new(
        keys,
        Arc::new(FailingSigner),
        Arc::new(EchoParser),
        Arc::clone(&attrs) as Arc<dyn romkit::xattrs::SecurityAttrs>,
        &sequential(),
    );
    let result = resigner.resign(&[partition(&root)]).await;

    assert!(matches!(result, Err(ResignError::Signer(_))));
}
