//! Dependency lock files read from source bundles or built from packages.

mod common;

use common::{LOCK_ADDR, bundle, service};
use lockstep_rpc::ServiceError;
use lockstep_rpc::wire::SourceAddress;
use lockstep_schema::Severity;

fn addr(source: &str) -> SourceAddress {
    SourceAddress {
        source: source.to_string(),
        versions: String::new(),
    }
}

#[test]
fn test_locked_providers_sorted_with_preferred_hashes() {
    let svc = service();
    let dir = bundle(
        r#"
[[provider]]
source = "hashicorp/random"
version = "3.6.0"
hashes = ["zh:1f4f2a0d", "h1:abc="]

[[provider]]
source = "hashicorp/aws"
version = "5.31.0"
constraints = ">= 5.0"
"#,
    );
    let b = svc.open_source_bundle(dir.path()).unwrap();
    let opened = svc.open_dependency_lock_file(b, &addr(LOCK_ADDR)).unwrap();
    assert!(opened.diagnostics.is_empty());

    let providers = svc
        .get_locked_provider_dependencies(opened.dependency_locks_handle.unwrap())
        .unwrap();
    let names: Vec<&str> = providers.iter().map(|p| p.source_addr.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "registry.terraform.io/hashicorp/aws",
            "registry.terraform.io/hashicorp/random"
        ]
    );
    assert!(providers[0].hashes.is_empty());
    assert_eq!(providers[1].hashes, vec!["h1:abc=".to_string(), "zh:1f4f2a0d".to_string()]);
}

#[test]
fn test_warnings_keep_the_lock_set() {
    let svc = service();
    let legacy = "a".repeat(64);
    let dir = bundle(&format!(
        "[[provider]]\nsource = \"hashicorp/null\"\nversion = \"3.2.1\"\nhashes = [\"{legacy}\"]\n"
    ));
    let b = svc.open_source_bundle(dir.path()).unwrap();
    let opened = svc.open_dependency_lock_file(b, &addr(LOCK_ADDR)).unwrap();

    assert!(opened.dependency_locks_handle.is_some());
    assert_eq!(opened.diagnostics.len(), 1);
    assert_eq!(opened.diagnostics[0].severity, Severity::Warning);
}

#[test]
fn test_errors_give_no_handle() {
    let svc = service();
    let dir = bundle("[[provider]]\nsource = \"hashicorp/null\"\nversion = \"~> 3.2\"\n");
    let b = svc.open_source_bundle(dir.path()).unwrap();
    let opened = svc.open_dependency_lock_file(b, &addr(LOCK_ADDR)).unwrap();

    assert!(opened.dependency_locks_handle.is_none());
    assert!(opened.diagnostics.iter().any(|d| d.severity == Severity::Error));
    assert_eq!(svc.handles().len(), 1);
}

#[test]
fn test_lock_file_address_must_be_in_bundle() {
    let svc = service();
    let dir = bundle("");
    let b = svc.open_source_bundle(dir.path()).unwrap();

    for bad in [
        "./deps.lock.toml",
        "https://example.com/other.tar.gz//deps.lock.toml",
        "::nonsense",
    ] {
        let err = svc.open_dependency_lock_file(b, &addr(bad)).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)), "{bad}: {err:?}");
    }
}
