//! End-to-end resolution through configured namespaces.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata::config::{NamespaceConfig, ProviderDecl, ProviderKind};
use strata::provider::{Bundle, BundleProvider, FsProvider, NamingProvider};
use strata::{Namespace, ProviderEntry, ResolveError, Runtime, Settings, WeightRegistry, WeightRule};
use tempfile::TempDir;

fn dir(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    fs::create_dir_all(&path).unwrap();
    path.canonicalize().unwrap()
}

fn fs_entry(root: &Path, weight: i64, read_only: bool) -> ProviderEntry {
    ProviderEntry::new(Arc::new(FsProvider::new(root, read_only)), weight)
}

#[test]
fn test_scenario_read_prefers_heavier_provider() {
    let temp = TempDir::new().unwrap();
    let heavy = dir(temp.path(), "heavy");
    let light = dir(temp.path(), "light");
    fs::write(heavy.join("config.xml"), "<heavy/>").unwrap();
    fs::write(light.join("config.xml"), "<light/>").unwrap();

    let ns = Namespace::new(
        "config",
        "/",
        vec![fs_entry(&light, 5, false), fs_entry(&heavy, 10, false)],
    )
    .unwrap();

    let binding = ns.resolve_for_read("config.xml").unwrap();
    assert_eq!(binding.weight(), 10);
    assert_eq!(ns.read_to_string("config.xml").unwrap().unwrap(), "<heavy/>");
}

#[test]
fn test_scenario_read_only_reader_writes_elsewhere() {
    let temp = TempDir::new().unwrap();
    let heavy = dir(temp.path(), "heavy");
    let light = dir(temp.path(), "light");
    fs::write(heavy.join("config.xml"), "<heavy/>").unwrap();
    fs::write(light.join("config.xml"), "<light/>").unwrap();

    let ns = Namespace::new(
        "config",
        "/",
        vec![fs_entry(&heavy, 10, true), fs_entry(&light, 5, false)],
    )
    .unwrap();

    let binding = ns.resolve_for_write("config.xml").unwrap();
    assert_eq!(binding.weight(), 5);
    assert_eq!(binding.physical().unwrap(), light.join("config.xml"));
}

#[test]
fn test_write_then_read_sees_same_provider() {
    let temp = TempDir::new().unwrap();
    let top = dir(temp.path(), "top");
    let middle = dir(temp.path(), "middle");
    let bottom = dir(temp.path(), "bottom");
    fs::write(bottom.join("app.toml"), "bottom").unwrap();

    let ns = Namespace::new(
        "app",
        "/",
        vec![
            fs_entry(&top, 30, false),
            fs_entry(&middle, 20, true),
            fs_entry(&bottom, 10, true),
        ],
    )
    .unwrap();

    for path in ["app.toml", "fresh.toml", "nested/deep.toml"] {
        let written = ns.write_all(path, b"content").unwrap();
        let read = ns.resolve_for_read(path).unwrap();
        assert!(written.same_provider(&read), "{path} read from another provider");
    }
}

#[test]
fn test_provider_order_is_descending_and_stable() {
    let temp = TempDir::new().unwrap();
    let roots: Vec<_> = ["c", "a", "b", "d"]
        .iter()
        .map(|name| dir(temp.path(), name))
        .collect();
    let weights = [5, 5, 9, 1];

    let entries = roots
        .iter()
        .zip(weights)
        .map(|(root, weight)| fs_entry(root, weight, false))
        .collect();
    let ns = Namespace::new("t", "/", entries).unwrap();

    let providers = ns.providers();
    for pair in providers.windows(2) {
        assert!(pair[0].weight() >= pair[1].weight());
    }
    let before: Vec<String> = providers.iter().map(|e| e.location().to_string()).collect();

    ns.resort(&WeightRegistry::new());
    let after: Vec<String> = ns.providers().iter().map(|e| e.location().to_string()).collect();
    assert_eq!(before, after);
}

#[test]
fn test_enumeration_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let one = dir(temp.path(), "one");
    let two = dir(temp.path(), "two");
    fs::create_dir_all(one.join("conf")).unwrap();
    fs::write(one.join("conf/a.toml"), "").unwrap();
    fs::write(two.join("b.toml"), "").unwrap();
    fs::write(two.join("a.txt"), "").unwrap();

    let ns = Namespace::new("t", "/", vec![fs_entry(&one, 2, false), fs_entry(&two, 1, false)]).unwrap();

    let first = ns.list(Some("*.toml"), true).unwrap();
    assert_eq!(first, vec!["b.toml", "conf/a.toml"]);
    assert_eq!(first, ns.list(Some("*.toml"), true).unwrap());
    assert_eq!(ns.list(None, false).unwrap(), vec!["a.txt", "b.toml"]);
}

#[test]
fn test_scenario_child_then_parent_is_equal() {
    let temp = TempDir::new().unwrap();
    let root = dir(temp.path(), "root");
    fs::create_dir_all(root.join("sub")).unwrap();

    let ns = Namespace::new("t", "/", vec![fs_entry(&root, 1, false)]).unwrap();
    let child = ns.child_namespace("sub").unwrap();
    let parent = child.parent_namespace().unwrap();

    assert_eq!(*parent, *ns);
    assert_eq!(parent.context(), ns.context());
    assert!(Arc::ptr_eq(&child.child_namespace("..").unwrap(), &ns));
}

#[test]
fn test_bundles_ordered_by_weight_rules() {
    let temp = TempDir::new().unwrap();
    let core = dir(temp.path(), "core");
    let ext = dir(temp.path(), "ext");
    for (bundle, body) in [(&core, "core"), (&ext, "ext")] {
        fs::write(bundle.join("index.list"), "# entries\nmessages.properties\n").unwrap();
        fs::write(bundle.join("messages.properties"), body).unwrap();
    }
    fs::write(core.join("unlisted.txt"), "hidden").unwrap();

    let registry = Arc::new(WeightRegistry::with_rules(vec![
        WeightRule::new("/ext!/", 10).unwrap(),
    ]));
    let bundles = vec![
        Bundle::load(&core, "index.list").unwrap(),
        Bundle::load(&ext, "index.list").unwrap(),
    ];
    let provider = BundleProvider::new(bundles, Arc::clone(&registry));
    let ns = Namespace::new("b", "/", vec![ProviderEntry::new(Arc::new(provider), 1)]).unwrap();

    assert_eq!(ns.read_to_string("messages.properties").unwrap().unwrap(), "ext");
    assert!(ns.resolve_for_read("unlisted.txt").is_none());
    assert!(matches!(
        ns.resolve_for_write("messages.properties"),
        Err(ResolveError::WriteUnsupported { .. })
    ));
}

#[test]
fn test_naming_provider_lookup() {
    let vars = [
        ("APP_DB_URL".to_string(), "postgres://db".to_string()),
        ("OTHER_KEY".to_string(), "ignored".to_string()),
    ];
    let provider = NamingProvider::from_vars("APP", vars);
    let ns = Namespace::new("names", "/", vec![ProviderEntry::new(Arc::new(provider), 1)]).unwrap();

    assert_eq!(ns.read_to_string("db/url").unwrap().unwrap(), "postgres://db");
    assert!(!ns.exists("other/key"));
    assert!(ns.candidates("db/url").unwrap().is_empty());
}

#[test]
fn test_malformed_paths() {
    let temp = TempDir::new().unwrap();
    let root = dir(temp.path(), "root");
    let ns = Namespace::new("t", "/", vec![fs_entry(&root, 1, false)]).unwrap();

    assert!(ns.create_resource("").is_err());
    assert!(ns.resolve_for_read("../../escape").is_none());
    assert!(matches!(
        ns.resolve_for_write("/../escape"),
        Err(ResolveError::MalformedPath { .. })
    ));
}

#[test]
fn test_runtime_builds_configured_namespaces() {
    let temp = TempDir::new().unwrap();
    dir(temp.path(), "overrides");
    dir(temp.path(), "defaults");
    fs::write(temp.path().join("defaults/app.toml"), "default").unwrap();
    fs::write(temp.path().join("overrides/app.toml"), "override").unwrap();

    let mut settings = Settings {
        workspace_root: Some(temp.path().to_path_buf()),
        ..Settings::default()
    };
    settings.weights.watch_rules_file = false;
    settings.namespaces.insert(
        "config".to_string(),
        NamespaceConfig {
            context: "/".to_string(),
            providers: vec![
                ProviderDecl::filesystem("defaults").with_weight(1),
                ProviderDecl::filesystem("overrides").with_weight(2),
                ProviderDecl {
                    kind: ProviderKind::Null,
                    ..ProviderDecl::filesystem("unused")
                },
            ],
        },
    );

    let runtime = Runtime::new(settings).unwrap();
    let ns = runtime.namespace("config").unwrap();
    assert_eq!(ns.providers().len(), 3);
    assert_eq!(ns.read_to_string("app.toml").unwrap().unwrap(), "override");

    let listed: BTreeSet<_> = ns.list(None, false).unwrap().into_iter().collect();
    assert!(listed.contains("app.toml"));
}
