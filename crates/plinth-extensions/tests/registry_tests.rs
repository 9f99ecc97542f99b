//! Integration tests for extension discovery and dependency ordering

mod common;

use common::*;
use plinth_core::Error;
use plinth_extensions::registry::{resolve_replacement, ExtensionRegistry};
use plinth_extensions::types::{Extension, ExtensionKind};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

fn plugin(id: &str, requires: &[&str]) -> Extension {
    let mut extension = Extension::new(id, ExtensionKind::Plugin, PathBuf::from("/p").join(id));
    extension.requires = requires.iter().map(|r| r.to_string()).collect();
    extension
}

fn position(order: &[String], id: &str) -> usize {
    order.iter().position(|o| o == id).unwrap()
}

#[test]
fn test_discovery_reads_layout_and_skips_broken_descriptors() {
    let site = TestSite::new();
    site.plugin(BLOG).manifest(SINGLE_VERSION_MANIFEST).write();
    site.plugin(FORUM).requires(&[BLOG]).write();

    let root = site.kind_root(ExtensionKind::Plugin);
    let broken = root.join("acme/broken");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("extension.yaml"), "requires: [unterminated\n").unwrap();

    // no identifier declared: derived from vendor and name directories
    let implicit = root.join("beta/shop");
    fs::create_dir_all(&implicit).unwrap();
    fs::write(implicit.join("extension.yaml"), "name: Shop\n").unwrap();

    let registry = ExtensionRegistry::discover(ExtensionKind::Plugin, &root, None).unwrap();

    assert_eq!(registry.identifiers(), vec!["Acme.Blog", "Acme.Forum", "beta.shop"]);
    assert_eq!(registry.get("ACME.BLOG").unwrap().identifier, BLOG);
    assert_eq!(registry.normalize("acme.forum"), Some(FORUM));
    assert_eq!(registry.get(FORUM).unwrap().requires, vec![BLOG]);
}

#[test]
fn test_discovery_of_missing_root_is_empty() {
    let site = TestSite::new();
    let registry = ExtensionRegistry::discover(
        ExtensionKind::Theme,
        &site.root().join("nowhere"),
        None,
    )
    .unwrap();
    assert!(registry.is_empty());
}

#[test]
fn test_module_discovery_respects_allow_list() {
    let site = TestSite::new();
    site.module("System").write();
    site.module("Backend").write();
    site.module("Cms").write();

    let allowed = vec!["system".to_string(), "CMS".to_string()];
    let registry = ExtensionRegistry::discover(
        ExtensionKind::Module,
        &site.kind_root(ExtensionKind::Module),
        Some(&allowed),
    )
    .unwrap();

    assert_eq!(registry.identifiers(), vec!["Cms", "System"]);
}

#[test]
fn test_order_puts_dependencies_first() {
    let registry = ExtensionRegistry::from_extensions(
        ExtensionKind::Plugin,
        [
            plugin("Acme.Shop", &["Acme.Cart", "Acme.Users"]),
            plugin("Acme.Cart", &["Acme.Users"]),
            plugin("Acme.Users", &[]),
            plugin("Acme.Blog", &["Acme.Absent"]),
        ],
    );

    let order = registry.topological_order(&BTreeMap::new()).unwrap();

    assert_eq!(order.len(), 4);
    assert!(position(&order, "Acme.Users") < position(&order, "Acme.Cart"));
    assert!(position(&order, "Acme.Cart") < position(&order, "Acme.Shop"));
}

#[test]
fn test_cycle_is_reported() {
    let registry = ExtensionRegistry::from_extensions(
        ExtensionKind::Plugin,
        [
            plugin("Acme.A", &["Acme.B"]),
            plugin("Acme.B", &["Acme.A"]),
            plugin("Acme.C", &[]),
        ],
    );

    match registry.topological_order(&BTreeMap::new()) {
        Err(Error::CircularDependency { unresolved, .. }) => {
            assert!(unresolved.contains("Acme.A"));
            assert!(unresolved.contains("Acme.B"));
            assert!(!unresolved.contains("Acme.C"));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn test_requirements_follow_replacements() {
    let registry = ExtensionRegistry::from_extensions(
        ExtensionKind::Plugin,
        [
            plugin("Acme.Forum", &["Legacy.Blog"]),
            plugin("Acme.Blog", &[]),
        ],
    );
    let replacements: BTreeMap<String, String> =
        [("Legacy.Blog".to_string(), "Acme.Blog".to_string())].into();

    assert!(registry.find_missing_dependencies(&replacements).is_empty());
    assert_eq!(
        registry.find_missing_dependencies(&BTreeMap::new())["Acme.Forum"],
        vec!["Legacy.Blog"]
    );

    let order = registry.topological_order(&replacements).unwrap();
    assert_eq!(order, vec!["Acme.Blog", "Acme.Forum"]);

    let once = resolve_replacement("legacy.blog", &replacements);
    assert_eq!(once, "Acme.Blog");
    assert_eq!(resolve_replacement(&once, &replacements), once);
}
