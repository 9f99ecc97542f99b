//! Test constants for plinth-extensions tests

#![allow(dead_code)]

pub const BLOG: &str = "Acme.Blog";
pub const FORUM: &str = "Acme.Forum";
pub const LEGACY_BLOG: &str = "Legacy.Blog";
pub const DARK_THEME: &str = "Acme.Dark";
pub const SYSTEM_MODULE: &str = "System";

/// Three versions, the middle one without a script
pub const BLOG_MANIFEST: &str = r#"1.0.0:
  - Initial version
  - create_posts.php
1.0.1: Fixes an issue with the excerpt
1.1.0:
  - Adds comments
  - create_comments.php
"#;

pub const SINGLE_VERSION_MANIFEST: &str = "1.0.0: First version\n";

/// Base64 of `plinth-secret`
pub const TEST_SECRET: &str = "cGxpbnRoLXNlY3JldA==";
pub const TEST_KEY: &str = "test-key";
pub const TEST_SERVER: &str = "https://catalog.test/api";
