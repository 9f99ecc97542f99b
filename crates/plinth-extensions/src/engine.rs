//! Migration engine
//!
//! Diffs an extension's version manifest against the ledger and walks the
//! difference forward (`apply_up_to`) or backward (`revert_to`).
//!
//! Forward application is fail-hard: the first script error aborts the
//! call and the ledger stays at the last version that completed. Each
//! version is recorded only after all of its scripts succeed, so a retry
//! resumes from the failed version and skips scripts already in history.

use crate::ledger::MigrationLedger;
use crate::runner::MigrationRunner;
use crate::types::{Extension, HistoryKind, UNINSTALLED_VERSION};
use crate::version_file::{compare_versions, ManifestEntry, VersionFileReader, VersionManifest, UPDATES_DIR};
use plinth_core::{Error, Result};
use std::cmp::Ordering;
use std::sync::Arc;

/// Longest comment shown on a progress line
const DISPLAY_COMMENT_LIMIT: usize = 120;

/// Outcome of a forward migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub identifier: String,
    /// False when the extension carries no version file
    pub has_version_file: bool,
    /// Versions applied by this call, ascending
    pub applied: Vec<String>,
    /// One display line per applied version
    pub lines: Vec<String>,
}

impl ApplyReport {
    fn empty(identifier: &str, has_version_file: bool) -> Self {
        Self {
            identifier: identifier.to_string(),
            has_version_file,
            applied: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn nothing_to_migrate(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Outcome of a backward migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertReport {
    pub identifier: String,
    /// False when the extension carries no version file to revert
    pub has_version_file: bool,
    /// History rows removed by this call
    pub removed: usize,
    /// Ledger version after the call
    pub version: String,
}

/// Applies and reverts versioned migrations for extensions of one kind
pub struct MigrationEngine {
    ledger: MigrationLedger,
    reader: VersionFileReader,
    runner: Box<dyn MigrationRunner>,
}

impl MigrationEngine {
    pub fn new(ledger: MigrationLedger, runner: Box<dyn MigrationRunner>) -> Self {
        Self {
            ledger,
            reader: VersionFileReader::new(),
            runner,
        }
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut MigrationLedger {
        &mut self.ledger
    }

    /// Cached manifest of an extension
    pub fn manifest(&mut self, extension: &Extension) -> Result<Arc<VersionManifest>> {
        self.reader.load(extension)
    }

    pub fn current_version(&mut self, identifier: &str) -> Result<String> {
        self.ledger.get_version(identifier)
    }

    /// Apply every pending version, stopping after `target` when given
    pub fn apply_up_to(&mut self, extension: &Extension, target: Option<&str>) -> Result<ApplyReport> {
        let id = extension.identifier.as_str();

        if !VersionFileReader::has_version_file(extension) {
            tracing::debug!("{} has no version file, nothing to migrate", id);
            return Ok(ApplyReport::empty(id, false));
        }

        let manifest = self.reader.load(extension)?;
        let mut report = ApplyReport::empty(id, true);

        let Some(latest) = manifest.latest() else {
            return Ok(report);
        };

        let current = self.ledger.get_version(id)?;
        if same_version(&current, latest) || target.is_some_and(|t| same_version(&current, t)) {
            tracing::debug!("{} is at {}, nothing to migrate", id, current);
            return Ok(report);
        }

        for entry in manifest.pending_after(&current) {
            if let Some(target) = target {
                if compare_versions(&entry.version, target) == Ordering::Greater {
                    break;
                }
            }

            self.apply_entry(id, &manifest, entry)?;
            report.applied.push(entry.version.clone());
            report.lines.push(display_line(entry));
            tracing::info!("Applied {} {}", id, entry.version);

            if target.is_some_and(|t| same_version(&entry.version, t)) {
                break;
            }
        }

        Ok(report)
    }

    fn apply_entry(&mut self, id: &str, manifest: &VersionManifest, entry: &ManifestEntry) -> Result<()> {
        let version = entry.version.as_str();

        for script in entry.scripts() {
            if self.ledger.has_history(id, version, Some(script))? {
                tracing::debug!("{} {} already ran {}", id, version, script);
                continue;
            }

            self.runner
                .up(&manifest.script_path(script))
                .map_err(|cause| Error::script_execution(id, version, script, "up", cause))?;
            self.ledger
                .append_history(id, HistoryKind::Script, version, script)?;
        }

        if !self.ledger.has_history(id, version, None)? {
            for comment in entry.comments() {
                self.ledger
                    .append_history(id, HistoryKind::Comment, version, comment)?;
            }
        }

        self.ledger.set_version(id, Some(version))
    }

    /// Walk history newest first, reverting units until the stop condition.
    ///
    /// With `stop_at_or_before` the rows of `stop` are reverted too and the
    /// walk ends at the first older version. Without it the walk ends at
    /// the first row of `stop`, leaving that version applied. `None`
    /// reverts everything.
    pub fn revert_to(
        &mut self,
        extension: &Extension,
        stop: Option<&str>,
        stop_at_or_before: bool,
    ) -> Result<RevertReport> {
        let id = extension.identifier.as_str();

        if !VersionFileReader::has_version_file(extension) {
            return Ok(RevertReport {
                identifier: id.to_string(),
                has_version_file: false,
                removed: 0,
                version: self.ledger.get_version(id)?,
            });
        }

        let history = self.ledger.history(id)?;
        let updates_dir = extension.path.join(UPDATES_DIR);

        let mut new_version: Option<String> = None;
        let mut stop_on_next = false;
        let mut removed = 0;

        for row in history.iter().rev() {
            if let Some(stop) = stop {
                let at_stop = same_version(&row.version, stop);
                if (!stop_at_or_before && at_stop) || (stop_on_next && !at_stop) {
                    new_version = Some(row.version.clone());
                    break;
                }
            }

            if row.kind == HistoryKind::Script {
                if let Err(cause) = self.runner.down(&updates_dir.join(&row.detail)) {
                    self.keep_partial_state(id)?;
                    return Err(Error::script_execution(id, &row.version, &row.detail, "down", cause));
                }
            }
            self.ledger.delete_history_entry(row.id)?;
            removed += 1;

            if stop.is_some_and(|s| same_version(&row.version, s)) {
                stop_on_next = true;
            }
        }

        self.ledger.set_version(id, new_version.as_deref())?;
        self.reader.forget(id);

        let version = self.ledger.get_version(id)?;
        tracing::info!("Reverted {} rows of {}, now at {}", removed, id, version);

        Ok(RevertReport {
            identifier: id.to_string(),
            has_version_file: true,
            removed,
            version,
        })
    }

    /// After a failed down-migration, point the ledger at the newest row left
    fn keep_partial_state(&mut self, id: &str) -> Result<()> {
        if let Some(last) = self.ledger.history(id)?.last() {
            self.ledger.set_version(id, Some(&last.version))?;
        }
        Ok(())
    }

    /// Delete orphaned rows of an extension whose files are gone
    pub fn purge(&mut self, identifier: &str) -> Result<bool> {
        self.reader.forget(identifier);
        self.ledger.purge(identifier)
    }

    /// Move the history of `replaced` onto `replacement` when the replacement
    /// accepts the replaced extension's installed version.
    pub fn migrate_replacement(&mut self, replacement: &Extension, replaced: &str) -> Result<bool> {
        let current = self.ledger.get_version(replaced)?;
        if current == UNINSTALLED_VERSION || !replacement.can_replace(replaced, &current) {
            return Ok(false);
        }

        let manifest = self.reader.load(replacement)?;
        let entries = manifest.up_to(&current);
        if entries.is_empty() {
            return Ok(false);
        }

        let code = replacement.identifier.as_str();
        for entry in entries {
            for script in entry.scripts() {
                self.ledger
                    .append_history(code, HistoryKind::Script, &entry.version, script)?;
            }
            for comment in entry.comments() {
                self.ledger
                    .append_history(code, HistoryKind::Comment, &entry.version, comment)?;
            }
        }

        self.ledger.clear_history(replaced)?;
        self.ledger.rename_code(replaced, code)?;
        tracing::info!("Migrated ledger of {} to {}", replaced, code);
        Ok(true)
    }

    /// Last recorded comment of an extension
    pub fn current_note(&self, identifier: &str) -> Result<Option<String>> {
        self.ledger.current_note(identifier)
    }

    /// Drop all cached manifests and versions
    pub fn clear_caches(&mut self) {
        self.reader.clear();
        self.ledger.clear_cache();
    }
}

fn same_version(a: &str, b: &str) -> bool {
    a == b || (a != UNINSTALLED_VERSION && b != UNINSTALLED_VERSION && compare_versions(a, b) == Ordering::Equal)
}

/// `1.0.1:    Adds the posts table`, comment cut for display only
fn display_line(entry: &ManifestEntry) -> String {
    let comment = entry.summary().unwrap_or_default();
    let shown = if comment.chars().count() > DISPLAY_COMMENT_LIMIT {
        let cut: String = comment.chars().take(DISPLAY_COMMENT_LIMIT).collect();
        format!("{}...", cut)
    } else {
        comment.to_string()
    };
    format!("{:<10}{}", format!("{}:", entry.version), shown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockMigrationRunner;
    use crate::types::ExtensionKind;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn extension_with(manifest: &str) -> (Extension, TempDir) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("updates")).unwrap();
        fs::write(temp.path().join("updates/version.yaml"), manifest).unwrap();
        let ext = Extension::new("Acme.Blog", ExtensionKind::Plugin, temp.path());
        (ext, temp)
    }

    fn passing_runner() -> MockMigrationRunner {
        let mut runner = MockMigrationRunner::new();
        runner.expect_up().returning(|_| Ok(()));
        runner.expect_down().returning(|_| Ok(()));
        runner
    }

    fn engine(runner: MockMigrationRunner) -> MigrationEngine {
        MigrationEngine::new(MigrationLedger::in_memory(), Box::new(runner))
    }

    #[test]
    fn test_apply_records_scripts_then_comments() {
        let (ext, _temp) = extension_with("1.0.0:\n  - First version\n  - create.php\n");
        let mut engine = engine(passing_runner());

        let report = engine.apply_up_to(&ext, None).unwrap();
        assert_eq!(report.applied, vec!["1.0.0"]);
        assert_eq!(report.lines, vec!["1.0.0:    First version"]);

        let kinds: Vec<_> = engine.ledger().history("Acme.Blog").unwrap().iter().map(|h| h.kind).collect();
        assert_eq!(kinds, vec![HistoryKind::Script, HistoryKind::Comment]);
        assert_eq!(engine.current_version("Acme.Blog").unwrap(), "1.0.0");
    }

    #[test]
    fn test_script_runs_once() {
        let (ext, _temp) = extension_with("1.0.0: [First, create.php]\n1.0.1: Second\n");
        let mut runner = MockMigrationRunner::new();
        runner
            .expect_up()
            .withf(|p: &Path| p.ends_with("updates/create.php"))
            .times(1)
            .returning(|_| Ok(()));
        let mut engine = engine(runner);

        engine.apply_up_to(&ext, None).unwrap();
        let second = engine.apply_up_to(&ext, None).unwrap();
        assert!(second.nothing_to_migrate());
    }

    #[test]
    fn test_target_stops_early() {
        let (ext, _temp) = extension_with("1.0.0: a\n1.0.1: b\n1.1.0: c\n");
        let mut engine = engine(passing_runner());

        let report = engine.apply_up_to(&ext, Some("1.0.1")).unwrap();
        assert_eq!(report.applied, vec!["1.0.0", "1.0.1"]);
        assert_eq!(engine.current_version("Acme.Blog").unwrap(), "1.0.1");

        assert!(engine.apply_up_to(&ext, Some("1.0.1")).unwrap().nothing_to_migrate());
        assert_eq!(engine.apply_up_to(&ext, None).unwrap().applied, vec!["1.1.0"]);
    }

    #[test]
    fn test_failure_keeps_previous_version() {
        let (ext, _temp) = extension_with("1.0.0: [First, a.php]\n1.0.1: [Second, b.php]\n");
        let mut runner = MockMigrationRunner::new();
        runner
            .expect_up()
            .withf(|p: &Path| p.ends_with("a.php"))
            .returning(|_| Ok(()));
        runner
            .expect_up()
            .withf(|p: &Path| p.ends_with("b.php"))
            .returning(|_| Err(anyhow::anyhow!("duplicate column")));
        let mut engine = engine(runner);

        let err = engine.apply_up_to(&ext, None).unwrap_err();
        match err {
            Error::ScriptExecution { version, script, direction, .. } => {
                assert_eq!(version, "1.0.1");
                assert_eq!(script, "b.php");
                assert_eq!(direction, "up");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(engine.current_version("Acme.Blog").unwrap(), "1.0.0");
        let history = engine.ledger().history("Acme.Blog").unwrap();
        assert!(history.iter().all(|h| h.version == "1.0.0"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_no_version_file() {
        let temp = TempDir::new().unwrap();
        let ext = Extension::new("Acme.Empty", ExtensionKind::Plugin, temp.path());
        let mut engine = engine(MockMigrationRunner::new());

        let report = engine.apply_up_to(&ext, None).unwrap();
        assert!(!report.has_version_file);
        assert!(report.nothing_to_migrate());

        let revert = engine.revert_to(&ext, None, false).unwrap();
        assert!(!revert.has_version_file);
    }

    #[test]
    fn test_unknown_current_version_applies_everything() {
        let (ext, _temp) = extension_with("1.0.0: a\n1.0.1: b\n");
        let mut engine = engine(passing_runner());
        engine.ledger_mut().set_version("Acme.Blog", Some("0.9.0")).unwrap();

        let report = engine.apply_up_to(&ext, None).unwrap();
        assert_eq!(report.applied, vec!["1.0.0", "1.0.1"]);
    }

    #[test]
    fn test_revert_stop_inclusive_and_exclusive() {
        let manifest = "1.0.0: [First, create.php]\n1.1.0: Second\n";

        let (ext, _temp) = extension_with(manifest);
        let mut engine = engine(passing_runner());
        engine.apply_up_to(&ext, None).unwrap();
        assert_eq!(engine.ledger().history("Acme.Blog").unwrap().len(), 3);

        let report = engine.revert_to(&ext, Some("1.0.0"), false).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.version, "1.0.0");

        engine.apply_up_to(&ext, None).unwrap();
        let report = engine.revert_to(&ext, Some("1.0.0"), true).unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(report.version, "0");
        assert!(engine.ledger().record("Acme.Blog").unwrap().is_none());
    }

    #[test]
    fn test_down_failure_keeps_partial_state() {
        let (ext, _temp) = extension_with("1.0.0: [First, a.php]\n1.1.0: [Second, b.php]\n");
        let mut runner = MockMigrationRunner::new();
        runner.expect_up().returning(|_| Ok(()));
        runner
            .expect_down()
            .withf(|p: &Path| p.ends_with("a.php"))
            .returning(|_| Err(anyhow::anyhow!("cannot drop table")));
        runner
            .expect_down()
            .withf(|p: &Path| p.ends_with("b.php"))
            .returning(|_| Ok(()));
        let mut engine = engine(runner);
        engine.apply_up_to(&ext, None).unwrap();

        let err = engine.revert_to(&ext, None, false).unwrap_err();
        assert!(matches!(err, Error::ScriptExecution { direction: "down", .. }));
        assert_eq!(engine.current_version("Acme.Blog").unwrap(), "1.0.0");
    }

    #[test]
    fn test_display_truncates_long_comments() {
        let long = "x".repeat(130);
        let (ext, _temp) = extension_with(&format!("1.0.0: {}\n", long));
        let mut engine = engine(passing_runner());

        let report = engine.apply_up_to(&ext, None).unwrap();
        assert!(report.lines[0].ends_with("..."));
        assert_eq!(report.lines[0].len(), 10 + 120 + 3);
        // storage keeps the full text
        assert_eq!(engine.current_note("Acme.Blog").unwrap(), Some(long));
    }

    #[test]
    fn test_migrate_replacement() {
        let (replacement, _temp) = extension_with("1.0.0: [Imported, create.php]\n1.1.0: Newer\n2.0.0: Newest\n");
        let mut replacement = replacement;
        replacement
            .replaces
            .insert("Legacy.Blog".to_string(), Some(semver::VersionReq::parse("<2.0").unwrap()));

        let mut engine = engine(passing_runner());
        engine.ledger_mut().set_version("Legacy.Blog", Some("1.1.0")).unwrap();
        engine
            .ledger_mut()
            .append_history("Legacy.Blog", HistoryKind::Comment, "1.1.0", "Old")
            .unwrap();

        assert!(engine.migrate_replacement(&replacement, "Legacy.Blog").unwrap());
        assert_eq!(engine.current_version("Acme.Blog").unwrap(), "1.1.0");
        assert!(engine.ledger().history("Legacy.Blog").unwrap().is_empty());

        let versions: Vec<_> = engine
            .ledger()
            .history("Acme.Blog")
            .unwrap()
            .into_iter()
            .map(|h| h.version)
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.0.0", "1.1.0"]);
    }
}
