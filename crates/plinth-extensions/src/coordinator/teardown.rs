//! System-wide teardown across all extension kinds

use super::{ExtensionManager, LifecycleReport, Services};
use crate::types::ExtensionKind;
use plinth_core::Result;
use tracing::info;

/// Modules go first, themes last
pub const TEARDOWN_ORDER: [ExtensionKind; 3] = [
    ExtensionKind::Module,
    ExtensionKind::Plugin,
    ExtensionKind::Theme,
];

/// Tear every manager down in [`TEARDOWN_ORDER`], whatever order they are passed in.
/// Stops at the first failing kind.
pub fn tear_down_system(
    managers: &mut [&mut dyn ExtensionManager],
    services: &mut Services,
) -> Result<LifecycleReport> {
    managers.sort_by_key(|manager| {
        TEARDOWN_ORDER
            .iter()
            .position(|kind| *kind == manager.kind())
            .unwrap_or(TEARDOWN_ORDER.len())
    });

    let mut report = LifecycleReport::default();
    for manager in managers.iter_mut() {
        info!("Tearing down {}", manager.kind().plural());
        report.merge(manager.tear_down(services)?);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MockArchiveExtractor;
    use crate::coordinator::{AvailableUpdate, ExtensionStatus, UninstallOptions};
    use crate::flags::DisableFlag;
    use crate::parameters::ParameterStore;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct Recorder {
        kind: ExtensionKind,
        log: Rc<RefCell<Vec<ExtensionKind>>>,
    }

    impl ExtensionManager for Recorder {
        fn kind(&self) -> ExtensionKind {
            self.kind
        }
        fn list(&mut self, _: bool) -> Result<Vec<ExtensionStatus>> {
            Ok(Vec::new())
        }
        fn install(&mut self, _: &mut Services, _: &str) -> Result<LifecycleReport> {
            Ok(LifecycleReport::default())
        }
        fn enable(&mut self, _: &str, _: DisableFlag) -> Result<()> {
            Ok(())
        }
        fn disable(&mut self, _: &str, _: DisableFlag) -> Result<()> {
            Ok(())
        }
        fn update(&mut self, _: &mut Services, _: Option<&str>, _: bool) -> Result<LifecycleReport> {
            Ok(LifecycleReport::default())
        }
        fn refresh(&mut self, _: &mut Services, _: Option<&str>) -> Result<LifecycleReport> {
            Ok(LifecycleReport::default())
        }
        fn rollback(&mut self, _: Option<&str>, _: Option<&str>) -> Result<LifecycleReport> {
            Ok(LifecycleReport::default())
        }
        fn uninstall(&mut self, _: &mut Services, _: &str, _: UninstallOptions) -> Result<LifecycleReport> {
            Ok(LifecycleReport::default())
        }
        fn tear_down(&mut self, _: &mut Services) -> Result<LifecycleReport> {
            self.log.borrow_mut().push(self.kind);
            Ok(LifecycleReport::default())
        }
        fn available_updates(&self, _: Option<&str>) -> BTreeMap<String, AvailableUpdate> {
            BTreeMap::new()
        }
        fn warnings(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_order_is_fixed() {
        let temp = TempDir::new().unwrap();
        let mut services = Services::new(
            ParameterStore::open(temp.path().join("parameters.json")).unwrap(),
            None,
            Box::new(MockArchiveExtractor::new()),
            temp.path(),
        );

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut theme = Recorder { kind: ExtensionKind::Theme, log: log.clone() };
        let mut plugin = Recorder { kind: ExtensionKind::Plugin, log: log.clone() };
        let mut module = Recorder { kind: ExtensionKind::Module, log: log.clone() };

        let mut managers: [&mut dyn ExtensionManager; 3] = [&mut theme, &mut plugin, &mut module];
        tear_down_system(&mut managers, &mut services).unwrap();
        assert_eq!(*log.borrow(), TEARDOWN_ORDER.to_vec());
    }
}
