//! Extension management commands
//!
//! - install / create: put an extension in place and apply its migrations
//! - enable / disable / freeze / unfreeze: per-extension switches
//! - remove: roll back and delete
//! - list: extensions with their ledger version and flags
//! - update / rollback / refresh: migrations, across kinds or for one extension
//! - check: number of available updates

use anyhow::Result;
use camino::Utf8Path;
use dialoguer::Confirm;
use plinth_extensions::{
    DisableFlag, ExtensionKind, ExtensionManager, ExtensionSource, ExtensionSystem, UninstallOptions,
};

use super::{fail_on, open_system, print_report, show_report};
use crate::cli::{
    ExtensionCheckArgs, ExtensionCommands, ExtensionCreateArgs, ExtensionIdArgs, ExtensionInstallArgs,
    ExtensionListArgs, ExtensionRefreshArgs, ExtensionRemoveArgs, ExtensionRollbackArgs,
    ExtensionUpdateArgs, KindArg,
};
use crate::output;

/// Update order: modules first, themes last
const UPDATE_ORDER: [ExtensionKind; 3] = [ExtensionKind::Module, ExtensionKind::Plugin, ExtensionKind::Theme];

/// Rollback order: the reverse of the update order
const ROLLBACK_ORDER: [ExtensionKind; 3] = [ExtensionKind::Theme, ExtensionKind::Plugin, ExtensionKind::Module];

/// Main entry point for extension subcommands
pub fn run(cmd: ExtensionCommands, config: Option<&Utf8Path>) -> Result<()> {
    let mut system = open_system(config)?;

    match cmd {
        ExtensionCommands::Install(args) => install(&mut system, args),
        ExtensionCommands::Create(args) => create(&mut system, args),
        ExtensionCommands::Enable(args) => toggle(&mut system, args, false),
        ExtensionCommands::Disable(args) => toggle(&mut system, args, true),
        ExtensionCommands::Remove(args) => remove(&mut system, args),
        ExtensionCommands::List(args) => list(&mut system, args),
        ExtensionCommands::Update(args) => update(&mut system, args),
        ExtensionCommands::Rollback(args) => rollback(&mut system, args),
        ExtensionCommands::Refresh(args) => refresh(&mut system, args),
        ExtensionCommands::Freeze(args) => freeze(&mut system, args, true),
        ExtensionCommands::Unfreeze(args) => freeze(&mut system, args, false),
        ExtensionCommands::Check(args) => check(&mut system, args),
    }
}

/// Kinds a command covers: the requested one, the kind owning `id`, or all of `order`
fn target_kinds(
    system: &ExtensionSystem,
    id: Option<&str>,
    kind: Option<KindArg>,
    order: [ExtensionKind; 3],
) -> Result<Vec<ExtensionKind>> {
    Ok(match (kind, id) {
        (Some(kind), _) => vec![kind.into()],
        (None, Some(id)) => vec![system.find(id)?],
        (None, None) => order.to_vec(),
    })
}

fn install(system: &mut ExtensionSystem, args: ExtensionInstallArgs) -> Result<()> {
    let kind: ExtensionKind = args.kind.into();
    let (coordinator, services) = system.split(kind);

    let mut source = match &args.path {
        Some(path) => ExtensionSource::local(kind, coordinator.root(), path.as_std_path())?,
        None if coordinator.get(&args.id).is_some() || kind == ExtensionKind::Module => {
            // files are in place already
            print_report(&coordinator.install(services, &args.id)?)?;
            output::success(&format!("{}: installed.", args.id));
            return Ok(());
        }
        None => ExtensionSource::market(kind, args.id.as_str())?,
    };

    let extension = source.install(coordinator, services)?;
    output::success(&format!("{}: installed.", extension.identifier));
    Ok(())
}

fn create(system: &mut ExtensionSystem, args: ExtensionCreateArgs) -> Result<()> {
    let (coordinator, services) = system.split(args.kind.into());
    let extension = coordinator.create(services, &args.id)?;

    output::success(&format!("{}: created.", extension.identifier));
    output::dim(&extension.path.display().to_string());
    Ok(())
}

fn toggle(system: &mut ExtensionSystem, args: ExtensionIdArgs, disable: bool) -> Result<()> {
    let kind = system.find(&args.id)?;
    let (coordinator, _) = system.split(kind);
    let code = coordinator.resolve(&args.id)?;

    if disable {
        coordinator.disable(&code, DisableFlag::ByUser)?;
        output::success(&format!("{}: disabled.", code));
    } else {
        coordinator.enable(&code, DisableFlag::ByUser)?;
        output::success(&format!("{}: enabled.", code));
    }
    Ok(())
}

fn remove(system: &mut ExtensionSystem, args: ExtensionRemoveArgs) -> Result<()> {
    // with its files gone only the plugin ledger can still know the identifier
    let kind = system.find(&args.id).unwrap_or(ExtensionKind::Plugin);

    if !args.force {
        let prompt = if args.no_rollback {
            format!("Delete the files of {}?", args.id)
        } else {
            format!("Revert the migrations of {} and delete its files?", args.id)
        };
        let confirmed = Confirm::new().with_prompt(prompt).default(false).interact()?;

        if !confirmed {
            output::info("Cancelled");
            std::process::exit(1);
        }
    }

    let (coordinator, services) = system.split(kind);
    let options = UninstallOptions {
        no_rollback: args.no_rollback,
        preserve_files: false,
    };
    print_report(&coordinator.uninstall(services, &args.id, options)?)?;

    output::success(&format!("{}: removed.", args.id));
    Ok(())
}

fn list(system: &mut ExtensionSystem, args: ExtensionListArgs) -> Result<()> {
    let kinds = target_kinds(system, None, args.kind, UPDATE_ORDER)?;

    for kind in kinds {
        let (coordinator, _) = system.split(kind);
        let statuses = coordinator.list(args.all)?;

        output::header(&format!("{} ({})", kind.plural(), statuses.len()));
        for status in &statuses {
            let mut flags: Vec<String> = status.flags.iter().map(|f| f.to_string()).collect();
            if status.is_frozen {
                flags.push("frozen".to_string());
            }
            output::extension_row(&status.identifier, &status.version, &flags);
        }

        for warning in coordinator.warnings() {
            output::warning(&warning);
        }
    }
    Ok(())
}

fn update(system: &mut ExtensionSystem, args: ExtensionUpdateArgs) -> Result<()> {
    let kinds = target_kinds(system, args.id.as_deref(), args.kind, UPDATE_ORDER)?;

    if !args.migrations_only && kinds.contains(&ExtensionKind::Plugin) {
        match system.request_updates(false) {
            Ok(list) if list.has_updates => {
                output::info(&format!("{} update(s) available", list.count));
            }
            Ok(_) => {}
            Err(e) => output::warning(&format!("Update check failed: {}", e)),
        }
    }

    let mut failures = 0;
    for kind in kinds {
        let (coordinator, services) = system.split(kind);
        let report = coordinator.update(services, args.id.as_deref(), args.migrations_only)?;
        failures += show_report(&report);
    }
    fail_on(failures)?;

    output::success("Extensions are up to date");
    Ok(())
}

fn rollback(system: &mut ExtensionSystem, args: ExtensionRollbackArgs) -> Result<()> {
    let kinds = target_kinds(system, args.id.as_deref(), args.kind, ROLLBACK_ORDER)?;

    let mut failures = 0;
    for kind in kinds {
        let (coordinator, _) = system.split(kind);
        let report = coordinator.rollback(args.id.as_deref(), args.target.as_deref())?;
        failures += show_report(&report);
    }
    fail_on(failures)
}

fn refresh(system: &mut ExtensionSystem, args: ExtensionRefreshArgs) -> Result<()> {
    let kinds = target_kinds(system, args.id.as_deref(), args.kind, UPDATE_ORDER)?;

    let mut failures = 0;
    for kind in kinds {
        let (coordinator, services) = system.split(kind);
        let report = coordinator.refresh(services, args.id.as_deref())?;
        failures += show_report(&report);
    }
    fail_on(failures)
}

fn freeze(system: &mut ExtensionSystem, args: ExtensionIdArgs, frozen: bool) -> Result<()> {
    let kind = system.find(&args.id)?;
    let (coordinator, _) = system.split(kind);
    let code = coordinator.resolve(&args.id)?;

    if frozen {
        coordinator.freeze(&code)?;
        output::success(&format!("{}: frozen.", code));
    } else {
        coordinator.unfreeze(&code)?;
        output::success(&format!("{}: unfrozen.", code));
    }
    Ok(())
}

fn check(system: &mut ExtensionSystem, args: ExtensionCheckArgs) -> Result<()> {
    match system.check_updates(args.force)? {
        0 => output::info("No updates available"),
        count => output::success(&format!("{} update(s) available", count)),
    }
    Ok(())
}
