//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use plinth_extensions::ExtensionKind;

/// Plinth - manage plugins, themes and modules
#[derive(Parser, Debug)]
#[command(name = "plinth")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to plinth.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extension management
    #[command(subcommand)]
    Extension(ExtensionCommands),

    /// Uninstall every extension and drop all ledgers
    Teardown(TeardownArgs),
}

/// Extension kind as accepted on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    Plugin,
    Theme,
    Module,
}

impl From<KindArg> for ExtensionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Plugin => ExtensionKind::Plugin,
            KindArg::Theme => ExtensionKind::Theme,
            KindArg::Module => ExtensionKind::Module,
        }
    }
}

// Extension commands
#[derive(Subcommand, Debug)]
pub enum ExtensionCommands {
    /// Install an extension from disk, the catalog, or already unpacked files
    Install(ExtensionInstallArgs),

    /// Scaffold a new plugin or theme
    Create(ExtensionCreateArgs),

    /// Enable an extension disabled by the user
    Enable(ExtensionIdArgs),

    /// Disable an extension
    Disable(ExtensionIdArgs),

    /// Roll back and remove an extension
    Remove(ExtensionRemoveArgs),

    /// List extensions
    List(ExtensionListArgs),

    /// Apply pending migrations and remote updates
    Update(ExtensionUpdateArgs),

    /// Revert migrations
    Rollback(ExtensionRollbackArgs),

    /// Roll back and re-apply migrations
    Refresh(ExtensionRefreshArgs),

    /// Skip remote updates for a plugin
    Freeze(ExtensionIdArgs),

    /// Allow remote updates for a plugin again
    Unfreeze(ExtensionIdArgs),

    /// Show the number of available updates
    Check(ExtensionCheckArgs),
}

#[derive(Args, Debug)]
pub struct ExtensionIdArgs {
    /// Extension identifier (e.g. Acme.Blog)
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ExtensionInstallArgs {
    /// Extension identifier (e.g. Acme.Blog)
    pub id: String,

    /// Extension kind
    #[arg(short, long, value_enum, default_value = "plugin")]
    pub kind: KindArg,

    /// Copy the extension from this directory instead of the catalog
    #[arg(long)]
    pub path: Option<Utf8PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExtensionCreateArgs {
    /// Identifier of the new extension (Vendor.Name for plugins)
    pub id: String,

    /// Extension kind
    #[arg(short, long, value_enum, default_value = "plugin")]
    pub kind: KindArg,
}

#[derive(Args, Debug)]
pub struct ExtensionRemoveArgs {
    /// Extension identifier
    pub id: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,

    /// Delete files without reverting migrations
    #[arg(long)]
    pub no_rollback: bool,
}

#[derive(Args, Debug)]
pub struct ExtensionListArgs {
    /// Only list this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Include disabled extensions
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct ExtensionUpdateArgs {
    /// Extension identifier (default: all)
    pub id: Option<String>,

    /// Only this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Apply local migrations without downloading new versions
    #[arg(long)]
    pub migrations_only: bool,
}

#[derive(Args, Debug)]
pub struct ExtensionRollbackArgs {
    /// Extension identifier (default: all)
    pub id: Option<String>,

    /// Only this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Version to roll back to (exclusive)
    #[arg(short, long, requires = "id")]
    pub target: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExtensionRefreshArgs {
    /// Extension identifier (default: all)
    pub id: Option<String>,

    /// Only this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,
}

#[derive(Args, Debug)]
pub struct ExtensionCheckArgs {
    /// Ask the catalog even when a retry is pending
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct TeardownArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}
