//! Code related to the bundled example data sets and the CLI commands for interacting with them.
use super::{RunOpts, handle_run_command};
use crate::output::OUTPUT_DIRECTORY_ROOT;
use crate::settings::Settings;
use crate::strategy::StrategyKind;
use anyhow::{Context, Result, bail, ensure};
use clap::Subcommand;
use include_dir::{Dir, DirEntry, include_dir};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The directory containing the example data sets.
const EXAMPLES_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/demos");

/// The name of the price file in each example
const EXAMPLE_DATA_FILE_NAME: &str = "prices.csv";

/// The available subcommands for managing examples.
#[derive(Subcommand)]
pub enum ExampleSubcommands {
    /// List available examples.
    List,
    /// Provide information about the specified example.
    Info {
        /// The name of the example.
        name: String,
    },
    /// Extract an example to a new directory.
    Extract {
        /// The name of the example to extract.
        name: String,
        /// The destination folder for the example.
        new_path: Option<PathBuf>,
    },
    /// Run an example.
    Run {
        /// The name of the example to run.
        name: String,
        /// The strategy to simulate
        #[arg(short, long, default_value = "Linear-Programming")]
        strategy: StrategyKind,
        /// Directory for output files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Whether to replace output files left by a previous run of the same strategy
        #[arg(long)]
        overwrite: bool,
    },
}

impl ExampleSubcommands {
    /// Execute the supplied example subcommand
    pub fn execute(self) -> Result<()> {
        match self {
            Self::List => handle_example_list_command(),
            Self::Info { name } => handle_example_info_command(&name)?,
            Self::Extract {
                name,
                new_path: dest,
            } => handle_example_extract_command(&name, dest.as_deref())?,
            Self::Run {
                name,
                strategy,
                output_dir,
                overwrite,
            } => {
                let opts = RunOpts {
                    strategy,
                    model: None,
                    output_dir,
                    overwrite,
                    no_simulate: false,
                };
                handle_example_run_command(&name, opts, None)?;
            }
        }

        Ok(())
    }
}

/// Names of the bundled examples
pub fn example_names() -> impl Iterator<Item = String> {
    EXAMPLES_DIR
        .dirs()
        .filter_map(|dir| dir.path().file_name())
        .map(|name| name.to_string_lossy().into_owned())
}

/// Handle the `example list` command.
fn handle_example_list_command() {
    for name in example_names() {
        println!("{name}");
    }
}

/// Handle the `example info` command.
fn handle_example_info_command(name: &str) -> Result<()> {
    let path: PathBuf = [name, "README.txt"].iter().collect();
    let readme = EXAMPLES_DIR
        .get_file(path)
        .context("Example not found.")?
        .contents_utf8()
        .context("README.txt is not UTF-8 encoded")?;

    println!("{readme}");

    Ok(())
}

/// Handle the `example extract` command
fn handle_example_extract_command(name: &str, dest: Option<&Path>) -> Result<()> {
    let dest = dest.unwrap_or(Path::new(name));
    extract_example(name, dest)
}

/// Extract the specified example to a new directory
pub fn extract_example(name: &str, new_path: &Path) -> Result<()> {
    // Find the subdirectory in EXAMPLES_DIR whose name matches `name`.
    let sub_dir = EXAMPLES_DIR.get_dir(name).context("Example not found.")?;

    ensure!(
        !new_path.exists(),
        "Destination directory {} already exists",
        new_path.display()
    );

    // Copy the contents of the subdirectory to the destination
    fs::create_dir(new_path)?;
    for entry in sub_dir.entries() {
        match entry {
            DirEntry::Dir(_) => bail!("Subdirectories in examples not supported"),
            DirEntry::File(f) => {
                let file_name = f
                    .path()
                    .file_name()
                    .context("Example file has no name")?;
                fs::write(new_path.join(file_name), f.contents())?;
            }
        }
    }

    Ok(())
}

/// Handle the `example run` command.
///
/// The example is extracted to a temporary folder. Unless another folder is given, results are
/// written to a folder named after the example.
pub fn handle_example_run_command(
    name: &str,
    mut opts: RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let temp_dir = TempDir::new().context("Failed to create temporary directory.")?;
    let example_path = temp_dir.path().join(name);
    extract_example(name, &example_path)?;

    if opts.output_dir.is_none() {
        opts.output_dir = Some([OUTPUT_DIRECTORY_ROOT, name].iter().collect());
    }
    handle_run_command(
        &example_path.join(EXAMPLE_DATA_FILE_NAME),
        &opts,
        settings,
    )?;

    Ok(())
}
