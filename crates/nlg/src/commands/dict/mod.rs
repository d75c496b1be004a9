use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use nlg_dict::{
    hash::HashLookup, DictArchive, FsSource, GameVersion, HashNames, OpenOptions,
};
use tracing::debug;

pub mod diff;
pub mod extract;
pub mod list;
pub mod repack;

#[derive(clap::Subcommand)]
pub enum DictCommands {
    /// Compare the tables of two dictionaries
    Diff(diff::DiffArgs),
    /// Extract every entry of a dictionary into a directory
    Extract(extract::ExtractArgs),
    /// Print the tables of a dictionary
    List(list::ListArgs),
    /// Read a dictionary and write it out again
    Repack(repack::RepackArgs),
}

impl DictCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            DictCommands::Diff(diff) => diff.handle(),
            DictCommands::Extract(extract) => extract.handle(),
            DictCommands::List(list) => list.handle(),
            DictCommands::Repack(repack) => repack.handle(),
        }
    }
}

/// How dictionaries are opened
#[derive(Args)]
pub struct OpenArgs {
    /// A file with one name per line, used to show hashes as names
    #[arg(long, value_name = "FILE")]
    strings: Option<PathBuf>,

    /// A hash bin file, used to show hashes as names
    #[arg(long, value_name = "FILE")]
    hashbin: Option<PathBuf>,

    /// The hash bin is big endian
    #[arg(long, default_value_t = false, requires = "hashbin")]
    big_endian: bool,

    /// Read the dictionary as this game instead of detecting it (lm2, lm2hd, lm3, mfed)
    #[arg(short, long, value_name = "GAME")]
    game: Option<GameVersion>,
}

impl OpenArgs {
    fn names(&self) -> Result<HashNames> {
        let mut names = HashNames::new();

        if let Some(strings) = &self.strings {
            let f = File::open(strings)
                .into_diagnostic()
                .context(format!("path: {}", strings.display()))?;
            names.extend_from_lines(BufReader::new(f))?;
        }

        if let Some(hashbin) = &self.hashbin {
            let f = File::open(hashbin)
                .into_diagnostic()
                .context(format!("path: {}", hashbin.display()))?;
            names.read_hashbin(BufReader::new(f), self.big_endian)?;
        }

        debug!(names = names.len(), "loaded names");
        Ok(names)
    }

    pub fn open(&self, path: &Path) -> Result<DictArchive<FsSource>> {
        let names: Arc<dyn HashLookup> = Arc::new(self.names()?);
        let options = OpenOptions::builder()
            .maybe_version(self.game)
            .names(names)
            .build();

        DictArchive::open(path, options).context(format!("opening {}", path.display()))
    }
}
