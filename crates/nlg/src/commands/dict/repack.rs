use std::path::PathBuf;

use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use nlg_dict::{write::DictWriterOptions, DictWriter};
use tracing::info;

#[derive(Args)]
pub struct RepackArgs {
    /// An input dictionary file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    #[command(flatten)]
    open: super::OpenArgs,

    /// The dictionary file to create, data files are written next to it
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Store every block zlib compressed
    #[arg(long, default_value_t = false, conflicts_with = "decompress")]
    compress: bool,

    /// Store every block uncompressed
    #[arg(long, default_value_t = false)]
    decompress: bool,

    /// Keep separate copies of region entries that match the global table
    #[arg(long, default_value_t = false)]
    no_dedupe: bool,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl RepackArgs {
    pub fn handle(&self) -> Result<()> {
        if !self.overwrite && self.output.exists() {
            return Err(miette!("{} already exists", self.output.display()));
        }

        let mut archive = self.open.open(&self.file)?;

        let compress = match (self.compress, self.decompress) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let writer = DictWriter::new(
            DictWriterOptions::builder()
                .maybe_compress(compress)
                .dedupe(!self.no_dedupe)
                .build(),
        );
        let written = writer
            .write(&mut archive)
            .context(format!("repacking {}", self.file.display()))?;

        if let Some(parent) = self.output.parent() {
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .context(format!("creating {}", parent.display()))?;
        }
        written
            .save(&self.output)
            .context(format!("saving {}", self.output.display()))?;

        info!(
            files = written.files.len(),
            "wrote {}",
            self.output.display()
        );
        Ok(())
    }
}
