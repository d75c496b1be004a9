use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use tracing::{info, warn};

#[derive(Args)]
pub struct ExtractArgs {
    /// An input dictionary file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    #[command(flatten)]
    open: super::OpenArgs,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    fn create(&self, path: &Path) -> Result<BufWriter<File>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .context(format!("creating {}", parent.display()))?;
        }

        let out = if !self.overwrite {
            File::create_new(path)
                .into_diagnostic()
                .context(format!("creating {}", path.display()))?
        } else {
            File::create(path)
                .into_diagnostic()
                .context(format!("creating {}", path.display()))?
        };
        Ok(BufWriter::new(out))
    }

    pub fn handle(&self) -> Result<()> {
        let mut archive = self.open.open(&self.file)?;

        let tables = archive
            .tables()
            .iter()
            .map(|table| (table.index, table.name(), table.tree.roots().to_vec()))
            .collect::<Vec<_>>();

        let mut written = 0;
        for (index, name, roots) in tables {
            let table_dir = self.directory.join(archive.display_hash(name));

            for (position, root) in roots.into_iter().enumerate() {
                let node = archive.tree(index)?.node(root)?.clone();
                let (source, target) = archive.resolve(index, root)?;

                let path = match node.file_header() {
                    Some(header) => table_dir
                        .join(archive.display_hash(header.hash_type))
                        .join(format!("{}.nlg", archive.display_hash(header.file_path))),
                    None => table_dir
                        .join("loose")
                        .join(format!("{position:04}_{}.bin", node.record.kind)),
                };
                info!("writing {}", path.display());

                let mut out = self.create(&path)?;
                let tree = archive.tree(source)?;
                let exported = if node.is_file() {
                    tree.export_nlg(target, &mut out)
                } else {
                    tree.export_raw(target, &mut out)
                };
                if let Err(e) = exported {
                    warn!(table = index, position, error = %e, "unable to export entry");
                    continue;
                }
                out.flush()
                    .into_diagnostic()
                    .context(format!("writing {}", path.display()))?;
                written += 1;
            }
        }

        info!(entries = written, "extracted {}", self.file.display());
        Ok(())
    }
}
