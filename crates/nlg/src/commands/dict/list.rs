use std::path::PathBuf;

use clap::Args;
use miette::{miette, Result};
use nlg_dict::{tree::MAX_DEPTH, DictArchive, FsSource, NodeId};
use owo_colors::OwoColorize;

#[derive(Args)]
pub struct ListArgs {
    /// An input dictionary file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    #[command(flatten)]
    open: super::OpenArgs,

    /// Stop descending after this many levels
    #[arg(short, long, value_name = "LEVELS")]
    depth: Option<usize>,

    /// Print the raw records of each table instead
    #[arg(long, default_value_t = false)]
    records: bool,
}

impl ListArgs {
    fn print_node(
        &self,
        archive: &mut DictArchive<FsSource>,
        table: usize,
        id: NodeId,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(miette!("table {table} nests deeper than {MAX_DEPTH} levels"));
        }

        let tree = archive.tree(table)?;
        let children = if self.depth.is_some_and(|max| depth >= max) {
            Vec::new()
        } else {
            tree.children(id)?.to_vec()
        };
        let node = tree.node(id)?.clone();

        let mut line = format!("{:indent$}{}", "", node.record.kind.blue(), indent = depth * 2);
        if let Some(header) = node.file_header() {
            line.push_str(&format!(
                " {} ({})",
                archive.display_hash(header.file_path),
                archive.display_hash(header.hash_type).dimmed()
            ));
        }
        if node.is_leaf() {
            line.push_str(&format!(" {} bytes", node.record.size));
        } else {
            line.push_str(&format!(" {} records", node.record.size));
        }
        if node.shared().is_some() {
            line.push_str(&format!(" {}", "shared".yellow()));
        }
        println!("{line}");

        for child in children {
            self.print_node(archive, table, child, depth + 1)?;
        }
        Ok(())
    }

    pub fn handle(&self) -> Result<()> {
        let mut archive = self.open.open(&self.file)?;
        println!(
            "{} {} blocks, {} tables{}",
            archive.version(),
            archive.dictionary().blocks.len(),
            archive.len(),
            if archive.dictionary().compressed {
                ", compressed"
            } else {
                ""
            }
        );

        let tables = archive
            .tables()
            .iter()
            .map(|table| (table.index, table.name(), table.tree.roots().to_vec()))
            .collect::<Vec<_>>();

        for (index, name, roots) in tables {
            println!(
                "table {} {} ({} roots)",
                index,
                archive.display_hash(name).green(),
                roots.len()
            );

            if self.records {
                let mut out = Vec::new();
                archive.tree(index)?.dump(&mut out)?;
                print!("{}", String::from_utf8_lossy(&out));
                continue;
            }

            for root in roots {
                self.print_node(&mut archive, index, root, 1)?;
            }
        }
        Ok(())
    }
}
