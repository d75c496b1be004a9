use std::{collections::BTreeSet, fmt::Display, path::PathBuf};

use clap::{Args, ValueEnum};
use itertools::Itertools;
use miette::Result;
use nlg_dict::{DictArchive, FsSource};
use owo_colors::OwoColorize;
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Mode {
    /// Count the changed records of each table
    #[default]
    Summary,
    /// Show every changed record
    Full,
}

#[derive(Debug, Eq, PartialEq)]
enum Change {
    Added(String),
    Removed(String),
    Comparison(String, String, String),
    Modified(String, Vec<String>),
}

impl Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::Added(v) => writeln!(f, "✅ {}", v.green()),
            Change::Removed(v) => writeln!(f, "❌ {}", v.red()),
            Change::Comparison(key, old, new) => {
                writeln!(f, "* {}: {} vs {}", key, old.red(), new.green())
            }
            Change::Modified(v, lines) => {
                writeln!(f, "🔃 {}", v.blue())?;
                if !lines.is_empty() {
                    writeln!(f, "{}", lines.iter().map(|l| format!("  {l}")).join("\n"))?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Args)]
pub struct DiffArgs {
    /// An input dictionary file
    #[arg(short, long, value_name = "FILE")]
    left: PathBuf,

    /// An input dictionary file
    #[arg(short, long, value_name = "FILE")]
    right: PathBuf,

    #[command(flatten)]
    open: super::OpenArgs,

    /// Comparison mode
    #[arg(short, long, value_enum, default_value_t = Mode::Summary)]
    mode: Mode,
}

impl DiffArgs {
    fn dump(archive: &mut DictArchive<FsSource>, index: usize) -> Result<String> {
        let mut out = Vec::new();
        archive.tree(index)?.dump(&mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn handle_dictionary(
        &self,
        left: &DictArchive<FsSource>,
        right: &DictArchive<FsSource>,
    ) -> Vec<Change> {
        let (l, r) = (left.dictionary(), right.dictionary());
        [
            ("version", l.version.to_string(), r.version.to_string()),
            ("compressed", l.compressed.to_string(), r.compressed.to_string()),
            ("blocks", l.blocks.len().to_string(), r.blocks.len().to_string()),
            ("tables", left.len().to_string(), right.len().to_string()),
        ]
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(key, old, new)| Change::Comparison(key.into(), old, new))
        .collect()
    }

    fn handle_table(&self, name: String, left: &str, right: &str) -> Option<Change> {
        let diff = TextDiff::from_lines(left, right);
        if diff.ratio() >= 1.0 {
            return None;
        }

        let mut lines = Vec::new();
        match self.mode {
            Mode::Summary => {
                let (added, removed) = diff.iter_all_changes().fold((0, 0), |(a, r), change| {
                    match change.tag() {
                        ChangeTag::Insert => (a + 1, r),
                        ChangeTag::Delete => (a, r + 1),
                        ChangeTag::Equal => (a, r),
                    }
                });
                lines.push(format!(
                    "{} records added, {} records removed",
                    added.green(),
                    removed.red()
                ));
            }
            Mode::Full => {
                for change in diff.iter_all_changes() {
                    let value = change.value().trim_end();
                    match change.tag() {
                        ChangeTag::Insert => lines.push(format!("+ {}", value.green())),
                        ChangeTag::Delete => lines.push(format!("- {}", value.red())),
                        ChangeTag::Equal => {}
                    }
                }
            }
        }
        Some(Change::Modified(name, lines))
    }

    pub fn handle(&self) -> Result<()> {
        let mut left = self.open.open(&self.left)?;
        let mut right = self.open.open(&self.right)?;

        let mut changes = self.handle_dictionary(&left, &right);

        let indices = left
            .tables()
            .iter()
            .chain(right.tables())
            .map(|table| table.index)
            .collect::<BTreeSet<_>>();

        for index in indices {
            let name = match (left.table(index), right.table(index)) {
                (Some(table), _) => left.display_hash(table.name()),
                (None, Some(table)) => right.display_hash(table.name()),
                (None, None) => continue,
            };
            let label = format!("table {index} {name}");

            match (left.table(index).is_some(), right.table(index).is_some()) {
                (true, true) => {
                    let old = Self::dump(&mut left, index)?;
                    let new = Self::dump(&mut right, index)?;
                    changes.extend(self.handle_table(label, &old, &new));
                }
                (false, _) => changes.push(Change::Added(label)),
                (_, false) => changes.push(Change::Removed(label)),
            }
        }

        if changes.is_empty() {
            println!("no differences");
        }
        for change in changes {
            print!("{}", change);
        }
        Ok(())
    }
}
