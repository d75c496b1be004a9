//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file is an invalid dictionary
    #[error("file is an invalid dictionary")]
    InvalidDictionary,

    /// the dictionary layout is not supported
    #[error("unsupported dictionary layout: {0}")]
    #[diagnostic(help("pass the game version explicitly if the probe guessed wrong"))]
    UnsupportedVersion(String),

    /// a block references an extension string that does not exist
    #[error("block {block} references missing extension string {index}")]
    MissingExtension { block: usize, index: usize },

    /// a block index is past the end of the block list
    #[error("block {0} does not exist")]
    BlockOutOfRange(usize),

    /// the root records of a table run past the end of its stream
    #[error("table {index} declares {sections} sections but its stream is too short")]
    TableOverrun { index: usize, sections: usize },

    /// a table index is past the end of the table list
    #[error("table {0} does not exist")]
    TableNotFound(usize),

    /// a chunk selects a block slot the table does not map
    #[error("block slot {0} is not mapped by this table")]
    UnmappedBlockSlot(usize),

    /// a counter does not fit in the header field of this version
    #[error("{field} of {value} does not fit in a {version} dictionary")]
    CountOverflow {
        field: &'static str,
        value: usize,
        version: crate::version::GameVersion,
    },

    /// a node handle does not belong to this tree
    #[error("node {0} does not exist")]
    NodeNotFound(usize),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
