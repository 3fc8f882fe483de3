use thiserror::Error;

use vssd_nand::NandError;

#[derive(Debug, Error)]
pub enum FtlError {
    /// The shared write buffer cannot admit the command right now. Not
    /// fatal: the dispatcher retries on its next tick, after outstanding
    /// writebacks have released their reservations.
    #[error("write buffer exhausted; retry after the next writeback")]
    WriteBufferFull,

    /// The free-line list is empty. Write flow control exists to make this
    /// unreachable; hitting it means the partition's invariants are gone.
    #[error("no free line available for allocation")]
    NoFreeLines,

    /// GC was required but no line has an invalid page to reclaim. The
    /// partition cannot make forward progress and must be abandoned.
    #[error("garbage collection cannot free a line: no victim with invalid pages")]
    GcCannotFree,

    #[error(transparent)]
    Nand(#[from] NandError),
}
