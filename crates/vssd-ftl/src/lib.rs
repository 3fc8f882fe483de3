//! Page-mapped flash translation layer for the virtual SSD.
//!
//! The crate translates host logical block addresses to physical pages on
//! the NAND model in `vssd-nand`, paces writes against garbage collection,
//! and hands the NVMe dispatcher a deterministic completion timestamp per
//! command. See [`Namespace::process_io`] for the ingress contract.

mod config;
mod error;
mod flash;
mod ftl;
mod gc;
mod line;
mod map;
mod namespace;

pub use config::FtlConfig;
pub use error::FtlError;
pub use ftl::ConvFtl;
pub use namespace::{
    CmdStatus, IoCompletion, IoRequest, Namespace, Writeback, NVME_CMD_FLUSH, NVME_CMD_READ,
    NVME_CMD_WRITE,
};
