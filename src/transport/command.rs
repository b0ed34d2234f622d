//! Commands and completions carried over a queue pair
//!
//! Only the commands this layer issues are modelled; encoding them onto the
//! wire is the transport's business.

use bytes::Bytes;

/// Command identifier assigned by a queue pair
pub type CommandId = u16;

/// Identify controller or namespace structure (CNS)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdentifyCns {
    Namespace = 0x00,
    Controller = 0x01,
}

/// A command submitted on an admin or I/O queue pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NvmeCommand {
    /// Zero-payload liveness command (admin)
    KeepAlive,
    /// Identify (admin); `nsid` is 0 for controller identify
    Identify { cns: IdentifyCns, nsid: u32 },
    /// Read `nlb` blocks starting at `slba` (I/O)
    Read { nsid: u32, slba: u64, nlb: u32 },
    /// Write `data` to `nlb` blocks starting at `slba` (I/O)
    Write {
        nsid: u32,
        slba: u64,
        nlb: u32,
        data: Bytes,
    },
}

impl NvmeCommand {
    /// Opcode on the wire
    pub fn opcode(&self) -> u8 {
        match self {
            NvmeCommand::KeepAlive => 0x18,
            NvmeCommand::Identify { .. } => 0x06,
            NvmeCommand::Read { .. } => 0x02,
            NvmeCommand::Write { .. } => 0x01,
        }
    }

    /// Whether the command belongs on the admin queue
    pub fn is_admin(&self) -> bool {
        matches!(self, NvmeCommand::KeepAlive | NvmeCommand::Identify { .. })
    }
}

/// Completion status field (status code type in the high byte, status code in the low byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionStatus(pub u16);

impl CompletionStatus {
    pub const SUCCESS: CompletionStatus = CompletionStatus(0x0000);
    pub const INVALID_FIELD: CompletionStatus = CompletionStatus(0x0002);
    pub const INVALID_NAMESPACE: CompletionStatus = CompletionStatus(0x000B);
    pub const LBA_OUT_OF_RANGE: CompletionStatus = CompletionStatus(0x0080);
    /// Media and data integrity errors: unrecovered read error
    pub const UNRECOVERED_READ: CompletionStatus = CompletionStatus(0x0281);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// Status code type
    pub fn sct(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Status code
    pub fn sc(&self) -> u8 {
        self.0 as u8
    }
}

/// A completion reaped from a queue pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub cid: CommandId,
    pub status: CompletionStatus,
    /// Data returned by reads and identify
    pub data: Option<Bytes>,
}

impl Completion {
    pub fn success(cid: CommandId, data: Option<Bytes>) -> Self {
        Self {
            cid,
            status: CompletionStatus::SUCCESS,
            data,
        }
    }

    pub fn failed(cid: CommandId, status: CompletionStatus) -> Self {
        Self {
            cid,
            status,
            data: None,
        }
    }
}
