pub mod command;
pub mod loopback;
pub mod traits;

pub use command::{CommandId, Completion, CompletionStatus, IdentifyCns, NvmeCommand};
pub use loopback::{LoopbackBehavior, LoopbackFabric, LoopbackStats, LOOPBACK_ADMIN_DEPTH};
pub use traits::{
    FabricConnector, FabricController, HandshakeParams, LocalBinding, QueuePair, SubmitError,
    TransportFailure, TransportKind,
};
