//! I/O behind traits: the remote HTTP client, local storage, the client
//! response channel, and the transfer loop tying them together.

pub mod buffer;
pub mod client;
pub mod handler;
pub mod http;
pub mod state;
pub mod storage;
pub mod transfer;

pub use self::client::{ChannelResponder, ClientChannel, ResponseEvent};
pub use self::handler::{TpcHandler, TransferIds};
pub use self::http::{BoxStream, ConnectionObserver, PushBody, RemoteClient, RemoteHead, RemoteResponse};
pub use self::state::{StreamProgress, TransferState};
pub use self::storage::{FsFile, FsStorage, LocalFile, OpenError, OpenMode, OpenOutcome, OpenRequest, Storage};

#[cfg(feature = "reqwest")]
pub use self::http::ReqwestClient;
