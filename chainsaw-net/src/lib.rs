// chainsaw-net - socket receivers for chainsaw
//
// Line-oriented TCP (connect and listen), UDP and multicast sources. Each open
// source runs its socket I/O on a background thread with a tokio runtime.

mod error;
mod socket;

pub use error::NetError;
pub use socket::{SocketKind, SocketSource};
