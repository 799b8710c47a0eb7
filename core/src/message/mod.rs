// Message module — packet types, protocol literals and the packet codec

pub mod codec;
pub mod protocol;
pub mod types;

pub use codec::PacketCodec;
pub use types::{HandshakeRequest, Packet, PacketError, EPOCH_TASKS_SINCE, MAX_DATAGRAM_SIZE};
