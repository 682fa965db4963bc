pub mod attr;
pub mod errors;
pub mod message;

pub use attr::{
    AddressAttribute, AttrType, ChangeRequestAttribute, decode_address, decode_change_request,
    encode_address, encode_change_request,
};
pub use errors::CodecError;
pub use message::{Message, MessageClass, MessageType, TransactionId};
