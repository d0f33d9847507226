//! # Isowire
//!
//! The data model that crosses a worker boundary.
//!
//! Workers share no memory. Everything a call carries is either plain data
//! (`Value`) that is moved across the channel, a binary buffer that is handed
//! over without copying, or a domain object that a `Marshaller` first turns
//! into a tagged plain map and rebuilds on the far side.

pub mod body;
pub mod marshal;
pub mod message;
pub mod transfer;
pub mod value;

pub use marshal::MarshalError;
pub use marshal::MarshalRegistry;
pub use marshal::Marshaller;
pub use message::CallMessage;
pub use message::Envelope;
pub use message::Message;
pub use message::ResultMessage;
pub use message::Route;
pub use transfer::find_transferables;
pub use value::ErrorValue;
pub use value::Object;
pub use value::Value;
