pub mod chunk;
pub mod events;
pub mod runner;
pub mod transport;

pub use chunk::split_message;
pub use events::{EventContext, HandlerError, InboundMessage, InboundMessageService};
pub use runner::{BatchReport, PollPolicy, PollingRunner};
pub use transport::{HttpGatewayTransport, MessagingTransport, TransportError};
