//! Connection Layer
//!
//! Accepted sockets are handed to [`handle_connection`], which runs one
//! async task per client: read bytes into the frame parser, dispatch
//! every complete request, batch the responses, write them back. The
//! task is the connection's registry entry: when it returns, the socket
//! drops and the connection is gone.
//!
//! Inbound and outbound buffering is capped (1 MiB unframed input,
//! 16 MiB of pending responses before reads pause); see the handler
//! module for the exact behavior at each limit.

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, MAX_READ_BUFFER,
    WRITE_HIGH_WATER,
};
