//! RPC plumbing for the connection manager.
//!
//! [`wire`] defines the byte-level contract: method names, call parameters,
//! reply payloads, and the request envelope. [`handler`] owns dispatch:
//! method registration, pending-request continuations, and the tagged
//! sender identity delivered with every inbound message.

pub mod handler;
pub mod wire;

pub use handler::{Responder, RpcHandler, RpcInbound, RpcSender};
pub use wire::{
    CallParams, Envelope, ReplyPayload, METHOD_CLOSE, METHOD_CONNECT, METHOD_DISCONNECT,
    METHOD_INQUIRE,
};
