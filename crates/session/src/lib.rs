// tandem-session: the collaborative editing session engine.
//
// A `Workspace` joins the document's presence channel and keeps every
// connected session's view converged: presence bookkeeping, advisory
// field locks, debounced value/metadata propagation, and join-time state
// rendezvous. The pub/sub transport, the authoritative value store, and
// all UI are ports supplied by the embedder (see `ports`).

pub mod config;
pub mod lock;
pub mod memory;
pub mod meta;
pub mod ports;
pub mod presence;
pub mod rendezvous;
pub mod sync;
pub mod transport;
pub mod workspace;
