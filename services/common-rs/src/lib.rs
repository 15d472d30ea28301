//! Shared contract code for the data-plane services.
//!
//! The edge service, the click-log writer, and the scheduler all compile
//! against this one definition of the queue event schema and the derivation
//! algorithms (click-id, IP hash, device class, bot heuristic, referrer
//! normalization). The derivations are pure so they behave identically on
//! every service that applies them.
//!
//! The workspace counter also lives here: it is the single authority for cap
//! enforcement and billing, mutated by the edge service and read by the
//! billing jobs, and every service must go through the same operations.
pub mod counter;
pub mod enrich;
pub mod enums;
pub mod event;
pub mod referrer;
pub mod ua;
