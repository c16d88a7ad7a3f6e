// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Aggregates built on top of the event sourcing infrastructure. Nothing in
// `event_sourcing` depends on this module.
//
// ============================================================================

pub mod account;
