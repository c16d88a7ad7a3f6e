// ============================================================================
// Account Domain - Coin Balances
// ============================================================================
//
// Everything specific to accounts:
// - Value objects (AccountStatus, AccountPolicy, AccountView)
// - Events (AccountCreated, CoinsAdded, CoinsTransferred, ...)
// - Commands and their request parsing
// - Errors (AccountError)
// - Aggregate (AccountAggregate with the balance rules)
// - Command and query handlers
//
// ============================================================================

pub mod aggregate;
pub mod command_handler;
pub mod commands;
pub mod errors;
pub mod events;
pub mod query_handler;
pub mod value_objects;

pub use aggregate::*;
pub use command_handler::*;
pub use commands::*;
pub use errors::*;
pub use events::*;
pub use query_handler::*;
pub use value_objects::*;
