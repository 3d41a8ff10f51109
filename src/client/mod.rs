mod shared;

mod coordinator;
pub use coordinator::AuthCoordinator;

mod executor;
pub use executor::AgiloftClient;
