pub mod crud;
pub mod pool;
pub mod repos;
pub mod session;

// Re-export commonly used items
pub use crud::{CrudError, CrudHooks, CrudService, Entity, Fields, NoHooks, Operation, Store};
pub use pool::{create_pool, run_migrations};
pub use repos::user::{UserRepo, UserRow};
pub use session::{PgEntity, Session};
