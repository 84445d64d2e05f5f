pub mod memory;
pub mod model;
pub mod repo;

pub use memory::InMemoryUserStore;
pub use model::{NewUser, Role, User, UserField};
pub use repo::{PgUserStore, StoreError, UserStore};
