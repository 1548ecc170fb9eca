pub mod entity;
pub mod key;
pub mod metadata;
pub mod value;

pub use entity::{downcast, erase, same_instance, AnyEntity, Managed};
pub use key::EntityKey;
pub use metadata::ClassMetadata;
pub use value::Value;
