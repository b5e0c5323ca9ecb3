pub mod key_builder;
pub mod snapshot;

pub use key_builder::KeyBuilder;
pub use snapshot::{decode_snapshot, encode_snapshot, to_user_permissions};
