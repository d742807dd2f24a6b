pub mod user_id;

pub use user_id::{OptionalUserId, USER_ID_HEADER};
