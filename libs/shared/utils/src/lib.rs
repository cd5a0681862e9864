pub mod normalize;
pub mod test_utils;

pub use normalize::{fold_width, normalize_email, normalize_phone, strip_honorific};
