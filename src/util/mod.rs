pub mod bson_utils;
pub mod random_id;
