//! Identifier generation.
//!
//! Instance ids are KSUIDs: a timestamp prefix plus 16 random bytes, rendered
//! as 27 base62 characters. Lexicographic order of the rendered ids matches
//! creation time order.

use rand::{distributions::Alphanumeric, Rng};
use svix_ksuid::{Ksuid, KsuidLike};
use uuid::Uuid;

/// Length of a rendered instance id.
pub const INSTANCE_ID_LEN: usize = 27;

/// Returns a new time-prefixed instance id for the given Unix time.
pub fn new_instance_id(now_unix: i64) -> String {
    Ksuid::from_seconds(Some(now_unix), None).to_string()
}

/// Returns a fresh request id used for causation/correlation tracking.
pub fn new_request_id() -> String {
    Uuid::now_v7().to_string()
}

/// Returns `len` random alphanumeric characters.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
