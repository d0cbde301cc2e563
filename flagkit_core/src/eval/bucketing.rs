//! Deterministic user bucketing for rollouts and weighted segment rules.

use serde_json::Value;

use crate::user::User;

/// Compute the user's bucket in `[0, 1)`.
///
/// The bucket is derived from an MD5 hash of `{key}.{salt}.{id}` where `id` is the user's
/// `bucket_by` attribute (plus the secondary key if set), so the same user always lands in the
/// same bucket for a given flag or segment. When `seed` is set it replaces `{key}.{salt}` so
/// that experiments sharing a seed bucket users identically.
///
/// Users whose `bucket_by` attribute is missing or not bucketable hash to bucket 0.
pub(crate) fn bucket_user(
    seed: Option<i64>,
    user: &User,
    bucket_by: &str,
    key: &str,
    salt: &str,
) -> f64 {
    let Some(id) = user.attribute(bucket_by).as_ref().and_then(bucketable_string) else {
        return 0.0;
    };

    let mut input = match seed {
        Some(seed) => format!("{seed}.{id}"),
        None => format!("{key}.{salt}.{id}"),
    };
    if let Some(secondary) = user.secondary() {
        input.push('.');
        input.push_str(secondary);
    }

    let hash = md5::compute(&input);
    let value = u64::from_be_bytes(hash.0[0..8].try_into().unwrap());
    // Top 53 bits, so the quotient is exactly representable and strictly below 1.
    (value >> 11) as f64 / (1u64 << 53) as f64
}

/// String and integer attributes participate in bucketing; everything else does not.
fn bucketable_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_i64().map(|i| i.to_string()),
        _ => None,
    }
}
