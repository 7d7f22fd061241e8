//! Request signing for the internal review endpoints
//!
//! The upstream rejects unsigned JSON requests with 403. The `s` parameter
//! is a djb2-style hash of the deterministically sorted, form-encoded query
//! string of every other parameter. Reverse-engineered from the upstream's
//! own client; deterministic by construction.

use url::form_urlencoded;

/// Compute the `s` signature for a parameter set (which must not already
/// contain `s`).
///
/// Parameters are sorted by key in ascending byte order, form-encoded as
/// `k1=v1&k2=v2&…`, and the resulting string is hashed.
pub fn sign(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in sorted {
        serializer.append_pair(key, value);
    }
    djb2(&serializer.finish())
}

/// djb2 over the raw bytes, 32-bit wrapping, emitted as a decimal string
pub fn djb2(input: &str) -> String {
    let mut hash: u32 = 5381;
    for &byte in input.as_bytes() {
        hash = (hash.wrapping_shl(5).wrapping_add(hash)) ^ u32::from(byte);
    }
    hash.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_parameter_set_hashes_to_seed() {
        assert_eq!(sign(&[]), "5381");
    }

    #[test]
    fn signature_matches_djb2_of_sorted_query_string() {
        assert_eq!(sign(&params(&[("a", "1"), ("b", "2")])), djb2("a=1&b=2"));
        assert_eq!(sign(&params(&[("b", "2"), ("a", "1")])), djb2("a=1&b=2"));
    }

    #[test]
    fn signature_is_pure() {
        let p = params(&[("businessId", "1010501395"), ("page", "1"), ("ajax", "1")]);
        assert_eq!(sign(&p), sign(&p));
    }

    #[test]
    fn key_order_in_input_is_irrelevant() {
        let forward = params(&[("ajax", "1"), ("businessId", "42"), ("ranking", "by_time")]);
        let backward = params(&[("ranking", "by_time"), ("businessId", "42"), ("ajax", "1")]);
        assert_eq!(sign(&forward), sign(&backward));
    }

    #[test]
    fn values_are_form_encoded_before_hashing() {
        // A space form-encodes as '+', so the hash must match the encoded string
        assert_eq!(sign(&params(&[("q", "a b")])), djb2("q=a+b"));
    }

    #[test]
    fn djb2_reference_vectors() {
        assert_eq!(djb2(""), "5381");
        // single byte: h = (5381*33) ^ 'a'
        let mut h: u32 = 5381;
        h = (h.wrapping_shl(5).wrapping_add(h)) ^ u32::from(b'a');
        assert_eq!(djb2("a"), h.to_string());
    }
}
