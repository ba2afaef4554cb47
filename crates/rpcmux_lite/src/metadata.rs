use std::collections::BTreeMap;

/// Request or response metadata (headers and trailers), ordered by key.
pub type Metadata = BTreeMap<String, String>;

/// Combine client-wide defaults with per-call metadata. Per-call values win.
pub fn merge_metadata(defaults: &Metadata, request: Option<Metadata>) -> Metadata {
    let mut merged = defaults.clone();
    if let Some(request) = request {
        merged.extend(request);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_overrides_defaults() {
        let defaults = Metadata::from([
            ("x-client".to_string(), "app".to_string()),
            ("authorization".to_string(), "old".to_string()),
        ]);
        let request = Metadata::from([("authorization".to_string(), "new".to_string())]);

        let merged = merge_metadata(&defaults, Some(request));
        assert_eq!(merged["x-client"], "app");
        assert_eq!(merged["authorization"], "new");
    }

    #[test]
    fn test_no_request_metadata() {
        let merged = merge_metadata(&Metadata::new(), None);
        assert!(merged.is_empty());
    }
}
