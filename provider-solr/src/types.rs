//! Solr update API response types

use serde::Deserialize;

/// `responseHeader` block returned by every Solr handler
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHeader {
    /// Zero on success
    pub status: i32,

    /// Query time in milliseconds
    #[serde(rename = "QTime", default)]
    pub q_time: u64,
}

/// `error` block returned on failed requests
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub msg: String,

    #[serde(default)]
    pub code: u16,
}

/// Body of a `/update` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub response_header: ResponseHeader,

    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_response() {
        let body = r#"{"responseHeader":{"status":0,"QTime":12}}"#;
        let parsed: UpdateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.response_header.status, 0);
        assert_eq!(parsed.response_header.q_time, 12);
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_parse_error_response() {
        let body = r#"{"responseHeader":{"status":400,"QTime":1},
                       "error":{"metadata":["error-class","org.apache.solr.common.SolrException"],
                                "msg":"unknown field 'bogus'","code":400}}"#;
        let parsed: UpdateResponse = serde_json::from_str(body).unwrap();
        let error = parsed.error.unwrap();
        assert_eq!(error.code, 400);
        assert_eq!(error.msg, "unknown field 'bogus'");
    }
}
