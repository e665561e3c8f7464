use std::net::IpAddr;

use common::config::{
    HttpProtocolConfig, HttpsProtocolConfig, ServerNameConfig, TcpProtocolConfig,
    TlsProtocolConfig, UdpProtocolConfig, UnixProtocolConfig,
};
use serde::de::DeserializeOwned;

use crate::{error::invalid_argument, persistence::servers::ProtocolColumn, Result};

/// Stored form of an empty protocol blob.
pub const NULL_JSON: &str = "null";

pub fn validate_required_str(field: &str, value: &str, max_len: usize) -> Result<()> {
    validate_opt_str(field, Some(value), max_len)
}

pub fn validate_opt_str(field: &str, value: Option<&str>, max_len: usize) -> Result<()> {
    if let Some(val) = value {
        if val.trim().is_empty() {
            return Err(invalid_argument(format!("{field} cannot be empty")));
        }
        if val.len() > max_len {
            return Err(invalid_argument(format!("{field} too long")));
        }
    }
    Ok(())
}

pub fn normalize_ip(field: &str, value: &str) -> Result<String> {
    let parsed = value
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| invalid_argument(format!("{field} must be a valid IPv4 or IPv6 address")))?;
    Ok(parsed.to_string())
}

fn reencode<T>(field: &str, raw: &str) -> Result<(String, T)>
where
    T: DeserializeOwned + serde::Serialize,
{
    let value: T = serde_json::from_str(raw)
        .map_err(|err| invalid_argument(format!("invalid {field} config: {err}")))?;
    Ok((serde_json::to_string(&value)?, value))
}

/// A protocol blob checked against its schema, plus the SSL policy it
/// references (HTTPS and TLS only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolBlob {
    pub json: String,
    pub ssl_policy_id: Option<i64>,
}

/// Validate a submitted protocol config. Empty input clears the protocol and
/// is stored as `null`.
pub fn normalize_protocol_json(column: ProtocolColumn, raw: &str) -> Result<ProtocolBlob> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NULL_JSON {
        return Ok(ProtocolBlob {
            json: NULL_JSON.to_string(),
            ssl_policy_id: None,
        });
    }

    let (json, ssl_policy_id) = match column {
        ProtocolColumn::Http => (reencode::<HttpProtocolConfig>("http", raw)?.0, None),
        ProtocolColumn::Tcp => (reencode::<TcpProtocolConfig>("tcp", raw)?.0, None),
        ProtocolColumn::Unix => (reencode::<UnixProtocolConfig>("unix", raw)?.0, None),
        ProtocolColumn::Udp => (reencode::<UdpProtocolConfig>("udp", raw)?.0, None),
        ProtocolColumn::Https => {
            let (json, value) = reencode::<HttpsProtocolConfig>("https", raw)?;
            (json, value.ssl_policy_ref.map(|r| r.ssl_policy_id))
        }
        ProtocolColumn::Tls => {
            let (json, value) = reencode::<TlsProtocolConfig>("tls", raw)?;
            (json, value.ssl_policy_ref.map(|r| r.ssl_policy_id))
        }
    };
    Ok(ProtocolBlob {
        json,
        ssl_policy_id: ssl_policy_id.filter(|id| *id > 0),
    })
}

/// Parse and tidy a submitted name list. Empty input means no names.
pub fn normalize_server_names(raw: &str, max_len: usize) -> Result<Vec<ServerNameConfig>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NULL_JSON {
        return Ok(Vec::new());
    }
    let names: Vec<ServerNameConfig> = serde_json::from_str(raw)
        .map_err(|err| invalid_argument(format!("invalid server names: {err}")))?;

    names
        .into_iter()
        .map(|mut name| {
            name.name = name.name.trim().to_ascii_lowercase();
            name.sub_names = name
                .sub_names
                .into_iter()
                .map(|sub| sub.trim().to_ascii_lowercase())
                .filter(|sub| !sub.is_empty())
                .collect();
            if name.name.is_empty() && name.sub_names.is_empty() {
                return Err(invalid_argument("server name cannot be empty"));
            }
            if name.name.len() > max_len || name.sub_names.iter().any(|s| s.len() > max_len) {
                return Err(invalid_argument("server name too long"));
            }
            Ok(name)
        })
        .collect()
}

/// Every plain host name in a list, sub names included.
pub fn plain_server_names(names: &[ServerNameConfig]) -> Vec<String> {
    let mut out = Vec::new();
    for name in names {
        if !name.name.is_empty() {
            out.push(name.name.clone());
        }
        out.extend(name.sub_names.iter().cloned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;

    fn is_invalid(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<DomainError>(),
            Some(DomainError::InvalidArgument(_))
        )
    }

    #[test]
    fn empty_protocol_is_stored_as_null() {
        let blob = normalize_protocol_json(ProtocolColumn::Http, "  ").expect("empty");
        assert_eq!(blob.json, "null");
        assert_eq!(blob.ssl_policy_id, None);
    }

    #[test]
    fn https_blob_reports_referenced_policy() {
        let blob = normalize_protocol_json(
            ProtocolColumn::Https,
            r#"{"isOn":true,"sslPolicyRef":{"isOn":true,"sslPolicyId":12}}"#,
        )
        .expect("https");
        assert_eq!(blob.ssl_policy_id, Some(12));
        assert!(blob.json.contains("\"sslPolicyId\":12"));

        let err = normalize_protocol_json(ProtocolColumn::Tcp, r#"{"isOn":"yes"}"#)
            .expect_err("bad type");
        assert!(is_invalid(&err));
    }

    #[test]
    fn server_names_are_trimmed_and_lowercased() {
        let names = normalize_server_names(
            r#"[{"name":" Example.COM "},{"name":"","subNames":["A.example.com",""]}]"#,
            255,
        )
        .expect("names");
        assert_eq!(
            plain_server_names(&names),
            vec!["example.com".to_string(), "a.example.com".to_string()]
        );
        assert!(normalize_server_names("", 255).expect("empty").is_empty());
        assert!(is_invalid(
            &normalize_server_names(r#"[{"name":"  "}]"#, 255).expect_err("blank")
        ));
    }

    #[test]
    fn ip_addresses_are_parsed() {
        assert_eq!(normalize_ip("ip", " 10.0.0.1 ").expect("v4"), "10.0.0.1");
        assert!(normalize_ip("ip", "10.0.0").is_err());
        validate_required_str("name", "edge-1", 16).expect("valid");
        assert!(validate_required_str("name", " ", 16).is_err());
        assert!(validate_opt_str("name", Some("abcdef"), 3).is_err());
    }
}
