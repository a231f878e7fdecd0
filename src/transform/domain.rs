//! Split a host name into sub-domain and highest registered domain.

use std::net::IpAddr;

/// Public suffixes made of more than one label. Anything else is treated as a
/// single-label suffix (`com`, `io`, `de`, ...).
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "ac.uk", "co.uk", "gov.uk", "ltd.uk", "me.uk", "net.uk", "org.uk", "plc.uk", "sch.uk",
    "com.au", "edu.au", "gov.au", "net.au", "org.au", "asn.au", "id.au",
    "co.nz", "govt.nz", "net.nz", "org.nz", "ac.nz",
    "co.jp", "ac.jp", "go.jp", "ne.jp", "or.jp",
    "com.br", "gov.br", "net.br", "org.br",
    "com.cn", "gov.cn", "net.cn", "org.cn", "edu.cn",
    "co.in", "gov.in", "net.in", "org.in", "ac.in",
    "co.za", "gov.za", "org.za",
    "com.mx", "gob.mx", "org.mx",
    "co.kr", "or.kr", "go.kr",
    "com.sg", "gov.sg", "edu.sg",
    "com.hk", "gov.hk", "org.hk",
    "com.tw", "gov.tw", "org.tw",
    "com.ar", "gob.ar",
    "com.tr", "gov.tr",
    "co.il", "org.il",
    "com.ru", "org.ru",
    "github.io", "herokuapp.com", "appspot.com", "blogspot.com", "cloudfront.net",
    "s3.amazonaws.com",
];

/// Returns `(sub_domain, highest_registered_domain)`.
///
/// IP addresses and single-label names come back whole as the registered
/// domain with an empty sub-domain.
pub fn split_domain(host: &str) -> (String, String) {
    let host = host.trim().trim_end_matches('.');

    if host.is_empty() {
        return (String::new(), String::new());
    }
    if host.parse::<IpAddr>().is_ok() || !host.contains('.') {
        return (String::new(), host.to_string());
    }

    let labels: Vec<&str> = host.split('.').collect();
    let lower = host.to_ascii_lowercase();

    let suffix_labels = MULTI_LABEL_SUFFIXES
        .iter()
        .filter(|suffix| lower == **suffix || lower.ends_with(&format!(".{}", suffix)))
        .map(|suffix| suffix.split('.').count())
        .max()
        .unwrap_or(1);

    if labels.len() <= suffix_labels {
        return (String::new(), host.to_string());
    }

    let split_at = labels.len() - suffix_labels - 1;
    (labels[..split_at].join("."), labels[split_at..].join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(host: &str) -> (String, String) {
        split_domain(host)
    }

    #[test]
    fn test_simple_domains() {
        assert_eq!(split("www.foo.com"), ("www".to_string(), "foo.com".to_string()));
        assert_eq!(split("foo.com"), ("".to_string(), "foo.com".to_string()));
        assert_eq!(split("a.b.c.example.org"), ("a.b.c".to_string(), "example.org".to_string()));
    }

    #[test]
    fn test_multi_label_suffix() {
        assert_eq!(split("news.bbc.co.uk"), ("news".to_string(), "bbc.co.uk".to_string()));
        assert_eq!(split("co.uk"), ("".to_string(), "co.uk".to_string()));
        assert_eq!(split("WWW.Example.COM.AU"), ("WWW".to_string(), "Example.COM.AU".to_string()));
    }

    #[test]
    fn test_ips_and_single_labels() {
        assert_eq!(split("192.168.0.1"), ("".to_string(), "192.168.0.1".to_string()));
        assert_eq!(split("::1"), ("".to_string(), "::1".to_string()));
        assert_eq!(split("localhost"), ("".to_string(), "localhost".to_string()));
        assert_eq!(split(""), ("".to_string(), "".to_string()));
    }

    #[test]
    fn test_trailing_dot() {
        assert_eq!(split("www.foo.com."), ("www".to_string(), "foo.com".to_string()));
    }
}
