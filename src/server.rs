use serde::{Deserialize, Serialize};
use std::fmt;

/// One nameserver that can be probed
///
/// Records are immutable once built. The country code is normalised to
/// upper case on construction and when read back from a persisted list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(rename = "ip")]
    address: String,
    #[serde(default)]
    country: String,
    #[serde(rename = "name", default)]
    display_name: String,
}

impl ServerRecord {
    pub fn new(
        address: impl Into<String>,
        country: impl AsRef<str>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into().trim().to_string(),
            country: country.as_ref().trim().to_ascii_uppercase(),
            display_name: display_name.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The name results are reported under: the display name when there is
    /// one, the address otherwise.
    pub fn identity(&self) -> &str {
        if self.display_name.is_empty() {
            &self.address
        } else {
            &self.display_name
        }
    }

    /// Re-apply construction invariants to a record that was deserialised
    /// directly.
    pub(crate) fn normalized(self) -> Self {
        Self::new(self.address, self.country, self.display_name)
    }
}

impl fmt::Display for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_prefers_display_name() {
        let named = ServerRecord::new("8.8.8.8", "us", "google-public-dns-a.google.com");
        assert_eq!(named.identity(), "google-public-dns-a.google.com");
        assert_eq!(named.to_string(), "google-public-dns-a.google.com");

        let bare = ServerRecord::new("127.0.0.2", "GB", "");
        assert_eq!(bare.identity(), "127.0.0.2");
    }

    #[test]
    fn test_country_is_uppercased() {
        let record = ServerRecord::new(" 84.200.69.80 ", "de", "resolver1.dns.watch");
        assert_eq!(record.country(), "DE");
        assert_eq!(record.address(), "84.200.69.80");
    }

    #[test]
    fn test_yaml_field_names() {
        let record = ServerRecord::new("8.8.4.4", "US", "google-public-dns-b.google.com");
        let yaml = serde_yaml::to_string(&record).unwrap();
        assert!(yaml.contains("ip: 8.8.4.4"));
        assert!(yaml.contains("country: US"));
        assert!(yaml.contains("name: google-public-dns-b.google.com"));
    }
}
