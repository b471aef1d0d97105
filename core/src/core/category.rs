/// Unifies the category vocabularies of the supported platforms.
///
/// Every platform labels assets differently (`GOOGLE_PLAY_APP_ID`, `android`,
/// `mobile-application-android`, ...). `normalize` maps any of them onto a
/// single closed set, falling back to a cleaned-up copy of the raw label when
/// nothing matches. It never fails.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Wildcard,
    Url,
    Cidr,
    Android,
    Ios,
    Ai,
    Hardware,
    Blockchain,
    Binary,
    Code,
    Other,
    /// Raw label no table entry matched, separators replaced with spaces.
    Unrecognized(String),
}

impl Category {
    pub const KNOWN: [Category; 11] = [
        Category::Wildcard,
        Category::Url,
        Category::Cidr,
        Category::Android,
        Category::Ios,
        Category::Ai,
        Category::Hardware,
        Category::Blockchain,
        Category::Binary,
        Category::Code,
        Category::Other,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Category::Wildcard => "wildcard",
            Category::Url => "url",
            Category::Cidr => "cidr",
            Category::Android => "android",
            Category::Ios => "ios",
            Category::Ai => "ai",
            Category::Hardware => "hardware",
            Category::Blockchain => "blockchain",
            Category::Binary => "binary",
            Category::Code => "code",
            Category::Other => "other",
            Category::Unrecognized(label) => label,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Parses one of the unified names. Used for category filters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Category::KNOWN
            .iter()
            .find(|c| c.as_str() == wanted)
            .cloned()
            .ok_or_else(|| {
                let names: Vec<&str> = Category::KNOWN.iter().map(Category::as_str).collect();
                format!("unknown category '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Raw platform labels (lower-cased) and the unified category they map to.
const CATEGORY_TABLE: &[(&str, Category)] = &[
    // wildcard
    ("wildcard", Category::Wildcard),
    // url
    ("url", Category::Url),
    ("website", Category::Url),
    ("web", Category::Url),
    ("api", Category::Url),
    ("ip_address", Category::Url),
    ("ip-address", Category::Url),
    ("web-application", Category::Url),
    ("websites_and_applications", Category::Url),
    ("domain", Category::Url),
    // cidr
    ("cidr", Category::Cidr),
    ("iprange", Category::Cidr),
    ("ip_range", Category::Cidr),
    ("ip-range", Category::Cidr),
    ("network", Category::Cidr),
    // android
    ("android", Category::Android),
    ("google_play_app_id", Category::Android),
    ("other_apk", Category::Android),
    ("mobile-application-android", Category::Android),
    ("android_application", Category::Android),
    // ios
    ("ios", Category::Ios),
    ("apple_store_app_id", Category::Ios),
    ("other_ipa", Category::Ios),
    ("testflight", Category::Ios),
    ("mobile-application-ios", Category::Ios),
    ("ios_application", Category::Ios),
    // ai
    ("ai", Category::Ai),
    ("ai_model", Category::Ai),
    // hardware
    ("hardware", Category::Hardware),
    ("device", Category::Hardware),
    ("iot", Category::Hardware),
    // blockchain
    ("smart_contract", Category::Blockchain),
    ("blockchain", Category::Blockchain),
    ("blockchain_dlt", Category::Blockchain),
    // binary
    ("binary", Category::Binary),
    ("executable", Category::Binary),
    ("downloadable_executables", Category::Binary),
    ("windows_app_store_app_id", Category::Binary),
    ("application", Category::Binary),
    // code
    ("code", Category::Code),
    ("source_code", Category::Code),
    // other
    ("other", Category::Other),
];

fn cidr_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{1,3}(\.\d{1,3}){3}(/\d{1,2}|\s*-\s*\d{1,3}(\.\d{1,3}){3})$")
            .expect("static CIDR pattern")
    })
}

fn host_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(https?://)?[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+(:\d+)?(/\S*)?$")
            .expect("static host pattern")
    })
}

pub fn is_wildcard_target(target: &str) -> bool {
    target.trim().strip_prefix("*.").is_some_and(|suffix| !suffix.is_empty())
}

/// Maps a raw platform category, with the target as a shape hint, to a unified category.
pub fn normalize(raw: &str, target: &str) -> Category {
    if is_wildcard_target(target) {
        return Category::Wildcard;
    }

    let label = raw.trim().to_lowercase();
    if label.is_empty() {
        return infer_from_target(target);
    }

    if let Some((_, category)) = CATEGORY_TABLE.iter().find(|(name, _)| *name == label) {
        return category.clone();
    }

    Category::Unrecognized(label.replace(['_', '-', '.'], " "))
}

fn infer_from_target(target: &str) -> Category {
    let target = target.trim().to_lowercase();
    if cidr_shape().is_match(&target) {
        Category::Cidr
    } else if host_shape().is_match(&target) {
        Category::Url
    } else {
        Category::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_table() {
        let cases: &[(&str, &str, Category)] = &[
            ("URL", "app.example.com", Category::Url),
            ("website", "https://example.com", Category::Url),
            ("api", "api.example.com", Category::Url),
            ("IP_ADDRESS", "10.0.0.1", Category::Url),
            ("CIDR", "10.0.0.0/8", Category::Cidr),
            ("IpRange", "10.0.0.1 - 10.0.0.9", Category::Cidr),
            ("GOOGLE_PLAY_APP_ID", "com.example.app", Category::Android),
            ("OTHER_APK", "example.apk", Category::Android),
            ("mobile-application-android", "com.example", Category::Android),
            ("APPLE_STORE_APP_ID", "id123456", Category::Ios),
            ("TESTFLIGHT", "https://testflight.apple.com/join/x", Category::Ios),
            ("AI_MODEL", "gpt-thing", Category::Ai),
            ("HARDWARE", "Router X1", Category::Hardware),
            ("Device", "Smart lock", Category::Hardware),
            ("SMART_CONTRACT", "0xdeadbeef", Category::Blockchain),
            ("DOWNLOADABLE_EXECUTABLES", "setup.exe", Category::Binary),
            ("SOURCE_CODE", "github.com/example/repo", Category::Code),
            ("OTHER", "anything", Category::Other),
            ("", "*.example.com", Category::Wildcard),
            ("", "192.168.0.0/16", Category::Cidr),
            ("", "shop.example.com", Category::Url),
            ("", "Some physical thing", Category::Other),
            ("Weird_Thing-type", "x", Category::Unrecognized("weird thing type".to_string())),
        ];

        for (raw, target, expected) in cases {
            assert_eq!(&normalize(raw, target), expected, "raw={:?} target={:?}", raw, target);
        }
    }

    #[test]
    fn test_wildcard_shape_wins_over_label() {
        for raw in ["URL", "other", "SOURCE_CODE", "", "something_new"] {
            assert_eq!(normalize(raw, "*.example.com"), Category::Wildcard);
        }
        // a bare asterisk is not a wildcard domain
        assert_eq!(normalize("other", "*."), Category::Other);
        assert_eq!(normalize("url", "*"), Category::Url);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        for (raw, _) in CATEGORY_TABLE {
            assert_eq!(normalize(raw, "x"), normalize(raw, "x"));
        }
        assert_eq!(normalize("never-seen", "x"), normalize("never-seen", "x"));
    }

    #[test]
    fn test_from_str_roundtrip_names() {
        for category in Category::KNOWN.iter() {
            assert_eq!(&category.to_string().parse::<Category>().unwrap(), category);
        }
        assert!("nonsense".parse::<Category>().is_err());
        assert_eq!(" URL ".parse::<Category>().unwrap(), Category::Url);
    }
}
