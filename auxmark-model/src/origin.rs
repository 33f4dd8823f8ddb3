use std::fmt;

use serde_json::Value;
use url::Url;

/// Rate-limiting bucket for a preprocessing job, derived from its probe
/// metadata. Jobs sharing an origin are mutually exclusive in the
/// scheduler and paced by the configured minimum interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginKey {
    /// Remote authority (`host[:port]`, userinfo included) of the URL the
    /// job will contact.
    Host(String),
    /// No derivable origin; all such jobs share one serialized bucket.
    Local,
}

impl OriginKey {
    /// Derives the origin from probe metadata.
    ///
    /// Candidate fields are checked in a fixed precedence order, first
    /// match wins even when it yields no usable URL:
    /// 1. `images[0].url` (image localization shape);
    /// 2. `tweet_id`, backed by the oEmbed endpoint the fetch will hit;
    /// 3. `url`.
    pub fn from_metadata(metadata: &Value) -> Self {
        let candidate = if let Some(images) = metadata
            .get("images")
            .and_then(Value::as_array)
            .filter(|images| !images.is_empty())
        {
            images[0]
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_owned)
        } else if let Some(id) = metadata.get("tweet_id").and_then(Value::as_str)
        {
            Some(format!(
                "https://publish.x.com/oembed?url=https://x.com/i/status/{id}"
            ))
        } else {
            metadata.get("url").and_then(Value::as_str).map(str::to_owned)
        };

        match candidate {
            Some(raw) => Self::from_url(&raw),
            None => OriginKey::Local,
        }
    }

    /// Origin of a raw URL string; `Local` when it does not parse or has
    /// no host.
    pub fn from_url(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) if url.has_host() => {
                OriginKey::Host(url.authority().to_owned())
            }
            _ => OriginKey::Local,
        }
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginKey::Host(host) => f.write_str(host),
            OriginKey::Local => f.write_str("local"),
        }
    }
}
