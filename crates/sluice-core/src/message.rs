use serde_json::{Map, Value};

/// Metadata attached to every item an extractor yields.
pub type Kwdict = Map<String, Value>;

/// The only message protocol version this crate understands.
pub const PROTOCOL_VERSION: u32 = 1;

/// One event in the extractor-to-job protocol.
///
/// Extractors emit these in the order they want them acted upon; jobs never
/// reorder them.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Protocol version marker.
    Version(u32),
    /// Announces a new output directory context.
    Directory { kwdict: Kwdict },
    /// A single fetchable item.
    Url { url: String, kwdict: Kwdict },
    /// A nested source to recurse into.
    Queue { url: String, kwdict: Kwdict },
    /// One item with alternative sources; the first URL is the primary one.
    UrlList { urls: Vec<String>, kwdict: Kwdict },
}

impl Message {
    pub fn url(url: impl Into<String>, kwdict: Kwdict) -> Self {
        Message::Url {
            url: url.into(),
            kwdict,
        }
    }

    pub fn queue(url: impl Into<String>, kwdict: Kwdict) -> Self {
        Message::Queue {
            url: url.into(),
            kwdict,
        }
    }

    pub fn directory(kwdict: Kwdict) -> Self {
        Message::Directory { kwdict }
    }

    pub fn url_list<I, S>(urls: I, kwdict: Kwdict) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message::UrlList {
            urls: urls.into_iter().map(Into::into).collect(),
            kwdict,
        }
    }

    /// Numeric tag used when messages are dumped as data.
    pub fn tag(&self) -> u8 {
        match self {
            Message::Version(_) => 1,
            Message::Directory { .. } => 2,
            Message::Url { .. } => 3,
            Message::Queue { .. } => 6,
            Message::UrlList { .. } => 7,
        }
    }
}

/// Build a [`Kwdict`] from a JSON object literal.
///
/// Non-object values yield an empty mapping.
pub fn kwdict(value: Value) -> Kwdict {
    match value {
        Value::Object(map) => map,
        _ => Kwdict::new(),
    }
}

/// Return a copy of `value` whose object keys are inserted in sorted order.
///
/// Serializing the result gives the same text regardless of whether
/// `serde_json` was built with insertion-ordered maps.
pub fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
