//! Format strings rendered against item metadata.
//!
//! Templates follow the familiar `{field}` syntax:
//!
//! - `{key}` and nested lookups `{key[sub][0]}`
//! - conversions `!l` (lower), `!u` (upper), `!c` (capitalize), `!s` (string)
//! - format specs `[[fill]align][0][width]`, e.g. `{page:>03}` or `{num:02d}`
//! - `{{` and `}}` for literal braces
//!
//! Used for filenames, directory segments and archive ids.

use serde_json::Value;
use thiserror::Error;

use crate::message::Kwdict;

/// Errors raised while parsing or applying a format string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("invalid template '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("'{0}'")]
    MissingKey(String),

    #[error("{0}")]
    Spec(String),
}

impl FormatError {
    pub fn kind(&self) -> &'static str {
        match self {
            FormatError::Template { .. } => "TemplateError",
            FormatError::MissingKey(_) => "KeyError",
            FormatError::Spec(_) => "ValueError",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Right,
    Center,
}

/// Largest field width a format spec may request.
const MAX_WIDTH: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
struct Spec {
    fill: char,
    align: Option<Align>,
    zero: bool,
    width: usize,
}

impl Spec {
    fn parse(text: &str) -> Result<Self, FormatError> {
        let mut spec = Spec {
            fill: ' ',
            align: None,
            zero: false,
            width: 0,
        };
        let chars: Vec<char> = text.chars().collect();
        let mut pos = 0;

        if chars.len() >= 2 && align_of(chars[1]).is_some() {
            spec.fill = chars[0];
            spec.align = align_of(chars[1]);
            pos = 2;
        } else if let Some(align) = chars.first().and_then(|c| align_of(*c)) {
            spec.align = Some(align);
            pos = 1;
        }

        if chars.get(pos) == Some(&'0') {
            spec.zero = true;
            pos += 1;
        }

        let digits: String = chars[pos..].iter().take_while(|c| c.is_ascii_digit()).collect();
        pos += digits.len();
        if !digits.is_empty() {
            spec.width = digits
                .parse()
                .ok()
                .filter(|width| *width <= MAX_WIDTH)
                .ok_or_else(|| FormatError::Spec(format!("invalid width in '{text}'")))?;
        }

        match &chars[pos..] {
            [] | ['d'] | ['s'] => Ok(spec),
            _ => Err(FormatError::Spec(format!(
                "unsupported format specifier '{text}'"
            ))),
        }
    }

    fn apply(&self, text: String, numeric: bool) -> String {
        let len = text.chars().count();
        if len >= self.width {
            return text;
        }
        let pad = self.width - len;

        if self.zero && self.align.is_none() {
            let (sign, digits) = match text.strip_prefix('-') {
                Some(rest) if numeric => ("-", rest.to_string()),
                _ => ("", text),
            };
            return format!("{sign}{}{digits}", "0".repeat(pad));
        }

        let fill = if self.zero && self.fill == ' ' {
            '0'
        } else {
            self.fill
        };
        let align = self
            .align
            .unwrap_or(if numeric { Align::Right } else { Align::Left });
        let repeat = |n: usize| fill.to_string().repeat(n);
        match align {
            Align::Left => format!("{text}{}", repeat(pad)),
            Align::Right => format!("{}{text}", repeat(pad)),
            Align::Center => {
                let left = pad / 2;
                format!("{}{text}{}", repeat(left), repeat(pad - left))
            }
        }
    }
}

fn align_of(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    name: String,
    keys: Vec<String>,
    conversion: Option<char>,
    spec: Option<Spec>,
}

impl Field {
    fn parse(text: &str, template: &str) -> Result<Self, FormatError> {
        let invalid = |reason: &str| FormatError::Template {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut depth = 0usize;
        let mut split = None;
        for (i, c) in text.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                ':' if depth == 0 => {
                    split = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let (head, spec) = match split {
            Some(i) => (&text[..i], Some(Spec::parse(&text[i + 1..])?)),
            None => (text, None),
        };

        let (path, conversion) = match head.rfind('!') {
            Some(i) if !head[i..].contains(']') => {
                let mut conv = head[i + 1..].chars();
                match (conv.next(), conv.next()) {
                    (Some(c @ ('l' | 'u' | 'c' | 's')), None) => (&head[..i], Some(c)),
                    _ => return Err(invalid("unknown conversion")),
                }
            }
            _ => (head, None),
        };

        let (name, mut rest) = match path.find('[') {
            Some(i) => (&path[..i], &path[i..]),
            None => (path, ""),
        };
        if name.is_empty() {
            return Err(invalid("empty field name"));
        }

        let mut keys = Vec::new();
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('[')
                .and_then(|r| r.find(']').map(|end| (&r[..end], &r[end + 1..])));
            match inner {
                Some((key, tail)) => {
                    keys.push(key.to_string());
                    rest = tail;
                }
                None => return Err(invalid("malformed subscript")),
            }
        }

        Ok(Field {
            name: name.to_string(),
            keys,
            conversion,
            spec,
        })
    }

    fn lookup<'a>(&self, kwdict: &'a Kwdict) -> Option<&'a Value> {
        let mut value = kwdict.get(&self.name)?;
        for key in &self.keys {
            value = match value {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }

    fn path(&self) -> String {
        let mut path = self.name.clone();
        for key in &self.keys {
            path.push('[');
            path.push_str(key);
            path.push(']');
        }
        path
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A parsed format string.
#[derive(Debug, Clone)]
pub struct Formatter {
    segments: Vec<Segment>,
    default: Option<Value>,
}

impl Formatter {
    pub fn new(template: &str) -> Result<Self, FormatError> {
        let invalid = |reason: &str| FormatError::Template {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    if !closed {
                        return Err(invalid("unmatched '{'"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(Field::parse(&field, template)?));
                }
                '}' => return Err(invalid("single '}' encountered")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            segments,
            default: None,
        })
    }

    /// Value substituted for missing keys instead of failing.
    pub fn with_default(mut self, default: Option<Value>) -> Self {
        self.default = default;
        self
    }

    pub fn format(&self, kwdict: &Kwdict) -> Result<String, FormatError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => {
                    let value = match (field.lookup(kwdict), &self.default) {
                        (Some(value), _) => value,
                        (None, Some(default)) => default,
                        (None, None) => return Err(FormatError::MissingKey(field.path())),
                    };
                    let mut text = display_value(value);
                    match field.conversion {
                        Some('l') => text = text.to_lowercase(),
                        Some('u') => text = text.to_uppercase(),
                        Some('c') => text = capitalize(&text),
                        _ => {}
                    }
                    if let Some(spec) = &field.spec {
                        text = spec.apply(text, value.is_number());
                    }
                    out.push_str(&text);
                }
            }
        }
        Ok(out)
    }
}

/// Parse `template` and render it against `kwdict` in one step.
pub fn format_map(template: &str, kwdict: &Kwdict) -> Result<String, FormatError> {
    Formatter::new(template)?.format(kwdict)
}

/// Render a metadata value the way it appears in filenames and listings.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Replace characters that are not allowed inside a single path segment.
pub fn clean_path_segment(segment: &str) -> String {
    if cfg!(windows) {
        segment
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect()
    } else {
        segment.replace('/', "_")
    }
}
