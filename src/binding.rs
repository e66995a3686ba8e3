//! Request binding: populate a typed record from body, path and query.
//!
//! A [`Schema`] is an explicit list of [`Field`] descriptors, built once at
//! startup. Each descriptor names the field, says where its value may come
//! from and which rules it must satisfy, and carries a getter/setter pair so
//! binding never needs runtime type introspection.
//!
//! ```rust
//! use bulwark::binding::{Field, Schema};
//!
//! #[derive(Default)]
//! struct Search {
//!     term: String,
//!     limit: u32,
//! }
//!
//! let schema = Schema::new()
//!     .field(Field::new("Term", |s: &Search| &s.term, |s: &mut Search| &mut s.term)
//!         .json("term").query("q").required())
//!     .field(Field::new("Limit", |s: &Search| &s.limit, |s: &mut Search| &mut s.limit)
//!         .json("limit").query("limit").max(100.0));
//! # let _ = schema;
//! ```
//!
//! Binding runs in three steps:
//!
//! 1. decode the body according to its media type (`application/json`,
//!    `application/xml` / `text/xml`; anything else is not decoded),
//! 2. overlay matched path parameters, then query parameters,
//! 3. [validate](Schema::validate) the result.

use std::collections::HashMap;
use std::fmt;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::request::Request;
use crate::validation::{Rule, ValidationError};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Where a bound value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Json,
    Xml,
    Path,
    Query,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json  => "json body",
            Self::Xml   => "xml body",
            Self::Path  => "path",
            Self::Query => "query",
        })
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error("malformed json: {0}")]
    MalformedJson(String),

    #[error("MalformedXML: {0}")]
    MalformedXml(String),

    #[error("invalid value for field '{field}' from {origin}: {reason}")]
    InvalidValue {
        field: &'static str,
        origin: Origin,
        reason: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ── Field types ───────────────────────────────────────────────────────────────

/// A value type a [`Field`] can hold.
///
/// Text sources (path, query, XML) go through [`parse`](FieldType::parse);
/// JSON values go through serde.
pub trait FieldType: DeserializeOwned + Send + Sync + 'static {
    fn parse(raw: &str) -> Result<Self, String>;

    /// Whether the value counts as missing for the `required` rule.
    fn is_zero(&self) -> bool;

    /// Whether the value is above `limit` for the `max` rule. Strings are
    /// measured in characters; integers compare exactly.
    fn exceeds(&self, limit: f64) -> bool;

    /// Whether `max` makes sense for this type at all.
    fn has_magnitude() -> bool { true }
}

impl FieldType for String {
    fn parse(raw: &str) -> Result<Self, String> { Ok(raw.to_owned()) }
    fn is_zero(&self) -> bool { self.is_empty() }
    fn exceeds(&self, limit: f64) -> bool { self.chars().count() as f64 > limit }
}

impl FieldType for bool {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            _ => Err(format!("invalid boolean `{raw}`")),
        }
    }
    fn is_zero(&self) -> bool { !*self }
    fn exceeds(&self, _limit: f64) -> bool { false }
    fn has_magnitude() -> bool { false }
}

macro_rules! integer_field_type {
    ($($ty:ty),*) => {$(
        impl FieldType for $ty {
            fn parse(raw: &str) -> Result<Self, String> {
                raw.trim().parse::<$ty>().map_err(|e| format!("`{raw}`: {e}"))
            }
            fn is_zero(&self) -> bool { *self == 0 }
            // `v > limit` iff `v > floor(limit)`; the float-to-i128 cast saturates.
            fn exceeds(&self, limit: f64) -> bool {
                !limit.is_nan() && (*self as i128) > (limit.floor() as i128)
            }
        }
    )*};
}

macro_rules! float_field_type {
    ($($ty:ty),*) => {$(
        impl FieldType for $ty {
            fn parse(raw: &str) -> Result<Self, String> {
                raw.trim().parse::<$ty>().map_err(|e| format!("`{raw}`: {e}"))
            }
            fn is_zero(&self) -> bool { *self == 0.0 }
            fn exceeds(&self, limit: f64) -> bool { f64::from(*self) > limit }
        }
    )*};
}

integer_field_type!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
float_field_type!(f32, f64);

impl<V: FieldType> FieldType for Option<V> {
    fn parse(raw: &str) -> Result<Self, String> { V::parse(raw).map(Some) }
    fn is_zero(&self) -> bool { self.is_none() }
    fn exceeds(&self, limit: f64) -> bool { self.as_ref().is_some_and(|v| v.exceeds(limit)) }
    fn has_magnitude() -> bool { V::has_magnitude() }
}

// ── Field descriptors ─────────────────────────────────────────────────────────

/// Type-erased access to one field of `T`.
trait Slot<T>: Send + Sync {
    fn set_text(&self, target: &mut T, raw: &str) -> Result<(), String>;
    fn set_json(&self, target: &mut T, value: Value) -> Result<(), String>;
    fn is_zero(&self, target: &T) -> bool;
    fn exceeds(&self, target: &T, limit: f64) -> bool;
}

struct Accessor<T, V> {
    get: fn(&T) -> &V,
    get_mut: fn(&mut T) -> &mut V,
}

impl<T, V: FieldType> Slot<T> for Accessor<T, V> {
    fn set_text(&self, target: &mut T, raw: &str) -> Result<(), String> {
        *(self.get_mut)(target) = V::parse(raw)?;
        Ok(())
    }

    fn set_json(&self, target: &mut T, value: Value) -> Result<(), String> {
        *(self.get_mut)(target) = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn is_zero(&self, target: &T) -> bool {
        (self.get)(target).is_zero()
    }

    fn exceeds(&self, target: &T, limit: f64) -> bool {
        (self.get)(target).exceeds(limit)
    }
}

/// One field of a bind target: its name, its sources and its rules.
pub struct Field<T> {
    name: &'static str,
    json: Option<&'static str>,
    xml: Option<&'static str>,
    path: Option<&'static str>,
    query: Option<&'static str>,
    rules: Vec<Rule>,
    has_magnitude: bool,
    slot: Box<dyn Slot<T>>,
}

impl<T: 'static> Field<T> {
    /// Describe a field by name (used in validation messages) and accessors.
    pub fn new<V: FieldType>(
        name: &'static str,
        get: fn(&T) -> &V,
        get_mut: fn(&mut T) -> &mut V,
    ) -> Self {
        Self {
            name,
            json: None,
            xml: None,
            path: None,
            query: None,
            rules: Vec::new(),
            has_magnitude: V::has_magnitude(),
            slot: Box::new(Accessor { get, get_mut }),
        }
    }
}

impl<T> Field<T> {
    /// Key of this field in a JSON object body.
    pub fn json(mut self, key: &'static str) -> Self {
        self.json = Some(key);
        self
    }

    /// Name of the child element carrying this field in an XML body.
    pub fn xml(mut self, key: &'static str) -> Self {
        self.xml = Some(key);
        self
    }

    /// Name of the route parameter carrying this field.
    pub fn path(mut self, key: &'static str) -> Self {
        self.path = Some(key);
        self
    }

    /// Name of the query-string key carrying this field.
    pub fn query(mut self, key: &'static str) -> Self {
        self.query = Some(key);
        self
    }

    pub fn required(mut self) -> Self {
        self.rules.push(Rule::Required);
        self
    }

    /// Upper bound, inclusive. Integer fields compare exactly against
    /// `floor(limit)`, so wide `i64`/`u64` values are not rounded.
    ///
    /// # Panics
    ///
    /// Panics if the field's type has no magnitude (e.g. `bool`).
    pub fn max(mut self, limit: f64) -> Self {
        assert!(
            self.has_magnitude,
            "rule `max` is not applicable to field `{}`",
            self.name,
        );
        self.rules.push(Rule::Max(limit));
        self
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn rules(&self) -> &[Rule] { &self.rules }

    pub(crate) fn is_zero(&self, target: &T) -> bool {
        self.slot.is_zero(target)
    }

    pub(crate) fn exceeds(&self, target: &T, limit: f64) -> bool {
        self.slot.exceeds(target, limit)
    }

    fn set_text(&self, target: &mut T, raw: &str, origin: Origin) -> Result<(), BindError> {
        self.slot.set_text(target, raw).map_err(|reason| BindError::InvalidValue {
            field: self.name,
            origin,
            reason,
        })
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// Body formats the binder understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Xml,
}

impl BodyFormat {
    /// Pick a format from a request's media type.
    pub fn detect(req: &Request) -> Option<Self> {
        match req.media_type()?.as_str() {
            "application/json" => Some(Self::Json),
            "application/xml" | "text/xml" => Some(Self::Xml),
            _ => None,
        }
    }
}

/// The ordered field descriptors of a bind target.
pub struct Schema<T> {
    pub(crate) fields: Vec<Field<T>>,
}

impl<T> Schema<T> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn field(mut self, field: Field<T>) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field<T>] { &self.fields }

    /// Populate `target` from `req` and validate it.
    ///
    /// The body format follows the request's media type.
    pub fn bind(&self, req: &Request, target: &mut T) -> Result<(), BindError> {
        self.bind_as(req, target, BodyFormat::detect(req))
    }

    /// Like [`bind`](Self::bind) but always decodes the body as JSON.
    pub fn bind_json(&self, req: &Request, target: &mut T) -> Result<(), BindError> {
        self.bind_as(req, target, Some(BodyFormat::Json))
    }

    /// Like [`bind`](Self::bind) but always decodes the body as XML.
    pub fn bind_xml(&self, req: &Request, target: &mut T) -> Result<(), BindError> {
        self.bind_as(req, target, Some(BodyFormat::Xml))
    }

    /// Populate `target` without validating it.
    pub fn populate(
        &self,
        req: &Request,
        target: &mut T,
        format: Option<BodyFormat>,
    ) -> Result<(), BindError> {
        if !req.body().is_empty() {
            match format {
                Some(BodyFormat::Json) => self.decode_json(req.body(), target)?,
                Some(BodyFormat::Xml) => self.decode_xml(req.body(), target)?,
                None => {}
            }
        }
        self.overlay(req, target)
    }

    fn bind_as(&self, req: &Request, target: &mut T, format: Option<BodyFormat>) -> Result<(), BindError> {
        self.populate(req, target, format)?;
        self.validate(target)?;
        Ok(())
    }

    fn decode_json(&self, body: &[u8], target: &mut T) -> Result<(), BindError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| BindError::MalformedJson(e.to_string()))?;
        let mut object = match value {
            Value::Object(object) => object,
            // A `null` document decodes to nothing, like an empty body.
            Value::Null => return Ok(()),
            _ => return Err(BindError::MalformedJson("expected a JSON object".into())),
        };

        for field in &self.fields {
            let Some(key) = field.json else { continue };
            let Some(value) = take_key(&mut object, key) else { continue };
            if value.is_null() {
                continue;
            }
            field.slot.set_json(target, value).map_err(|reason| BindError::InvalidValue {
                field: field.name,
                origin: Origin::Json,
                reason,
            })?;
        }
        Ok(())
    }

    fn decode_xml(&self, body: &[u8], target: &mut T) -> Result<(), BindError> {
        let elements = xml_elements(body)?;
        for field in &self.fields {
            let Some(key) = field.xml else { continue };
            if let Some(text) = elements.get(key) {
                if !text.is_empty() {
                    field.set_text(target, text, Origin::Xml)?;
                }
            }
        }
        Ok(())
    }

    /// Path parameters first, then query parameters.
    fn overlay(&self, req: &Request, target: &mut T) -> Result<(), BindError> {
        for field in &self.fields {
            if let Some(raw) = field.path.and_then(|key| req.param(key)) {
                if !raw.is_empty() {
                    field.set_text(target, raw, Origin::Path)?;
                }
            }
            if let Some(raw) = field.query.and_then(|key| req.query_param(key)) {
                if !raw.is_empty() {
                    field.set_text(target, &raw, Origin::Query)?;
                }
            }
        }
        Ok(())
    }
}

impl<T> Default for Schema<T> {
    fn default() -> Self { Self::new() }
}

/// Exact key first, then the first key equal ignoring ASCII case.
fn take_key(object: &mut Map<String, Value>, key: &str) -> Option<Value> {
    if let Some(value) = object.remove(key) {
        return Some(value);
    }
    let folded = object.keys().find(|k| k.eq_ignore_ascii_case(key))?.clone();
    object.remove(&folded)
}

/// Text of every direct child of the document's root element, keyed by local
/// name. A repeated element keeps its last value.
fn xml_elements(body: &[u8]) -> Result<HashMap<String, String>, BindError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut elements = HashMap::new();
    let mut current: Option<(String, String)> = None;
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                depth += 1;
                match depth {
                    1 => seen_root = true,
                    2 => {
                        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                        current = Some((name, String::new()));
                    }
                    _ => {}
                }
            }
            Event::Empty(empty) => match depth {
                0 => seen_root = true,
                1 => {
                    let name = String::from_utf8_lossy(empty.local_name().as_ref()).into_owned();
                    elements.insert(name, String::new());
                }
                _ => {}
            },
            Event::Text(text) if depth == 2 => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) if depth == 2 => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    if let Some((name, value)) = current.take() {
                        elements.insert(name, value);
                    }
                }
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| BindError::MalformedXml("unexpected closing tag".into()))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root || depth != 0 {
        return Err(BindError::MalformedXml("unexpected EOF".into()));
    }
    Ok(elements)
}

fn malformed(e: impl fmt::Display) -> BindError {
    BindError::MalformedXml(e.to_string())
}

// ── Bind trait ────────────────────────────────────────────────────────────────

/// A type with a process-wide [`Schema`].
///
/// Implement it with a `OnceLock` so the schema is built on first use:
///
/// ```rust
/// use std::sync::OnceLock;
///
/// use bulwark::binding::{Bind, Field, Schema};
///
/// #[derive(Default)]
/// struct Item { id: u64 }
///
/// impl Bind for Item {
///     fn schema() -> &'static Schema<Self> {
///         static SCHEMA: OnceLock<Schema<Item>> = OnceLock::new();
///         SCHEMA.get_or_init(|| {
///             Schema::new().field(Field::new("ID", |i: &Item| &i.id, |i: &mut Item| &mut i.id)
///                 .path("id").required())
///         })
///     }
/// }
/// ```
pub trait Bind: Default + Sized + 'static {
    fn schema() -> &'static Schema<Self>;
}

impl Request {
    /// Bind and validate a fresh `T`, choosing the body format by media type.
    pub fn bind<T: Bind>(&self) -> Result<T, BindError> {
        let mut target = T::default();
        T::schema().bind(self, &mut target)?;
        Ok(target)
    }

    /// Bind and validate a fresh `T`, decoding the body as JSON.
    pub fn bind_json<T: Bind>(&self) -> Result<T, BindError> {
        let mut target = T::default();
        T::schema().bind_json(self, &mut target)?;
        Ok(target)
    }

    /// Bind and validate a fresh `T`, decoding the body as XML.
    pub fn bind_xml<T: Bind>(&self) -> Result<T, BindError> {
        let mut target = T::default();
        T::schema().bind_xml(self, &mut target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;

    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Probe {
        name: String,
        count: i32,
        ratio: Option<f64>,
        active: bool,
    }

    fn schema() -> Schema<Probe> {
        Schema::new()
            .field(Field::new("Name", |p: &Probe| &p.name, |p: &mut Probe| &mut p.name)
                .json("name").xml("name").query("name"))
            .field(Field::new("Count", |p: &Probe| &p.count, |p: &mut Probe| &mut p.count)
                .json("count").xml("count").path("count"))
            .field(Field::new("Ratio", |p: &Probe| &p.ratio, |p: &mut Probe| &mut p.ratio)
                .json("ratio"))
            .field(Field::new("Active", |p: &Probe| &p.active, |p: &mut Probe| &mut p.active)
                .json("active").query("active"))
    }

    fn request(uri: &str, content_type: Option<&str>, body: &'static str) -> Request {
        let mut builder = http::Request::builder().method(Method::POST).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        builder.body(Bytes::from_static(body.as_bytes())).unwrap().into()
    }

    #[test]
    fn json_keys_fall_back_to_case_insensitive_match() {
        let req = request("/", Some("application/json"), r#"{"NAME":"x","count":3}"#);
        let mut probe = Probe::default();
        schema().populate(&req, &mut probe, BodyFormat::detect(&req)).unwrap();
        assert_eq!(probe.name, "x");
        assert_eq!(probe.count, 3);
    }

    #[test]
    fn json_null_leaves_field_untouched() {
        let req = request("/", Some("application/json"), r#"{"name":null,"ratio":null}"#);
        let mut probe = Probe { name: "kept".into(), ..Probe::default() };
        schema().populate(&req, &mut probe, BodyFormat::detect(&req)).unwrap();
        assert_eq!(probe.name, "kept");
        assert_eq!(probe.ratio, None);
    }

    #[test]
    fn json_null_document_is_a_no_op() {
        let req = request("/?name=q", Some("application/json"), "null");
        let mut probe = Probe { count: 4, ..Probe::default() };
        schema().populate(&req, &mut probe, BodyFormat::detect(&req)).unwrap();
        assert_eq!(probe.name, "q");
        assert_eq!(probe.count, 4);
    }

    #[test]
    fn json_type_mismatch_names_the_field() {
        let req = request("/", Some("application/json"), r#"{"count":"many"}"#);
        let err = schema().populate(&req, &mut Probe::default(), Some(BodyFormat::Json)).unwrap_err();
        assert!(matches!(err, BindError::InvalidValue { field: "Count", origin: Origin::Json, .. }));
    }

    #[test]
    fn json_array_body_is_malformed() {
        let req = request("/", Some("application/json"), "[1,2]");
        let err = schema().populate(&req, &mut Probe::default(), Some(BodyFormat::Json)).unwrap_err();
        assert!(err.to_string().starts_with("malformed json"));
    }

    #[test]
    fn xml_reads_children_and_unescapes() {
        let req = request(
            "/",
            Some("text/xml; charset=utf-8"),
            "<probe><name>a &amp; b</name><count> 7 </count><extra><name>no</name></extra></probe>",
        );
        let mut probe = Probe::default();
        schema().populate(&req, &mut probe, BodyFormat::detect(&req)).unwrap();
        assert_eq!(probe.name, "a & b");
        assert_eq!(probe.count, 7);
    }

    #[test]
    fn xml_cdata_is_text() {
        let req = request("/", Some("application/xml"), "<p><name><![CDATA[<raw>]]></name></p>");
        let mut probe = Probe::default();
        schema().populate(&req, &mut probe, BodyFormat::detect(&req)).unwrap();
        assert_eq!(probe.name, "<raw>");
    }

    #[test]
    fn xml_unbalanced_document_is_malformed() {
        for body in ["<p><name>x</name>", "<p><name>x</p>", "", "just text"] {
            let err = xml_elements(body.as_bytes()).unwrap_err();
            assert!(err.to_string().contains("MalformedXML"), "{body:?} gave {err}");
        }
    }

    #[test]
    fn unknown_media_type_skips_body() {
        let req = request("/", Some("text/plain"), r#"{"name":"x"}"#);
        let mut probe = Probe::default();
        schema().populate(&req, &mut probe, BodyFormat::detect(&req)).unwrap();
        assert_eq!(probe, Probe::default());
    }

    #[test]
    fn query_overrides_body_and_parses_booleans() {
        let req = request("/?name=query&active=T", Some("application/json"), r#"{"name":"body"}"#);
        let mut probe = Probe::default();
        schema().populate(&req, &mut probe, BodyFormat::detect(&req)).unwrap();
        assert_eq!(probe.name, "query");
        assert!(probe.active);
    }

    #[test]
    fn path_value_that_does_not_parse_is_rejected() {
        let mut req = request("/", None, "");
        req.set_params(HashMap::from([("count".to_owned(), "abc".to_owned())]));
        let err = schema().populate(&req, &mut Probe::default(), None).unwrap_err();
        assert!(matches!(err, BindError::InvalidValue { field: "Count", origin: Origin::Path, .. }));
    }

    #[test]
    fn empty_query_value_is_skipped() {
        let req = request("/?name=", None, "");
        let mut probe = Probe { name: "kept".into(), ..Probe::default() };
        schema().populate(&req, &mut probe, None).unwrap();
        assert_eq!(probe.name, "kept");
    }

    #[test]
    #[should_panic(expected = "not applicable")]
    fn max_on_bool_panics() {
        let _ = Field::new("Active", |p: &Probe| &p.active, |p: &mut Probe| &mut p.active).max(1.0);
    }

    #[test]
    fn integer_max_compares_exactly_beyond_f64_precision() {
        let limit = 9_007_199_254_740_992.0; // 2^53
        assert!(!9_007_199_254_740_992_u64.exceeds(limit));
        assert!(9_007_199_254_740_993_u64.exceeds(limit));
        assert!((i64::MAX).exceeds(limit));
        assert!(!(-5_i64).exceeds(-4.5) && (-4_i64).exceeds(-4.5));
        assert!(!u64::MAX.exceeds(f64::MAX));
    }

    #[test]
    fn bool_parsing_matches_common_spellings() {
        assert_eq!(bool::parse("True"), Ok(true));
        assert_eq!(bool::parse("0"), Ok(false));
        assert!(bool::parse("yes").is_err());
    }
}
