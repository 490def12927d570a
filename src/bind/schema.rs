//! Declarative binding schemas.
//!
//! Each request parameter type describes its wire shape with a const
//! [`Schema`]: field names as they appear on the wire, target kinds, and
//! the per-field knobs the lenient decoder honors (defaults, time formats,
//! gateway-array folding, restful key injection). The tables replace the
//! original's runtime reflection: the projector walks the schema, never the
//! type.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Target shape of one field.
pub enum FieldKind {
    Int,
    Uint,
    Float,
    Str,
    Bool,
    /// RFC 3339 output; parsed with the field's tagged format and zone.
    /// Declare the Rust field as `Option<DateTime<Utc>>`.
    Timestamp,
    /// A sequence of the inner kind; single scalars are wrapped.
    Seq(&'static FieldKind),
    /// A nested record with its own schema, recursively projected.
    Nested(&'static Schema),
}

/// Which restful path key a field receives.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RestfulKey {
    Id,
    Method,
}

/// One field's binding description.
pub struct FieldSchema {
    /// Wire name; must match the field's serde rename.
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Adopted when the field is absent from the input.
    pub default: Option<&'static str>,
    /// chrono format string for `Timestamp` fields.
    pub time_format: Option<&'static str>,
    /// Interpret naive timestamps as UTC.
    pub time_utc: bool,
    /// IANA zone name for naive timestamps; `time_utc` wins.
    pub time_zone: Option<&'static str>,
    /// Gather `name.<digits>` keys into an array before projecting.
    pub gw_array: bool,
    pub restful: Option<RestfulKey>,
}

impl FieldSchema {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            time_format: None,
            time_utc: false,
            time_zone: None,
            gw_array: false,
            restful: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn default_value(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn time_format(mut self, format: &'static str) -> Self {
        self.time_format = Some(format);
        self
    }

    pub const fn utc(mut self) -> Self {
        self.time_utc = true;
        self
    }

    pub const fn zone(mut self, zone: &'static str) -> Self {
        self.time_zone = Some(zone);
        self
    }

    pub const fn gateway_array(mut self) -> Self {
        self.gw_array = true;
        self
    }

    pub const fn restful_id(mut self) -> Self {
        self.restful = Some(RestfulKey::Id);
        self
    }

    pub const fn restful_method(mut self) -> Self {
        self.restful = Some(RestfulKey::Method);
        self
    }
}

/// Binding description of a parameter type.
pub struct Schema {
    pub fields: &'static [FieldSchema],
    /// Schemas of embedded records decoded against the same input map, so
    /// their fields appear at the top level. Pair with `#[serde(flatten)]`.
    pub embedded: &'static [&'static Schema],
}

impl Schema {
    /// A schema with no embedded records.
    pub const fn flat(fields: &'static [FieldSchema]) -> Self {
        Self { fields, embedded: &[] }
    }
}

/// A type the binder can produce.
///
/// Implementors derive `Serialize`/`Deserialize`/`Default`, set
/// `#[serde(default)]` on the container so the strict path tolerates
/// missing fields, and describe their wire shape in `SCHEMA`.
pub trait Bindable: DeserializeOwned + Serialize + Default + Send + 'static {
    const SCHEMA: &'static Schema;
}
