//! DataValue - the tagged value that flows between code blocks
//!
//! Parameters, variables and trigger payloads are all [`DataValue`]s. Values are
//! immutable; the coercions (`as_string`, `as_number`, `as_boolean`) either
//! produce a value or fail with a [`TypeConversionError`]. Nothing is silently
//! truncated.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, EntityId};

// ─────────────────────────────────────────────────────────────────────────────
// Spatial and item types
// ─────────────────────────────────────────────────────────────────────────────

/// A point in a host world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    /// Create a location with zero rotation
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// Set the facing direction
    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Distance to another location, `None` across worlds
    pub fn distance(&self, other: &Location) -> Option<f64> {
        if self.world != other.world {
            return None;
        }
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        Some((dx * dx + dy * dy + dz * dz).sqrt())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}, {}, {})",
            self.world,
            format_number(self.x),
            format_number(self.y),
            format_number(self.z)
        )
    }
}

/// A stack of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub material: String,
    pub amount: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ItemStack {
    pub fn new(material: impl Into<String>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
            display_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl fmt::Display for ItemStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{}x {} ({})", self.amount, self.material, name),
            None => write!(f, "{}x {}", self.amount, self.material),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The variant tag of a [`DataValue`], also used to declare parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Number,
    Boolean,
    List,
    Map,
    Location,
    Item,
    Actor,
    Entity,
    Any,
}

impl ValueKind {
    /// Whether a value of kind `other` can be supplied where `self` is declared
    pub fn accepts(&self, other: ValueKind) -> bool {
        match (self, other) {
            (ValueKind::Any, _) => true,
            // Scalars coerce into each other through the as_* conversions
            (ValueKind::Text, ValueKind::Number | ValueKind::Boolean) => true,
            (ValueKind::Number, ValueKind::Text | ValueKind::Boolean) => true,
            (ValueKind::Boolean, ValueKind::Text | ValueKind::Number) => true,
            (a, b) => *a == b,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Location => "location",
            ValueKind::Item => "item",
            ValueKind::Actor => "actor",
            ValueKind::Entity => "entity",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversion Error
// ─────────────────────────────────────────────────────────────────────────────

/// Error when coercing a [`DataValue`] into another kind
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeConversionError {
    #[error("Cannot convert {from} to {to}")]
    Incompatible { from: ValueKind, to: ValueKind },

    #[error("Cannot convert text '{text}' to {to}")]
    Unparseable { text: String, to: ValueKind },
}

// ─────────────────────────────────────────────────────────────────────────────
// DataValue
// ─────────────────────────────────────────────────────────────────────────────

/// Tagged value used for parameters, variables and event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    List(Vec<DataValue>),
    Map(BTreeMap<String, DataValue>),
    Location(Location),
    Item(ItemStack),
    /// Reference to an actor; clones denote the same actor
    Actor(ActorId),
    /// Reference to a world entity; clones denote the same entity
    Entity(EntityId),
    /// Opaque value with no better variant (including null)
    Any(serde_json::Value),
}

impl Default for DataValue {
    fn default() -> Self {
        DataValue::Any(serde_json::Value::Null)
    }
}

impl DataValue {
    /// The null value
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Any(serde_json::Value::Null))
    }

    /// Variant tag of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            DataValue::Text(_) => ValueKind::Text,
            DataValue::Number(_) => ValueKind::Number,
            DataValue::Boolean(_) => ValueKind::Boolean,
            DataValue::List(_) => ValueKind::List,
            DataValue::Map(_) => ValueKind::Map,
            DataValue::Location(_) => ValueKind::Location,
            DataValue::Item(_) => ValueKind::Item,
            DataValue::Actor(_) => ValueKind::Actor,
            DataValue::Entity(_) => ValueKind::Entity,
            DataValue::Any(_) => ValueKind::Any,
        }
    }

    fn incompatible(&self, to: ValueKind) -> TypeConversionError {
        TypeConversionError::Incompatible {
            from: self.kind(),
            to,
        }
    }

    /// Render as text
    pub fn as_string(&self) -> Result<String, TypeConversionError> {
        Ok(match self {
            DataValue::Text(s) => s.clone(),
            DataValue::Number(n) => format_number(*n),
            DataValue::Boolean(b) => b.to_string(),
            DataValue::List(items) => items
                .iter()
                .map(DataValue::as_string)
                .collect::<Result<Vec<_>, _>>()?
                .join(", "),
            DataValue::Map(entries) => {
                let parts = entries
                    .iter()
                    .map(|(k, v)| v.as_string().map(|v| format!("{k}={v}")))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{{{}}}", parts.join(", "))
            }
            DataValue::Location(loc) => loc.to_string(),
            DataValue::Item(item) => item.to_string(),
            DataValue::Actor(id) => id.to_string(),
            DataValue::Entity(id) => id.to_string(),
            DataValue::Any(raw) => match raw {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        })
    }

    /// Coerce to a number
    ///
    /// Lists and maps report their element count.
    pub fn as_number(&self) -> Result<f64, TypeConversionError> {
        match self {
            DataValue::Number(n) => Ok(*n),
            DataValue::Text(s) => parse_number(s),
            DataValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            DataValue::List(items) => Ok(items.len() as f64),
            DataValue::Map(entries) => Ok(entries.len() as f64),
            DataValue::Any(raw) => match raw {
                serde_json::Value::Number(n) => {
                    n.as_f64().ok_or_else(|| self.incompatible(ValueKind::Number))
                }
                serde_json::Value::String(s) => parse_number(s),
                serde_json::Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
                serde_json::Value::Array(items) => Ok(items.len() as f64),
                serde_json::Value::Object(fields) => Ok(fields.len() as f64),
                serde_json::Value::Null => Err(self.incompatible(ValueKind::Number)),
            },
            DataValue::Location(_)
            | DataValue::Item(_)
            | DataValue::Actor(_)
            | DataValue::Entity(_) => Err(self.incompatible(ValueKind::Number)),
        }
    }

    /// Coerce to a boolean
    ///
    /// Lists and maps are true when non-empty; references are true.
    pub fn as_boolean(&self) -> Result<bool, TypeConversionError> {
        match self {
            DataValue::Boolean(b) => Ok(*b),
            DataValue::Text(s) => parse_boolean(s),
            DataValue::Number(n) => Ok(*n != 0.0),
            DataValue::List(items) => Ok(!items.is_empty()),
            DataValue::Map(entries) => Ok(!entries.is_empty()),
            DataValue::Actor(_) | DataValue::Entity(_) => Ok(true),
            DataValue::Any(raw) => match raw {
                serde_json::Value::Bool(b) => Ok(*b),
                serde_json::Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
                serde_json::Value::String(s) => parse_boolean(s),
                serde_json::Value::Array(items) => Ok(!items.is_empty()),
                serde_json::Value::Object(fields) => Ok(!fields.is_empty()),
                serde_json::Value::Null => Err(self.incompatible(ValueKind::Boolean)),
            },
            DataValue::Location(_) | DataValue::Item(_) => {
                Err(self.incompatible(ValueKind::Boolean))
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_location(&self) -> Option<&Location> {
        match self {
            DataValue::Location(loc) => Some(loc),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<&ItemStack> {
        match self {
            DataValue::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_actor(&self) -> Option<ActorId> {
        match self {
            DataValue::Actor(id) => Some(*id),
            _ => None,
        }
    }

    /// Loose equality used by comparison conditions
    ///
    /// Numeric when both sides coerce to numbers, otherwise case-insensitive text.
    pub fn loosely_equals(&self, other: &DataValue) -> bool {
        if let (Some(a), Some(b)) = (self.numeric(), other.numeric()) {
            return (a - b).abs() < f64::EPSILON;
        }
        match (self.as_string(), other.as_string()) {
            (Ok(a), Ok(b)) => a.eq_ignore_ascii_case(&b),
            _ => self == other,
        }
    }

    /// Ordering used by comparison conditions, `None` when not comparable
    pub fn compare(&self, other: &DataValue) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.numeric(), other.numeric()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (DataValue::Text(a), DataValue::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Number for scalar variants only (lists don't count as numbers here)
    fn numeric(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            DataValue::Text(s) => parse_number(s).ok(),
            DataValue::Any(serde_json::Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // as_string only fails for nested values that can't render, which
        // no current variant produces
        match self.as_string() {
            Ok(s) => f.write_str(&s),
            Err(e) => write!(f, "<{e}>"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_number(text: &str) -> Result<f64, TypeConversionError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| TypeConversionError::Unparseable {
            text: text.to_string(),
            to: ValueKind::Number,
        })
}

fn parse_boolean(text: &str) -> Result<bool, TypeConversionError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => other
            .parse::<f64>()
            .map(|n| n != 0.0)
            .map_err(|_| TypeConversionError::Unparseable {
                text: text.to_string(),
                to: ValueKind::Boolean,
            }),
    }
}

/// Format a number, dropping the fractional part for integral values
///
/// Non-integral values use the shortest representation that parses back to
/// the same `f64`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON interop
// ─────────────────────────────────────────────────────────────────────────────

const TYPE_TAG: &str = "__type__";

impl DataValue {
    /// Infer a variant from the shape of a raw JSON value
    ///
    /// Objects carrying a `__type__` tag of `location`, `item`, `actor` or
    /// `entity` become that variant; other objects become maps.
    pub fn from_json(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => DataValue::null(),
            serde_json::Value::Bool(b) => DataValue::Boolean(b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => DataValue::Number(f),
                None => DataValue::Any(serde_json::Value::Number(n)),
            },
            serde_json::Value::String(s) => DataValue::Text(s),
            serde_json::Value::Array(items) => {
                DataValue::List(items.into_iter().map(DataValue::from_json).collect())
            }
            serde_json::Value::Object(mut fields) => {
                let tag = fields
                    .get(TYPE_TAG)
                    .and_then(|t| t.as_str())
                    .map(str::to_ascii_lowercase);
                if let Some(tag) = tag {
                    fields.remove(TYPE_TAG);
                    let inner = serde_json::Value::Object(fields.clone());
                    let typed = match tag.as_str() {
                        "location" => serde_json::from_value(inner).ok().map(DataValue::Location),
                        "item" => serde_json::from_value(inner).ok().map(DataValue::Item),
                        "actor" => id_field(&fields).map(|id| DataValue::Actor(ActorId(id))),
                        "entity" => id_field(&fields).map(|id| DataValue::Entity(EntityId(id))),
                        _ => None,
                    };
                    if let Some(value) = typed {
                        return value;
                    }
                }
                DataValue::Map(
                    fields
                        .into_iter()
                        .map(|(k, v)| (k, DataValue::from_json(v)))
                        .collect(),
                )
            }
        }
    }
}

fn id_field(fields: &serde_json::Map<String, serde_json::Value>) -> Option<uuid::Uuid> {
    fields
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
}

/// Non-finite numbers have no JSON form and become `null` with a warning
impl From<DataValue> for serde_json::Value {
    fn from(v: DataValue) -> Self {
        fn tagged(tag: &str, mut value: serde_json::Value) -> serde_json::Value {
            if let Some(obj) = value.as_object_mut() {
                obj.insert(TYPE_TAG.to_string(), serde_json::Value::String(tag.to_string()));
            }
            value
        }

        match v {
            DataValue::Text(s) => serde_json::Value::String(s),
            DataValue::Number(n) => match serde_json::Number::from_f64(n) {
                Some(number) => serde_json::Value::Number(number),
                None => {
                    tracing::warn!(value = n, "Non-finite number has no JSON form, writing null");
                    serde_json::Value::Null
                }
            },
            DataValue::Boolean(b) => serde_json::Value::Bool(b),
            DataValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            DataValue::Map(entries) => serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
            DataValue::Location(loc) => {
                tagged("location", serde_json::to_value(loc).unwrap_or_default())
            }
            DataValue::Item(item) => tagged("item", serde_json::to_value(item).unwrap_or_default()),
            DataValue::Actor(id) => tagged("actor", serde_json::json!({ "id": id.to_string() })),
            DataValue::Entity(id) => tagged("entity", serde_json::json!({ "id": id.to_string() })),
            DataValue::Any(raw) => raw,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Boolean(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Number(v as f64)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Number(v as f64)
    }
}

impl From<u32> for DataValue {
    fn from(v: u32) -> Self {
        DataValue::Number(v as f64)
    }
}

impl From<usize> for DataValue {
    fn from(v: usize) -> Self {
        DataValue::Number(v as f64)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Number(v)
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Text(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Text(v.to_string())
    }
}

impl<T: Into<DataValue>> From<Vec<T>> for DataValue {
    fn from(v: Vec<T>) -> Self {
        DataValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, DataValue>> for DataValue {
    fn from(v: BTreeMap<String, DataValue>) -> Self {
        DataValue::Map(v)
    }
}

impl From<Location> for DataValue {
    fn from(v: Location) -> Self {
        DataValue::Location(v)
    }
}

impl From<ItemStack> for DataValue {
    fn from(v: ItemStack) -> Self {
        DataValue::Item(v)
    }
}

impl From<ActorId> for DataValue {
    fn from(v: ActorId) -> Self {
        DataValue::Actor(v)
    }
}

impl From<EntityId> for DataValue {
    fn from(v: EntityId) -> Self {
        DataValue::Entity(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
