//! PayloadCodec - 型付き payload とフラットなフィールドマップの相互変換
//!
//! # エンコード
//! serde_json で一度 `Value::Object` にしてから、各フィールドを文字列化する。
//! - 文字列はそのまま
//! - 数値・真偽値などは JSON 表記（`3`, `true`）
//! - `null` は書き出さない
//!
//! # デコード
//! フィールド値はすべて文字列なので、`FieldValue` デシリアライザが
//! 「要求された型」に応じてパースする。`Name = "123"` を String として読めば "123" のまま、
//! `Priority = "3"` を i64 として読めば 3 になる。
//! 足りないフィールドは serde の `missing field` エラーになり、推測で埋めることはない。

use serde::Serialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, DeserializeOwned, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

use crate::domain::FieldMap;

/// Encode/decode failure between a typed payload and a field map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("field value {value:?} is not a valid {expected}")]
    InvalidValue { value: String, expected: &'static str },

    #[error("payload must serialize to a flat struct or map")]
    NotFlat,

    #[error("{0}")]
    Custom(String),
}

impl de::Error for FieldError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        FieldError::Custom(msg.to_string())
    }
}

/// Encode a payload into the flat field map that gets appended to the log.
pub fn to_fields<T: Serialize>(payload: &T) -> Result<FieldMap, FieldError> {
    let value = serde_json::to_value(payload).map_err(|e| FieldError::Custom(e.to_string()))?;
    let serde_json::Value::Object(object) = value else {
        return Err(FieldError::NotFlat);
    };

    let mut fields = FieldMap::new();
    for (name, value) in object {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::String(text) => {
                fields.insert(name, text);
            }
            other => {
                fields.insert(name, other.to_string());
            }
        }
    }
    Ok(fields)
}

/// Decode a field map into a typed payload.
pub fn from_fields<T: DeserializeOwned>(fields: &FieldMap) -> Result<T, FieldError> {
    let deserializer = MapDeserializer::new(
        fields
            .iter()
            .map(|(name, value)| (name.as_str(), FieldValue(value.as_str()))),
    );
    T::deserialize(deserializer)
}

/// One raw field value, parsed lazily into whatever type the target asks for.
struct FieldValue<'a>(&'a str);

impl FieldValue<'_> {
    fn invalid(&self, expected: &'static str) -> FieldError {
        FieldError::InvalidValue {
            value: self.0.to_string(),
            expected,
        }
    }
}

macro_rules! parse_scalar {
    ($($method:ident => $visit:ident($ty:ty, $expected:literal);)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
                let parsed: $ty = self.0.trim().parse().map_err(|_| self.invalid($expected))?;
                visitor.$visit(parsed)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for FieldValue<'_> {
    type Error = FieldError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        visitor.visit_str(self.0)
    }

    parse_scalar! {
        deserialize_bool => visit_bool(bool, "bool");
        deserialize_i8 => visit_i8(i8, "i8");
        deserialize_i16 => visit_i16(i16, "i16");
        deserialize_i32 => visit_i32(i32, "i32");
        deserialize_i64 => visit_i64(i64, "i64");
        deserialize_u8 => visit_u8(u8, "u8");
        deserialize_u16 => visit_u16(u16, "u16");
        deserialize_u32 => visit_u32(u32, "u32");
        deserialize_u64 => visit_u64(u64, "u64");
        deserialize_f32 => visit_f32(f32, "f32");
        deserialize_f64 => visit_f64(f64, "f64");
    }

    // フィールドが存在する時点で Some
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        visitor.visit_enum(self.0.into_deserializer())
    }

    forward_to_deserialize_any! {
        char str string bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}

impl<'de, 'a> IntoDeserializer<'de, FieldError> for FieldValue<'a> {
    type Deserializer = FieldValue<'a>;

    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Event;
    use serde::Deserialize;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn encodes_event_as_flat_strings() {
        let event = Event::new("alice", 3, "T0");
        let encoded = to_fields(&event).unwrap();
        assert_eq!(
            encoded,
            fields(&[("Name", "alice"), ("Priority", "3"), ("Time", "T0")])
        );
    }

    #[test]
    fn decodes_fields_written_by_other_producers() {
        let raw = fields(&[
            ("Name", "quiet-river"),
            ("Priority", "7"),
            ("Time", "2024-05-01T10:00:00Z"),
        ]);
        let event: Event = from_fields(&raw).unwrap();
        assert_eq!(event, Event::new("quiet-river", 7, "2024-05-01T10:00:00Z"));
    }

    #[test]
    fn numeric_looking_strings_stay_strings() {
        let raw = fields(&[("Name", "123"), ("Priority", "1"), ("Time", "T0")]);
        let event: Event = from_fields(&raw).unwrap();
        assert_eq!(event.name, "123");
    }

    #[test]
    fn missing_field_is_an_error_not_a_default() {
        let raw = fields(&[("Name", "alice"), ("Time", "T0")]);
        let err = from_fields::<Event>(&raw).unwrap_err();
        assert!(err.to_string().contains("Priority"));
    }

    #[test]
    fn unparsable_number_names_the_value() {
        let raw = fields(&[("Name", "alice"), ("Priority", "high"), ("Time", "T0")]);
        let err = from_fields::<Event>(&raw).unwrap_err();
        assert_eq!(
            err,
            FieldError::InvalidValue {
                value: "high".to_string(),
                expected: "i64"
            }
        );
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum Level {
        Low,
        High,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rich {
        level: Level,
        urgent: bool,
        ratio: f64,
        note: Option<String>,
    }

    #[test]
    fn optional_and_enum_fields() {
        let value = Rich {
            level: Level::High,
            urgent: true,
            ratio: 0.5,
            note: None,
        };
        let encoded = to_fields(&value).unwrap();
        assert!(!encoded.contains_key("note"));
        assert_eq!(encoded["level"], "high");
        assert_eq!(encoded["urgent"], "true");

        let back: Rich = from_fields(&encoded).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn non_struct_payload_is_rejected() {
        assert_eq!(to_fields(&42).unwrap_err(), FieldError::NotFlat);
    }
}
