//! Compiled Avro codecs.

use apache_avro::types::Value;
use apache_avro::Schema;
use oxbow_core::SchemaId;

use crate::error::{SchemaError, SchemaResult};

/// An Avro schema parsed once and reused for every encode/decode.
///
/// Nullable fields (`["null", "string"]` unions) decode to
/// `Value::Union(branch, ..)` with the null branch explicit, so callers
/// always branch on presence instead of reading a silent default.
pub struct CompiledCodec {
    schema: Schema,
    definition: String,
}

impl std::fmt::Debug for CompiledCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCodec")
            .field("schema", &self.schema.canonical_form())
            .finish_non_exhaustive()
    }
}

impl CompiledCodec {
    /// Parses an Avro schema definition.
    ///
    /// # Errors
    /// Returns `InvalidSchema` if the definition does not parse.
    pub fn compile(definition: &str) -> SchemaResult<Self> {
        let schema = Schema::parse_str(definition).map_err(|e| SchemaError::InvalidSchema {
            message: e.to_string(),
        })?;
        Ok(Self {
            schema,
            definition: definition.to_string(),
        })
    }

    /// Returns the schema definition this codec was compiled from.
    #[must_use]
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Returns the parsed schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Encodes a record as a bare Avro datum (no envelope).
    ///
    /// # Errors
    /// Returns `PayloadEncode` if the value does not fit the schema.
    pub fn encode(&self, value: &Value) -> SchemaResult<Vec<u8>> {
        apache_avro::to_avro_datum(&self.schema, value.clone()).map_err(|e| {
            SchemaError::PayloadEncode {
                message: e.to_string(),
            }
        })
    }

    /// Decodes a bare Avro datum (no envelope).
    ///
    /// # Errors
    /// Returns `PayloadDecode` if the bytes do not match the schema.
    pub fn decode(&self, id: SchemaId, payload: &[u8]) -> SchemaResult<Value> {
        let mut reader = payload;
        apache_avro::from_avro_datum(&self.schema, &mut reader, None).map_err(|e| {
            SchemaError::PayloadDecode {
                id,
                message: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Message",
        "fields": [
            {"name": "id", "type": "int"},
            {"name": "content", "type": "string"},
            {"name": "timestamp", "type": "long"},
            {"name": "title", "type": ["null", "string"], "default": null}
        ]
    }"#;

    fn message(title: Value) -> Value {
        Value::Record(vec![
            ("id".to_string(), Value::Int(1)),
            ("content".to_string(), Value::String("hi".to_string())),
            ("timestamp".to_string(), Value::Long(1_690_000_000)),
            ("title".to_string(), title),
        ])
    }

    #[test]
    fn test_compile_rejects_garbage() {
        assert!(matches!(
            CompiledCodec::compile("not a schema").unwrap_err(),
            SchemaError::InvalidSchema { .. }
        ));
    }

    #[test]
    fn test_roundtrip_with_title() {
        let codec = CompiledCodec::compile(MESSAGE_SCHEMA).unwrap();
        let original = message(Value::Union(1, Box::new(Value::String("hello".to_string()))));

        let bytes = codec.encode(&original).unwrap();
        let decoded = codec.decode(SchemaId::new(1), &bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_null_title_is_explicitly_absent() {
        let codec = CompiledCodec::compile(MESSAGE_SCHEMA).unwrap();
        let original = message(Value::Union(0, Box::new(Value::Null)));

        let bytes = codec.encode(&original).unwrap();
        let decoded = codec.decode(SchemaId::new(1), &bytes).unwrap();

        let Value::Record(fields) = decoded else {
            panic!("expected record");
        };
        let title = &fields.iter().find(|(name, _)| name == "title").unwrap().1;
        assert_eq!(*title, Value::Union(0, Box::new(Value::Null)));
    }

    #[test]
    fn test_decode_mismatched_payload() {
        let codec = CompiledCodec::compile(MESSAGE_SCHEMA).unwrap();
        let err = codec.decode(SchemaId::new(1), &[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, SchemaError::PayloadDecode { .. }));
    }
}
