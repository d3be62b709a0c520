//! Describes the shape of a columnar dataset.
//!
//! A [Schema] is an ordered list of named, typed columns. It is required when appending data
//! (the engine needs to know what it is being fed) and reported back when scanning. Next to the
//! programmatic API, a schema can be parsed from the compact JSON notation which is commonly
//! used by tools built around the storage engine: a JSON array of single-entry objects, each
//! mapping a column name to a type name:
//!
//! ```text
//! [{"code": "string"}, {"quantity": "int"}, {"image": "binary"}]
//! ```
use std::fmt::{Display, Formatter};

use itertools::Itertools;

/// Enumerates the column types which the binding forwards to the storage engine.
///
/// Note that this is deliberately a small list. The engine itself knows way more physical
/// encodings, but these are the logical types a host process can put in or get out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataType {
    /// A true/false value.
    Boolean,
    /// A 32 bit signed integer.
    Int,
    /// A 64 bit signed integer.
    Long,
    /// A 64 bit floating point number.
    Double,
    /// A UTF-8 string.
    String,
    /// An opaque byte blob (e.g. an encoded image).
    Binary,
}

impl DataType {
    /// Parses a type from its textual name as used in the JSON schema notation.
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "boolean" => Ok(DataType::Boolean),
            "int" => Ok(DataType::Int),
            "long" => Ok(DataType::Long),
            "double" => Ok(DataType::Double),
            "string" => Ok(DataType::String),
            "binary" => Ok(DataType::Binary),
            _ => Err(anyhow::anyhow!(
                "Unknown column type '{}'. Expected one of: boolean, int, long, double, string, binary.",
                name
            )),
        }
    }

    /// Returns the textual name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Binary => "binary",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Represents a single named column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Field {
    name: String,
    data_type: DataType,
}

impl Field {
    /// Creates a new field with the given name and type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Field {
            name: name.into(),
            data_type,
        }
    }

    /// Returns the name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type of this field.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// Represents the ordered list of columns of a dataset.
///
/// # Examples
///
/// ```
/// # use callisto::schema::{DataType, Field, Schema};
/// let schema = Schema::new(vec![
///     Field::new("code", DataType::String),
///     Field::new("quantity", DataType::Int),
/// ]).unwrap();
///
/// assert_eq!(schema.len(), 2);
/// assert_eq!(schema.field_index("quantity"), Some(1));
/// assert_eq!(schema.to_string(), "code: string, quantity: int");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a schema from the given fields.
    ///
    /// # Errors
    /// Fails if no fields are given or if two fields share a name.
    pub fn new(fields: Vec<Field>) -> anyhow::Result<Self> {
        if fields.is_empty() {
            return Err(anyhow::anyhow!("A schema requires at least one column."));
        }

        for (index, field) in fields.iter().enumerate() {
            if fields
                .iter()
                .skip(index + 1)
                .any(|other| other.name() == field.name())
            {
                return Err(anyhow::anyhow!(
                    "The column '{}' occurs more than once in the schema.",
                    field.name()
                ));
            }
        }

        Ok(Schema { fields })
    }

    /// Parses a schema from the compact JSON notation.
    ///
    /// The expected input is a JSON array of single-entry objects, each mapping a column name
    /// to a type name.
    ///
    /// # Examples
    ///
    /// ```
    /// # use callisto::schema::{DataType, Schema};
    /// let schema = Schema::from_json(r#"[{"code": "string"}, {"quantity": "int"}]"#).unwrap();
    /// assert_eq!(schema.len(), 2);
    /// assert_eq!(schema.fields()[1].data_type(), DataType::Int);
    ///
    /// // Anything else than an array of single-entry objects is rejected...
    /// assert_eq!(Schema::from_json(r#"{"code": "string"}"#).is_err(), true);
    /// assert_eq!(Schema::from_json(r#"[{"code": "string", "quantity": "int"}]"#).is_err(), true);
    /// ```
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|error| anyhow::anyhow!("Cannot parse schema JSON: {}", error))?;

        let entries = parsed
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("A schema has to be a JSON array of objects."))?;

        let mut fields = Vec::with_capacity(entries.len());
        for entry in entries {
            let object = entry.as_object().filter(|object| object.len() == 1).ok_or_else(|| {
                anyhow::anyhow!(
                    "Each schema entry has to be an object with exactly one \"name\": \"type\" pair."
                )
            })?;

            for (name, type_name) in object {
                let type_name = type_name.as_str().ok_or_else(|| {
                    anyhow::anyhow!("The type of column '{}' has to be a string.", name)
                })?;
                fields.push(Field::new(name.as_str(), DataType::parse(type_name)?));
            }
        }

        Schema::new(fields)
    }

    /// Returns the fields of this schema.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Determines if this schema contains no columns.
    ///
    /// Note that [Schema::new] rejects empty schemas, so this is mainly useful for generic
    /// code operating on a schema of unknown origin.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Determines the position of the column with the given name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name() == name)
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.fields
                .iter()
                .map(|field| format!("{}: {}", field.name(), field.data_type()))
                .join(", ")
        )
    }
}
