use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A typed metadata scalar.
/// 具型別的中繼資料值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataValue {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    #[serde(serialize_with = "write_double", deserialize_with = "read_double")]
    Double(f64),
    Bool(bool),
    String(String),
}

impl MetadataValue {
    /// Lower-case tag used in the text format.
    pub fn kind(&self) -> &'static str {
        match self {
            MetadataValue::Int32(_) => "int32",
            MetadataValue::UInt32(_) => "uint32",
            MetadataValue::Int64(_) => "int64",
            MetadataValue::Double(_) => "double",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::String(_) => "string",
        }
    }
}

// JSON numbers cannot hold non-finite values, so those travel as strings.
fn write_double<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.is_nan() {
        serializer.serialize_str("nan")
    } else if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
    } else {
        serializer.serialize_f64(*value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DoubleRepr {
    Number(f64),
    Text(String),
}

// `null` is what older writers emitted for non-finite values.
fn read_double<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<DoubleRepr>::deserialize(deserializer)? {
        None => Ok(f64::NAN),
        Some(DoubleRepr::Number(value)) => Ok(value),
        Some(DoubleRepr::Text(text)) => match text.to_ascii_lowercase().as_str() {
            "nan" => Ok(f64::NAN),
            "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
            "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
            _ => Err(D::Error::custom(format!("invalid double {text:?}"))),
        },
    }
}

/// Rust types that map onto exactly one [`MetadataValue`] variant.
/// 可對應至單一中繼資料型別的 Rust 型別。
pub trait MetadataType: Sized {
    fn from_value(value: &MetadataValue) -> Option<Self>;
    fn into_value(self) -> MetadataValue;
}

macro_rules! metadata_type {
    ($ty:ty, $variant:ident) => {
        impl MetadataType for $ty {
            fn from_value(value: &MetadataValue) -> Option<Self> {
                match value {
                    MetadataValue::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }

            fn into_value(self) -> MetadataValue {
                MetadataValue::$variant(self)
            }
        }

        impl From<$ty> for MetadataValue {
            fn from(value: $ty) -> Self {
                MetadataValue::$variant(value)
            }
        }
    };
}

metadata_type!(i32, Int32);
metadata_type!(u32, UInt32);
metadata_type!(i64, Int64);
metadata_type!(f64, Double);
metadata_type!(bool, Bool);
metadata_type!(String, String);

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

/// Per-node key/value table of typed scalars.
/// 每個節點的具型別鍵值表。
///
/// Reads are total: a missing key or a value stored under a different type
/// yields the caller's default instead of an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataStore {
    entries: BTreeMap<String, MetadataValue>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value under `key` if it was stored as `T`, else `default`.
    /// 若鍵存在且型別相符則回傳該值，否則回傳預設值。
    pub fn get<T: MetadataType>(&self, key: &str, default: T) -> T {
        self.entries
            .get(key)
            .and_then(T::from_value)
            .unwrap_or(default)
    }

    /// Borrowing variant of [`MetadataStore::get`] for strings.
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.entries.get(key) {
            Some(MetadataValue::String(value)) => value,
            _ => default,
        }
    }

    pub fn get_value(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Option<MetadataValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl FromIterator<(String, MetadataValue)> for MetadataStore {
    fn from_iter<I: IntoIterator<Item = (String, MetadataValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
