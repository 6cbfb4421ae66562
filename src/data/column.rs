use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, StringArray, TimestampMicrosecondArray,
    UInt16Array, UInt32Array, UInt8Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};

// ---------------------------------------------------------------------------
// ColumnValue – the physical type of a table column
// ---------------------------------------------------------------------------

/// A Rust type that can live in a table column, with its Arrow and SQLite
/// representations. Only `Option<_>` columns are nullable.
pub trait ColumnValue: Clone + Sized {
    fn data_type() -> DataType;

    fn nullable() -> bool {
        false
    }

    fn to_array(values: &[Self]) -> ArrayRef;

    /// `None` when the array has another physical type or unexpected nulls.
    fn from_array(array: &dyn Array) -> Option<Vec<Self>>;

    fn to_sql(&self) -> SqlValue;

    fn from_sql(value: ValueRef<'_>) -> Option<Self>;
}

macro_rules! unsigned_column {
    ($ty:ty, $array:ty, $data_type:expr) => {
        impl ColumnValue for $ty {
            fn data_type() -> DataType {
                $data_type
            }

            fn to_array(values: &[Self]) -> ArrayRef {
                Arc::new(<$array>::from(values.to_vec()))
            }

            fn from_array(array: &dyn Array) -> Option<Vec<Self>> {
                let array = array.as_any().downcast_ref::<$array>()?;
                (array.null_count() == 0).then(|| array.values().to_vec())
            }

            fn to_sql(&self) -> SqlValue {
                SqlValue::Integer(i64::from(*self))
            }

            fn from_sql(value: ValueRef<'_>) -> Option<Self> {
                match value {
                    ValueRef::Integer(i) => <$ty>::try_from(i).ok(),
                    _ => None,
                }
            }
        }
    };
}

unsigned_column!(u8, UInt8Array, DataType::UInt8);
unsigned_column!(u16, UInt16Array, DataType::UInt16);
unsigned_column!(u32, UInt32Array, DataType::UInt32);

fn real_from_sql(value: ValueRef<'_>) -> Option<f32> {
    match value {
        ValueRef::Real(r) => Some(r as f32),
        ValueRef::Integer(i) => Some(i as f32),
        _ => None,
    }
}

impl ColumnValue for f32 {
    fn data_type() -> DataType {
        DataType::Float32
    }

    fn to_array(values: &[Self]) -> ArrayRef {
        Arc::new(Float32Array::from(values.to_vec()))
    }

    fn from_array(array: &dyn Array) -> Option<Vec<Self>> {
        let array = array.as_any().downcast_ref::<Float32Array>()?;
        (array.null_count() == 0).then(|| array.values().to_vec())
    }

    fn to_sql(&self) -> SqlValue {
        SqlValue::Real(f64::from(*self))
    }

    fn from_sql(value: ValueRef<'_>) -> Option<Self> {
        real_from_sql(value)
    }
}

impl ColumnValue for Option<f32> {
    fn data_type() -> DataType {
        DataType::Float32
    }

    fn nullable() -> bool {
        true
    }

    fn to_array(values: &[Self]) -> ArrayRef {
        Arc::new(Float32Array::from(values.to_vec()))
    }

    fn from_array(array: &dyn Array) -> Option<Vec<Self>> {
        let array = array.as_any().downcast_ref::<Float32Array>()?;
        Some(array.iter().collect())
    }

    fn to_sql(&self) -> SqlValue {
        match self {
            Some(v) => SqlValue::Real(f64::from(*v)),
            None => SqlValue::Null,
        }
    }

    fn from_sql(value: ValueRef<'_>) -> Option<Self> {
        match value {
            ValueRef::Null => Some(None),
            other => real_from_sql(other).map(Some),
        }
    }
}

impl ColumnValue for bool {
    fn data_type() -> DataType {
        DataType::Boolean
    }

    fn to_array(values: &[Self]) -> ArrayRef {
        Arc::new(BooleanArray::from(values.to_vec()))
    }

    fn from_array(array: &dyn Array) -> Option<Vec<Self>> {
        let array = array.as_any().downcast_ref::<BooleanArray>()?;
        (array.null_count() == 0).then(|| array.values().iter().collect())
    }

    fn to_sql(&self) -> SqlValue {
        SqlValue::Integer(i64::from(*self))
    }

    fn from_sql(value: ValueRef<'_>) -> Option<Self> {
        match value {
            ValueRef::Integer(i) => Some(i != 0),
            _ => None,
        }
    }
}

impl ColumnValue for String {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn to_array(values: &[Self]) -> ArrayRef {
        Arc::new(StringArray::from_iter_values(values))
    }

    fn from_array(array: &dyn Array) -> Option<Vec<Self>> {
        let array = array.as_any().downcast_ref::<StringArray>()?;
        if array.null_count() != 0 {
            return None;
        }
        Some(array.iter().flatten().map(str::to_string).collect())
    }

    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn from_sql(value: ValueRef<'_>) -> Option<Self> {
        value.as_str().ok().map(str::to_string)
    }
}

/// Stored as microseconds in Arrow and as RFC 3339 text in SQLite.
impl ColumnValue for DateTime<Utc> {
    fn data_type() -> DataType {
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
    }

    fn to_array(values: &[Self]) -> ArrayRef {
        let micros: Vec<i64> = values.iter().map(DateTime::timestamp_micros).collect();
        Arc::new(TimestampMicrosecondArray::from(micros).with_timezone("UTC"))
    }

    fn from_array(array: &dyn Array) -> Option<Vec<Self>> {
        let array = array.as_any().downcast_ref::<TimestampMicrosecondArray>()?;
        if array.null_count() != 0 {
            return None;
        }
        array
            .values()
            .iter()
            .map(|&us| DateTime::from_timestamp_micros(us))
            .collect()
    }

    fn to_sql(&self) -> SqlValue {
        SqlValue::Text(self.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    fn from_sql(value: ValueRef<'_>) -> Option<Self> {
        let text = value.as_str().ok()?;
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn through_arrow<T: ColumnValue + PartialEq + std::fmt::Debug>(values: Vec<T>) {
        let array = T::to_array(&values);
        assert_eq!(array.data_type(), &T::data_type());
        assert_eq!(T::from_array(array.as_ref()), Some(values));
    }

    #[test]
    fn arrow_representation_is_lossless() {
        through_arrow(vec![0u8, 1, 2]);
        through_arrow(vec![7u16, 65535]);
        through_arrow(vec![832_100u32]);
        through_arrow(vec![1.5f32, -0.0, 1e-30]);
        through_arrow(vec![Some(1.0f32), None]);
        through_arrow(vec![true, false]);
        through_arrow(vec!["Ag".to_string(), String::new()]);
        through_arrow(vec![Utc.with_ymd_and_hms(2022, 5, 18, 1, 25, 52).unwrap()]);
    }

    #[test]
    fn wrong_physical_type_is_refused() {
        let array = u32::to_array(&[1, 2]);
        assert_eq!(u16::from_array(array.as_ref()), None);
        assert_eq!(f32::from_array(array.as_ref()), None);
    }

    #[test]
    fn nulls_only_fit_optional_columns() {
        let array = <Option<f32>>::to_array(&[None, Some(2.0)]);
        assert_eq!(f32::from_array(array.as_ref()), None);
    }

    #[test]
    fn sql_values_widen_and_narrow_back() {
        let v = 0.1f32;
        let SqlValue::Real(wide) = v.to_sql() else { panic!("expected REAL") };
        assert_eq!(f32::from_sql(ValueRef::Real(wide)), Some(v));
        assert_eq!(u8::from_sql(ValueRef::Integer(300)), None);
        assert_eq!(<Option<f32>>::from_sql(ValueRef::Null), Some(None));

        let t = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let SqlValue::Text(text) = t.to_sql() else { panic!("expected TEXT") };
        assert_eq!(DateTime::<Utc>::from_sql(ValueRef::Text(text.as_bytes())), Some(t));
    }
}
