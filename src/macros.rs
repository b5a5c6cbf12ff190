//! Convenience macros for building parameter lists.

/// Build a `Vec<Value>` from anything convertible into a `Value`.
///
/// ```
/// use sql_session::{params, Value};
///
/// let values = params![100, "text", None::<i64>];
/// assert_eq!(values[0], Value::Integer(100));
/// assert_eq!(values[2], Value::Null);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::db::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::db::Value::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use crate::db::Value;
    use rstest::rstest;

    #[rstest]
    fn test_params_converts_each_value() {
        let values = params![1, 2.5, "three", true];
        assert_eq!(
            values,
            vec![
                Value::Integer(1),
                Value::Real(2.5),
                Value::Text("three".into()),
                Value::Bool(true)
            ]
        );
    }

    #[rstest]
    fn test_params_empty() {
        let values = params![];
        assert!(values.is_empty());
    }
}
