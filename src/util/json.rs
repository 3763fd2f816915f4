//! JSON view of runtime values, for inspection and the command line.

use serde_json::{Map, Number, Value};

use crate::error::{PerlError, PerlResult};
use crate::interpreter::PerlInterpreter;
use crate::raw::SvKind;
use crate::value::{PerlArray, PerlHash, PerlScalar, PerlValue};

const MAX_DEPTH: usize = 512;

/// Convert a value to JSON. References are followed, so an array reference
/// becomes a JSON array; blessing is ignored. Code and other kinds become
/// their description string.
pub fn to_json(value: &PerlValue) -> PerlResult<Value> {
    convert(value, 0)
}

fn convert(value: &PerlValue, depth: usize) -> PerlResult<Value> {
    if depth > MAX_DEPTH {
        return Err(PerlError::msg("value nested too deeply for JSON"));
    }
    let ctx = value.context();
    match value.kind() {
        SvKind::Array => {
            let array = PerlArray::from_value(value.clone())?;
            array
                .iter()
                .map(|item| convert(item.value(), depth + 1))
                .collect::<PerlResult<Vec<_>>>()
                .map(Value::Array)
        }
        SvKind::Hash => {
            let hash = PerlHash::from_value(value.clone())?;
            let mut map = Map::new();
            for (key, item) in hash.iter() {
                map.insert(key, convert(item.value(), depth + 1)?);
            }
            Ok(Value::Object(map))
        }
        SvKind::Scalar => {
            if let Some(target) = ctx.referent() {
                let target = unsafe { PerlValue::from_inc(target) };
                return convert(&target, depth + 1);
            }
            if !ctx.defined() {
                Ok(Value::Null)
            } else if ctx.is_integer() {
                Ok(match ctx.try_i64() {
                    Ok(number) => Value::from(number),
                    Err(_) => Value::from(ctx.u64_unchecked()),
                })
            } else if ctx.is_double() && !ctx.is_string() {
                Ok(Number::from_f64(ctx.f64_unchecked()).map_or(Value::Null, Value::Number))
            } else {
                Ok(Value::String(ctx.string_unchecked()))
            }
        }
        SvKind::Code | SvKind::Format | SvKind::Io | SvKind::Unknown => {
            Ok(Value::String(value.describe()))
        }
    }
}

/// Build a value from JSON. Arrays and objects become references to new
/// containers.
pub fn from_json(perl: PerlInterpreter, json: &Value) -> PerlScalar {
    match json {
        Value::Null => PerlScalar::undef(perl),
        Value::Bool(flag) => PerlScalar::new(perl, flag),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                PerlScalar::new(perl, &int)
            } else if let Some(uint) = number.as_u64() {
                PerlScalar::new(perl, &uint)
            } else {
                PerlScalar::new(perl, &number.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(text) => PerlScalar::new(perl, text),
        Value::Array(items) => {
            let array = PerlArray::new(perl);
            for item in items {
                array.push(&from_json(perl, item));
            }
            array.to_ref()
        }
        Value::Object(entries) => {
            let hash = PerlHash::new(perl);
            for (key, item) in entries {
                hash.set(key, &from_json(perl, item));
            }
            hash.to_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EmbeddedPerl;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let perl = EmbeddedPerl::new();
        let doc = json!({
            "name": "widget",
            "sizes": [1, 2, 3],
            "price": 2.5,
            "big": 18446744073709551615u64,
            "missing": null,
            "nested": { "ok": "yes" }
        });
        let value = from_json(*perl, &doc);
        assert_eq!(to_json(value.value()).unwrap(), doc);
    }

    #[test]
    fn test_evaluated_structure_to_json() {
        let perl = EmbeddedPerl::new();
        let value: PerlScalar = perl.eval("{ list => [1, 'two'], flag => undef }").unwrap();
        assert_eq!(
            to_json(value.value()).unwrap(),
            json!({ "list": [1, "two"], "flag": null })
        );
    }
}
