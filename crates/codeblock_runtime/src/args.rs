// Typed parameter access for action handlers
//
// Every accessor reports failures as validation errors naming the parameter.
// Numeric accessors reject NaN and infinities and clamp before returning, so
// handlers never apply out-of-range values to host state.

use codeblock_types::{DataValue, Location, Parameters, VariableScope};

use crate::error::{ScriptError, ScriptResult};

/// Borrowed view over a block's parameters
#[derive(Debug, Clone, Copy)]
pub struct ActionArgs<'a> {
    params: &'a Parameters,
}

impl<'a> ActionArgs<'a> {
    pub fn new(params: &'a Parameters) -> Self {
        Self { params }
    }

    /// A parameter value, treating null as absent
    pub fn get(&self, name: &str) -> Option<&'a DataValue> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    pub fn require(&self, name: &str) -> ScriptResult<&'a DataValue> {
        self.get(name)
            .ok_or_else(|| ScriptError::validation(name, "required parameter is missing"))
    }

    pub fn text(&self, name: &str) -> ScriptResult<String> {
        self.require(name)?
            .as_string()
            .map_err(|e| ScriptError::validation(name, e.to_string()))
    }

    pub fn text_or(&self, name: &str, default: &str) -> ScriptResult<String> {
        match self.get(name) {
            Some(_) => self.text(name),
            None => Ok(default.to_string()),
        }
    }

    pub fn number(&self, name: &str) -> ScriptResult<f64> {
        let n = self
            .require(name)?
            .as_number()
            .map_err(|e| ScriptError::validation(name, e.to_string()))?;
        if !n.is_finite() {
            return Err(ScriptError::validation(name, "must be a finite number"));
        }
        Ok(n)
    }

    pub fn number_or(&self, name: &str, default: f64) -> ScriptResult<f64> {
        match self.get(name) {
            Some(_) => self.number(name),
            None => Ok(default),
        }
    }

    /// Required number clamped into `[min, max]`
    pub fn clamped(&self, name: &str, min: f64, max: f64) -> ScriptResult<f64> {
        Ok(self.number(name)?.clamp(min, max))
    }

    /// Optional number clamped into `[min, max]`
    pub fn clamped_or(&self, name: &str, default: f64, min: f64, max: f64) -> ScriptResult<f64> {
        Ok(self.number_or(name, default)?.clamp(min, max))
    }

    /// Optional whole number clamped into `[min, max]`
    ///
    /// Fractional input is rejected rather than truncated.
    pub fn integer_clamped(
        &self,
        name: &str,
        default: i64,
        min: i64,
        max: i64,
    ) -> ScriptResult<i64> {
        let n = self.number_or(name, default as f64)?;
        if n.fract() != 0.0 {
            return Err(ScriptError::validation(name, "must be a whole number"));
        }
        Ok((n.clamp(i64::MIN as f64, i64::MAX as f64) as i64).clamp(min, max))
    }

    pub fn boolean_or(&self, name: &str, default: bool) -> ScriptResult<bool> {
        match self.get(name) {
            Some(value) => value
                .as_boolean()
                .map_err(|e| ScriptError::validation(name, e.to_string())),
            None => Ok(default),
        }
    }

    pub fn scope_or(&self, name: &str, default: VariableScope) -> ScriptResult<VariableScope> {
        match self.get(name) {
            Some(_) => self
                .text(name)?
                .parse::<VariableScope>()
                .map_err(|e| ScriptError::validation(name, e.to_string())),
            None => Ok(default),
        }
    }

    /// A location given as a location value or a `{world, x, y, z}` map
    pub fn location(&self, name: &str) -> ScriptResult<Location> {
        let value = self.require(name)?;
        if let Some(loc) = value.as_location() {
            return Ok(loc.clone());
        }
        let Some(fields) = value.as_map() else {
            return Err(ScriptError::validation(name, "expected a location"));
        };

        let coord = |axis: &str| -> ScriptResult<f64> {
            let n = fields
                .get(axis)
                .ok_or_else(|| ScriptError::validation(name, format!("missing {axis}")))?
                .as_number()
                .map_err(|e| ScriptError::validation(name, e.to_string()))?;
            if n.is_finite() {
                Ok(n)
            } else {
                Err(ScriptError::validation(name, format!("{axis} must be finite")))
            }
        };
        let world = match fields.get("world") {
            Some(w) => w
                .as_string()
                .map_err(|e| ScriptError::validation(name, e.to_string()))?,
            None => "world".to_string(),
        };
        Ok(Location::new(world, coord("x")?, coord("y")?, coord("z")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params(pairs: Vec<(&str, DataValue)>) -> Parameters {
        pairs.into_iter().collect()
    }

    #[test]
    fn test_required_and_defaults() {
        let p = params(vec![("message", "hi".into())]);
        let args = ActionArgs::new(&p);
        assert_eq!(args.text("message").unwrap(), "hi");
        assert_eq!(args.text_or("prefix", "> ").unwrap(), "> ");
        assert!(matches!(
            args.number("amount"),
            Err(ScriptError::Validation { param, .. }) if param == "amount"
        ));
    }

    #[test]
    fn test_numbers_are_clamped() {
        let p = params(vec![("health", 45.into()), ("times", "3".into())]);
        let args = ActionArgs::new(&p);
        assert_eq!(args.clamped("health", 0.0, 20.0).unwrap(), 20.0);
        assert_eq!(args.integer_clamped("times", 1, 1, 10).unwrap(), 3);
        assert_eq!(args.integer_clamped("missing", 7, 1, 5).unwrap(), 5);
    }

    #[test]
    fn test_rejects_non_finite_and_fractional() {
        let p = params(vec![("a", f64::NAN.into()), ("b", 2.5.into())]);
        let args = ActionArgs::new(&p);
        assert!(args.number("a").is_err());
        assert!(args.integer_clamped("b", 0, 0, 10).is_err());
    }

    #[test]
    fn test_scope_parsing() {
        let p = params(vec![("scope", "player".into()), ("bad", "attic".into())]);
        let args = ActionArgs::new(&p);
        assert_eq!(args.scope_or("scope", VariableScope::Local).unwrap(), VariableScope::Player);
        assert_eq!(args.scope_or("none", VariableScope::Global).unwrap(), VariableScope::Global);
        assert!(args.scope_or("bad", VariableScope::Local).is_err());
    }

    #[test]
    fn test_location_from_map() {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), DataValue::from(1));
        fields.insert("y".to_string(), DataValue::from(70));
        fields.insert("z".to_string(), DataValue::from("-3"));
        let p = params(vec![("target", DataValue::Map(fields))]);

        let loc = ActionArgs::new(&p).location("target").unwrap();
        assert_eq!(loc, Location::new("world", 1.0, 70.0, -3.0));
    }
}
